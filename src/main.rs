//! Ticketflow operator CLI
//!
//! Inspects configuration and maintains the response cache.
//!
//! # Usage
//!
//! ```bash
//! # Validate a config file and print the effective settings
//! ticketflow config check --path ./ticketflow.toml
//!
//! # Show cache entry counts
//! ticketflow cache stats
//!
//! # Drop expired entries / drop everything
//! ticketflow cache purge
//! ticketflow cache clear
//! ```
//!
//! # Environment Variables
//!
//! - `TICKETFLOW_CONFIG`: Path to the pipeline config (default: ./ticketflow.toml)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use ticketflow::config::{validation, PipelineConfig};
use ticketflow::storage;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "ticketflow")]
#[command(about = "Quota-aware staged inference pipeline tooling")]
#[command(version)]
struct CliArgs {
    /// Pipeline config file (skips the standard search order)
    #[arg(long, global = true, env = "TICKETFLOW_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect pipeline configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Maintain the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Load and validate a config, then print the effective TOML
    Check {
        /// File to check (defaults to --config or the standard search order)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Count total, valid and expired entries
    Stats,
    /// Remove every entry
    Clear,
    /// Remove expired entries only
    Purge,
}

// ============================================================================
// Commands
// ============================================================================

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::load_from_file(p)
            .with_context(|| format!("Failed to load config from {}", p.display())),
        None => Ok(PipelineConfig::load()),
    }
}

fn config_check(path: Option<&Path>) -> Result<()> {
    if let Some(p) = path {
        let raw = std::fs::read_to_string(p)
            .with_context(|| format!("Failed to read {}", p.display()))?;
        for warning in validation::validate_unknown_keys(&raw) {
            println!("warning: {warning}");
        }
    }

    let config = load_config(path)?;
    config.validate().context("Config is invalid")?;

    println!("{}", config.to_toml().context("Failed to render config")?);
    println!("# config OK");
    Ok(())
}

fn cache_command(config: &PipelineConfig, action: &CacheAction) -> Result<()> {
    let Some(cache) = storage::open_from_config(&config.cache).with_context(|| {
        format!("Failed to open response cache at {}", config.cache.dir.display())
    })?
    else {
        warn!("Response cache is disabled in config");
        println!("cache disabled");
        return Ok(());
    };

    match action {
        CacheAction::Stats => {
            let stats = cache.stats().context("Failed to read cache stats")?;
            println!("backend:   {}", cache.backend_name());
            println!("location:  {}", config.cache.dir.display());
            println!("namespace: {}", config.cache.namespace);
            println!("total:     {}", stats.total);
            println!("valid:     {}", stats.valid);
            println!("expired:   {}", stats.expired);
        }
        CacheAction::Clear => {
            let removed = cache.clear().context("Failed to clear cache")?;
            info!(removed, "Response cache cleared");
            println!("removed {removed} entries");
        }
        CacheAction::Purge => {
            let removed = cache.purge_expired().context("Failed to purge cache")?;
            info!(removed, "Expired cache entries purged");
            println!("removed {removed} expired entries");
        }
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.json_logs);

    match &args.command {
        Command::Config {
            action: ConfigAction::Check { path },
        } => config_check(path.as_deref().or(args.config.as_deref())),
        Command::Cache { action } => {
            let config = load_config(args.config.as_deref())?;
            config.validate().context("Config is invalid")?;
            cache_command(&config, action)
        }
    }
}
