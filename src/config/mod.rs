//! Pipeline Configuration Module
//!
//! Provides the quota, cache, retry and stage settings loaded from TOML,
//! replacing hardcoded call-policy constants with operator-tunable values.
//!
//! ## Loading Order
//!
//! 1. `TICKETFLOW_CONFIG` environment variable (path to TOML file)
//! 2. `ticketflow.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! ## Usage
//!
//! The configuration is passed explicitly to the components it builds;
//! there is no process-wide instance.
//!
//! ```ignore
//! let config = PipelineConfig::load();
//! let limiter = SlidingWindowLimiter::from_config(&config.rate_limit)?;
//! ```

mod pipeline_config;
pub mod defaults;
pub mod validation;

pub use pipeline_config::*;
