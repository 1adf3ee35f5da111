//! Pipeline Configuration - call policy as operator-tunable TOML values
//!
//! Each struct implements `Default` with the values in [`super::defaults`],
//! so a missing config file yields the provider's documented free-tier policy.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one pipeline deployment.
///
/// Load with `PipelineConfig::load()` which searches:
/// 1. `$TICKETFLOW_CONFIG` env var
/// 2. `./ticketflow.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Sliding-window quota for external calls
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Response cache location and lifetime
    #[serde(default)]
    pub cache: CacheConfig,

    /// Backoff schedule for throttled calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-stage policy
    #[serde(default)]
    pub stages: StagesConfig,
}

impl PipelineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$TICKETFLOW_CONFIG` environment variable
    /// 2. `./ticketflow.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded pipeline config from {}", defaults::CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", defaults::CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", defaults::CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(defaults::CONFIG_FILE_NAME);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded pipeline config from ./{}", defaults::CONFIG_FILE_NAME);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", defaults::CONFIG_FILE_NAME);
                }
            }
        }

        info!("No {} found, using built-in defaults", defaults::CONFIG_FILE_NAME);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    /// Parse and validate a TOML document that did not come from a file.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::parse(contents, Path::new("<inline>"))
    }

    /// Two-pass parse: unknown keys are logged as warnings and never fail
    /// the load, then serde deserialization and range validation.
    fn parse(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!(origin = %origin.display(), "{}", w);
        }

        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate every section, collecting all errors before failing.
    ///
    /// Rules:
    /// - quota and window must be > 0
    /// - backoff base and cap must be finite and > 0
    /// - min interval must be finite and >= 0
    /// - cache namespace must be a plain directory name when the sled backend is used
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let rl = &self.rate_limit;
        if rl.quota == 0 {
            errors.push("rate_limit.quota must be > 0".to_string());
        }
        if rl.window_seconds == 0 {
            errors.push("rate_limit.window_seconds must be > 0".to_string());
        }
        if !rl.min_interval_seconds.is_finite() || rl.min_interval_seconds < 0.0 {
            errors.push(format!(
                "rate_limit.min_interval_seconds = {} must be finite and >= 0",
                rl.min_interval_seconds
            ));
        }

        let r = &self.retry;
        check_positive_secs(r.backoff_base_seconds, "retry.backoff_base_seconds", &mut errors);
        check_positive_secs(r.backoff_cap_seconds, "retry.backoff_cap_seconds", &mut errors);

        if self.cache.enabled && self.cache.backend == CacheBackend::Sled {
            if let Err(reason) = crate::storage::validate_namespace(&self.cache.namespace) {
                errors.push(format!("cache.namespace: {reason}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

fn check_positive_secs(value: f64, name: &str, errors: &mut Vec<String>) {
    // NaN comparisons silently pass, so check finiteness first
    if !value.is_finite() || value <= 0.0 {
        errors.push(format!("{name} = {value} must be finite and > 0"));
    }
}

// ============================================================================
// Error Type
// ============================================================================

/// Invalid or unreadable configuration. Raised when components are built,
/// never while a call is in progress.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Config parse error ({}): {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Cache setup failed: {0}")]
    Cache(#[from] crate::storage::CacheError),
}

impl ConfigError {
    /// Shorthand for a single validation failure.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }
}

// ============================================================================
// Rate Limit
// ============================================================================

/// Sliding-window quota shared by every external call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum calls counted as starting within one window
    #[serde(default = "default_quota")]
    pub quota: usize,

    /// Window length in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Minimum gap between consecutive calls in seconds (0 = no spacing)
    #[serde(default = "default_min_interval")]
    pub min_interval_seconds: f64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn min_interval(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.min_interval_seconds)
            .ok()
            .filter(|d| !d.is_zero())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            quota: default_quota(),
            window_seconds: default_window_seconds(),
            min_interval_seconds: default_min_interval(),
        }
    }
}

const fn default_quota() -> usize {
    defaults::RATE_LIMIT_QUOTA
}
const fn default_window_seconds() -> u64 {
    defaults::RATE_LIMIT_WINDOW_SECS
}
const fn default_min_interval() -> f64 {
    defaults::RATE_LIMIT_MIN_INTERVAL_SECS
}

// ============================================================================
// Cache
// ============================================================================

/// Storage backend for cached responses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Durable sled database under `cache.dir`
    #[default]
    Sled,
    /// Process-local map, lost on exit
    Memory,
}

/// Response cache location and lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Disable to always call the service
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub backend: CacheBackend,

    /// Directory holding the sled database
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Subdirectory of `dir` holding this namespace's database
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Entry lifetime in seconds. 0 disables lookups and stores.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::default(),
            dir: default_cache_dir(),
            namespace: default_namespace(),
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

const fn default_true() -> bool {
    true
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from(defaults::CACHE_DIR)
}
fn default_namespace() -> String {
    defaults::CACHE_NAMESPACE.to_string()
}
const fn default_ttl_seconds() -> u64 {
    defaults::CACHE_TTL_SECS
}

// ============================================================================
// Retry
// ============================================================================

/// Exponential backoff applied to throttling responses only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubled per attempt
    #[serde(default = "default_backoff_base")]
    pub backoff_base_seconds: f64,

    /// Ceiling on any computed delay
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_seconds: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_seconds: default_backoff_base(),
            backoff_cap_seconds: default_backoff_cap(),
        }
    }
}

const fn default_max_retries() -> u32 {
    defaults::RETRY_MAX_RETRIES
}
const fn default_backoff_base() -> f64 {
    defaults::RETRY_BACKOFF_BASE_SECS
}
const fn default_backoff_cap() -> f64 {
    defaults::RETRY_BACKOFF_CAP_SECS
}

// ============================================================================
// Stages
// ============================================================================

/// Per-stage policy applied when the orchestrator is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StagesConfig {
    /// Stage names whose failure degrades the run instead of aborting it
    #[serde(default)]
    pub optional: Vec<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limit.quota, 5);
        assert_eq!(config.rate_limit.window_seconds, 60);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.cache.ttl_seconds, 3600);
        assert!(config.rate_limit.min_interval().is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
[rate_limit]
quota = 10

[stages]
optional = ["coverage_auditor"]
"#,
        )
        .unwrap();
        assert_eq!(config.rate_limit.quota, 10);
        assert_eq!(config.rate_limit.window_seconds, 60);
        assert_eq!(config.stages.optional, vec!["coverage_auditor".to_string()]);
        assert_eq!(config.cache.backend, CacheBackend::Sled);
    }

    #[test]
    fn test_zero_quota_rejected() {
        let result = PipelineConfig::from_toml_str("[rate_limit]\nquota = 0\n");
        match result {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.contains("rate_limit.quota")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = PipelineConfig::default();
        config.rate_limit.window_seconds = 0;
        config.retry.backoff_base_seconds = 0.0;
        config.retry.backoff_cap_seconds = f64::NAN;
        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation failure");
        };
        assert_eq!(errors.len(), 3, "errors: {errors:?}");
    }

    #[test]
    fn test_empty_namespace_only_matters_for_sled() {
        let mut config = PipelineConfig::default();
        config.cache.namespace = "  ".to_string();
        assert!(config.validate().is_err());

        config.cache.namespace = "../shared".to_string();
        assert!(config.validate().is_err());

        config.cache.backend = CacheBackend::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip_preserves_values() {
        let mut config = PipelineConfig::default();
        config.rate_limit.min_interval_seconds = 12.0;
        config.stages.optional.push("test_strategy".to_string());
        let text = config.to_toml().unwrap();
        let parsed = PipelineConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.rate_limit.min_interval(), Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_load_from_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = PipelineConfig::load_from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
