//! System-wide default constants.
//!
//! Centralises the call-policy numbers so the config structs, the CLI and
//! the tests agree on them.

// ============================================================================
// Rate Limiting
// ============================================================================

/// Calls permitted per window. Matches the provider's free-tier quota.
pub const RATE_LIMIT_QUOTA: usize = 5;

/// Length of the trailing window in seconds.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Minimum spacing between consecutive calls (seconds). 0 disables spacing.
pub const RATE_LIMIT_MIN_INTERVAL_SECS: f64 = 0.0;

// ============================================================================
// Response Cache
// ============================================================================

/// Cache directory, relative to the working directory.
pub const CACHE_DIR: &str = ".api_cache";

/// Sled tree holding response entries.
pub const CACHE_NAMESPACE: &str = "responses";

/// Entry time-to-live (seconds). 3 600 = 1 hour.
pub const CACHE_TTL_SECS: u64 = 3_600;

// ============================================================================
// Retry / Backoff
// ============================================================================

/// Retries after the first attempt on a throttling response.
pub const RETRY_MAX_RETRIES: u32 = 3;

/// First backoff delay (seconds); doubled per attempt.
pub const RETRY_BACKOFF_BASE_SECS: f64 = 15.0;

/// Upper bound on a computed backoff delay (seconds).
pub const RETRY_BACKOFF_CAP_SECS: f64 = 60.0;

/// Padding added to a server-suggested retry delay (seconds).
pub const RETRY_HINT_BUFFER_SECS: f64 = 1.0;

// ============================================================================
// Configuration Discovery
// ============================================================================

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "TICKETFLOW_CONFIG";

/// Config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "ticketflow.toml";
