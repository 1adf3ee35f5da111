//! Backoff schedule for throttled calls.

use std::time::Duration;

use crate::config::{defaults, ConfigError, RetryConfig};

/// Exponential backoff: the n-th retry (0-based) waits `min(base * 2^n, cap)`,
/// or the service's retry hint plus a small buffer when that is longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base: Duration,
    cap: Duration,
    hint_buffer: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration, cap: Duration) -> Result<Self, ConfigError> {
        let mut errors = Vec::new();
        if base.is_zero() {
            errors.push("retry backoff base must be > 0".to_string());
        }
        if cap.is_zero() {
            errors.push("retry backoff cap must be > 0".to_string());
        }
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }
        Ok(Self {
            max_retries,
            base,
            cap,
            hint_buffer: Duration::from_secs_f64(defaults::RETRY_HINT_BUFFER_SECS),
        })
    }

    /// Build from the `[retry]` config section.
    pub fn from_config(config: &RetryConfig) -> Result<Self, ConfigError> {
        let secs = |value: f64, name: &str| {
            Duration::try_from_secs_f64(value)
                .map_err(|_| ConfigError::invalid(format!("{name} = {value} is not a valid duration")))
        };
        Self::new(
            config.max_retries,
            secs(config.backoff_base_seconds, "retry.backoff_base_seconds")?,
            secs(config.backoff_cap_seconds, "retry.backoff_cap_seconds")?,
        )
    }

    /// Override the margin added to service-supplied retry hints.
    #[must_use]
    pub fn with_hint_buffer(mut self, buffer: Duration) -> Self {
        self.hint_buffer = buffer;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Upstream attempts allowed for one call, first attempt included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Computed backoff before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay before retry number `retry`, honoring the service's hint.
    pub fn delay_for(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let backoff = self.backoff(retry);
        match hint {
            Some(hint) => backoff.max(hint.saturating_add(self.hint_buffer)),
            None => backoff,
        }
    }

    /// Every computed backoff a fully throttled call would sleep through.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_retries).map(|n| self.backoff(n)).collect()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::RETRY_MAX_RETRIES,
            base: Duration::from_secs_f64(defaults::RETRY_BACKOFF_BASE_SECS),
            cap: Duration::from_secs_f64(defaults::RETRY_BACKOFF_CAP_SECS),
            hint_buffer: Duration::from_secs_f64(defaults::RETRY_HINT_BUFFER_SECS),
        }
    }
}
