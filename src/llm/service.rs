//! Generative service interface and upstream error classification.
//!
//! The pipeline never talks to a provider SDK directly. Each provider is
//! wrapped in a [`GenerativeService`] that reports failures as either
//! throttling (retryable) or a plain service error (not retried).

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

use crate::types::CallRequest;

// ============================================================================
// Service Error
// ============================================================================

/// Failure reported by the external service for a single invocation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    /// Quota or rate limit exceeded. `retry_after` is the service's own hint,
    /// if it gave one.
    #[error("Throttled by service: {message}")]
    Throttled {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Any other failure. Never retried.
    #[error("Service error: {message}")]
    Service { message: String },
}

impl ServiceError {
    /// Throttling error with the retry hint parsed out of the message.
    pub fn throttled(message: impl Into<String>) -> Self {
        let message = message.into();
        let retry_after = parse_retry_hint(&message);
        Self::Throttled {
            message,
            retry_after,
        }
    }

    pub fn service(message: impl Into<String>) -> Self {
        Self::Service {
            message: message.into(),
        }
    }

    /// Classify a raw provider error message.
    ///
    /// HTTP 429, quota exhaustion and explicit rate-limit wording count as
    /// throttling; everything else is a service error.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let throttled = lower.contains("429")
            || lower.contains("quota")
            || lower.contains("rate limit")
            || lower.contains("rate_limit")
            || lower.contains("resource_exhausted")
            || lower.contains("too many requests");
        if throttled {
            Self::throttled(message)
        } else {
            Self::Service { message }
        }
    }

    pub fn is_throttling(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Throttled { message, .. } | Self::Service { message } => message,
        }
    }
}

// ============================================================================
// Retry Hint Parsing
// ============================================================================

/// Patterns providers use to say how long to back off.
const RETRY_HINT_PATTERNS: &[&str] = &[
    // "Please retry in 17.5s"
    r"(?i)retry in (\d+(?:\.\d+)?)\s*s",
    // structured `retry_delay { seconds: 42 }`
    r"(?is)retry_delay.*?seconds:\s*(\d+)",
    // HTTP header echoed into the message
    r"(?i)retry-after:\s*(\d+(?:\.\d+)?)",
];

fn retry_hint_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RETRY_HINT_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// Extract the service's suggested retry delay from an error message.
///
/// Returns the first matching hint, in seconds. Unparseable or negative
/// values yield `None`.
pub fn parse_retry_hint(message: &str) -> Option<Duration> {
    retry_hint_patterns().iter().find_map(|re| {
        let secs: f64 = re.captures(message)?.get(1)?.as_str().parse().ok()?;
        Duration::try_from_secs_f64(secs).ok()
    })
}

// ============================================================================
// Service Trait
// ============================================================================

/// An external generative service invoked by the retrying caller.
#[async_trait]
pub trait GenerativeService: Send + Sync {
    /// Perform one upstream invocation.
    async fn invoke(&self, request: &CallRequest) -> Result<String, ServiceError>;

    /// Service name for logging
    fn service_name(&self) -> &str {
        "generative"
    }
}

// ============================================================================
// Tests
// ============================================================================
