//! Retrying Caller - cache, rate limit and backoff around one external call
//!
//! Every external call in the pipeline goes through [`RetryingCaller::call`]:
//!
//! 1. Fingerprint the request and look it up in the response cache.
//!    A hit returns immediately without touching the limiter or the network.
//! 2. On a miss, wait for a limiter permit and invoke the service.
//! 3. Throttling responses are retried with exponential backoff, each
//!    attempt re-acquiring a permit. Other service errors surface at once.
//! 4. A successful response is stored under the fingerprint.
//!
//! A zero TTL bypasses the cache in both directions.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::metrics::{CallMetrics, CallMetricsSnapshot, MetricsSink};
use super::rate_limiter::SlidingWindowLimiter;
use super::retry::RetryPolicy;
use super::service::{GenerativeService, ServiceError};
use crate::config::{ConfigError, PipelineConfig};
use crate::storage::{self, ResponseCache};
use crate::types::CallRequest;

// ============================================================================
// Call Error
// ============================================================================

/// Why a call produced no response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("Still throttled after {attempts} attempts: {last_message}")]
    ThrottledExhausted { attempts: u32, last_message: String },

    #[error("Upstream service error: {message}")]
    Upstream { message: String },

    #[error("Call canceled")]
    Canceled,
}

// ============================================================================
// Retrying Caller
// ============================================================================

/// Cache-first, quota-respecting, throttling-tolerant access to one service.
pub struct RetryingCaller {
    service: Arc<dyn GenerativeService>,
    limiter: Arc<SlidingWindowLimiter>,
    cache: Option<Arc<dyn ResponseCache>>,
    policy: RetryPolicy,
    default_ttl: Duration,
    metrics: CallMetrics,
}

impl std::fmt::Debug for RetryingCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingCaller")
            .field("service", &self.service.service_name())
            .field("limiter", &self.limiter)
            .field("cache", &self.cache.as_ref().map(|c| c.backend_name()))
            .field("policy", &self.policy)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl RetryingCaller {
    pub fn new(
        service: Arc<dyn GenerativeService>,
        limiter: Arc<SlidingWindowLimiter>,
        cache: Option<Arc<dyn ResponseCache>>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            service,
            limiter,
            cache,
            policy,
            default_ttl: Duration::from_secs(crate::config::defaults::CACHE_TTL_SECS),
            metrics: CallMetrics::default(),
        }
    }

    /// Build the limiter, cache and retry policy from a validated config.
    pub fn from_config(
        config: &PipelineConfig,
        service: Arc<dyn GenerativeService>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let limiter = Arc::new(SlidingWindowLimiter::from_config(&config.rate_limit)?);
        let cache = storage::open_from_config(&config.cache)?;
        let policy = RetryPolicy::from_config(&config.retry)?;

        info!(
            service = service.service_name(),
            quota = config.rate_limit.quota,
            window_secs = config.rate_limit.window_seconds,
            cache = cache.as_ref().map_or("disabled", |c| c.backend_name()),
            max_retries = policy.max_retries(),
            "Retrying caller ready"
        );

        Ok(Self::new(service, limiter, cache, policy).with_default_ttl(config.cache.ttl()))
    }

    /// TTL used by [`Self::call_default`] and by pipeline stages.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> Option<&Arc<dyn ResponseCache>> {
        self.cache.as_ref()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn metrics(&self) -> CallMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Call with the default TTL and no cancellation.
    pub async fn call_default(&self, request: &CallRequest) -> Result<String, CallError> {
        self.call(request, self.default_ttl).await
    }

    pub async fn call(&self, request: &CallRequest, ttl: Duration) -> Result<String, CallError> {
        self.call_with_cancel(request, ttl, &CancellationToken::new())
            .await
    }

    /// Perform one logical call, abandoning it when `cancel` fires.
    ///
    /// An already canceled token fails the call before the cache is consulted.
    /// A permit granted before cancellation stays counted by the limiter.
    pub async fn call_with_cancel(
        &self,
        request: &CallRequest,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, CallError> {
        self.call_observed(request, ttl, cancel, None).await
    }

    /// [`Self::call_with_cancel`], additionally counting into `run_metrics`.
    pub(crate) async fn call_observed(
        &self,
        request: &CallRequest,
        ttl: Duration,
        cancel: &CancellationToken,
        run_metrics: Option<&CallMetrics>,
    ) -> Result<String, CallError> {
        if cancel.is_cancelled() {
            return Err(CallError::Canceled);
        }

        let metrics = MetricsSink::new(&self.metrics, run_metrics);
        let fingerprint = request.fingerprint();
        let cache = self.cache.as_ref().filter(|_| !ttl.is_zero());

        if let Some(cache) = cache {
            match cache.lookup(&fingerprint) {
                Ok(Some(entry)) => {
                    metrics.hit();
                    debug!(
                        fingerprint = fingerprint.short(),
                        trace_id = request.trace_id.as_deref(),
                        "Cache hit"
                    );
                    return Ok(entry.response);
                }
                Ok(None) => metrics.miss(),
                Err(e) => {
                    metrics.miss();
                    warn!(fingerprint = fingerprint.short(), error = %e, "Cache read failed, treating as miss");
                }
            }
        }

        let mut retry: u32 = 0;
        loop {
            let waited = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CallError::Canceled),
                waited = self.limiter.acquire() => waited,
            };
            metrics.wait(waited);
            metrics.upstream_call();

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(fingerprint = fingerprint.short(), "Call canceled in flight");
                    return Err(CallError::Canceled);
                }
                outcome = self.service.invoke(request) => outcome,
            };

            match outcome {
                Ok(response) => {
                    if let Some(cache) = cache {
                        if let Err(e) = cache.store(&fingerprint, &response, ttl) {
                            warn!(fingerprint = fingerprint.short(), error = %e, "Failed to cache response");
                        }
                    }
                    debug!(
                        fingerprint = fingerprint.short(),
                        attempts = retry + 1,
                        waited_ms = waited.as_millis() as u64,
                        "Upstream call succeeded"
                    );
                    return Ok(response);
                }
                Err(ServiceError::Throttled {
                    message,
                    retry_after,
                }) => {
                    metrics.throttled();
                    if retry >= self.policy.max_retries() {
                        warn!(
                            fingerprint = fingerprint.short(),
                            attempts = retry + 1,
                            "Throttling persisted, giving up"
                        );
                        return Err(CallError::ThrottledExhausted {
                            attempts: retry + 1,
                            last_message: message,
                        });
                    }

                    let delay = self.policy.delay_for(retry, retry_after);
                    warn!(
                        fingerprint = fingerprint.short(),
                        retry = retry + 1,
                        max_retries = self.policy.max_retries(),
                        delay_secs = delay.as_secs_f64(),
                        "Throttled by service, backing off"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(CallError::Canceled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    retry += 1;
                }
                Err(ServiceError::Service { message }) => {
                    warn!(fingerprint = fingerprint.short(), error = %message, "Upstream call failed");
                    return Err(CallError::Upstream { message });
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
