//! Call counters kept by the retrying caller.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lock-free counters updated on every call path.
#[derive(Debug, Default)]
pub struct CallMetrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    upstream_calls: AtomicU64,
    throttled_responses: AtomicU64,
    limiter_wait_ms: AtomicU64,
}

impl CallMetrics {
    pub(crate) fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_upstream_call(&self) {
        self.upstream_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_throttled(&self) {
        self.throttled_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wait(&self, waited: Duration) {
        let ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
        self.limiter_wait_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CallMetricsSnapshot {
        CallMetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            upstream_calls: self.upstream_calls.load(Ordering::Relaxed),
            throttled_responses: self.throttled_responses.load(Ordering::Relaxed),
            limiter_wait_ms: self.limiter_wait_ms.load(Ordering::Relaxed),
        }
    }
}

/// Routes each observation to the caller's totals and, when present, to
/// the tally of the run that issued the call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MetricsSink<'a> {
    shared: &'a CallMetrics,
    run: Option<&'a CallMetrics>,
}

impl<'a> MetricsSink<'a> {
    pub(crate) fn new(shared: &'a CallMetrics, run: Option<&'a CallMetrics>) -> Self {
        Self { shared, run }
    }

    fn each(&self, record: impl Fn(&CallMetrics)) {
        record(self.shared);
        if let Some(run) = self.run {
            record(run);
        }
    }

    pub(crate) fn hit(&self) {
        self.each(CallMetrics::record_hit);
    }

    pub(crate) fn miss(&self) {
        self.each(CallMetrics::record_miss);
    }

    pub(crate) fn upstream_call(&self) {
        self.each(CallMetrics::record_upstream_call);
    }

    pub(crate) fn throttled(&self) {
        self.each(CallMetrics::record_throttled);
    }

    pub(crate) fn wait(&self, waited: Duration) {
        self.each(|m| m.record_wait(waited));
    }
}

/// Point-in-time copy of [`CallMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub upstream_calls: u64,
    pub throttled_responses: u64,
    pub limiter_wait_ms: u64,
}

impl CallMetricsSnapshot {
    /// Counter growth between `earlier` and `self`.
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            cache_hits: self.cache_hits.saturating_sub(earlier.cache_hits),
            cache_misses: self.cache_misses.saturating_sub(earlier.cache_misses),
            upstream_calls: self.upstream_calls.saturating_sub(earlier.upstream_calls),
            throttled_responses: self
                .throttled_responses
                .saturating_sub(earlier.throttled_responses),
            limiter_wait_ms: self.limiter_wait_ms.saturating_sub(earlier.limiter_wait_ms),
        }
    }

    /// Fraction of cache lookups that hit; 0.0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}
