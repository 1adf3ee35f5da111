//! Sliding-Window Rate Limiter
//!
//! Admits at most `quota` permits whose grant instants fall within any
//! trailing `window`. Callers that would exceed the quota wait until the
//! oldest recorded permit leaves the window.
//!
//! One limiter is shared (via `Arc`) by every call path that spends the
//! same external quota. The record deque sits behind a std `Mutex` that is
//! only held for the pure bookkeeping step and never across an `.await`.
//!
//! Time comes from `tokio::time::Instant`, so tests can drive the limiter
//! with a paused clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::{ConfigError, RateLimitConfig};

// ============================================================================
// Limiter State
// ============================================================================

#[derive(Debug, Default)]
struct WindowState {
    /// Grant instants still inside the window, oldest first
    records: VecDeque<Instant>,
    /// Most recent grant, kept even after it leaves the window
    last_grant: Option<Instant>,
}

impl WindowState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.records.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.records.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Counters exposed for logging and the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimiterStats {
    /// Permits handed out since construction (or the last reset)
    pub permits_granted: u64,
    /// Total time callers spent waiting in [`SlidingWindowLimiter::acquire`]
    pub total_wait: Duration,
}

// ============================================================================
// Sliding-Window Limiter
// ============================================================================

/// Quota-per-window admission control for external calls.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    quota: usize,
    window: Duration,
    min_interval: Option<Duration>,
    state: Mutex<WindowState>,
    permits_granted: AtomicU64,
    total_wait_micros: AtomicU64,
}

impl SlidingWindowLimiter {
    /// Create a limiter admitting `quota` permits per `window`.
    ///
    /// Both must be non-zero.
    pub fn new(quota: usize, window: Duration) -> Result<Self, ConfigError> {
        let mut errors = Vec::new();
        if quota == 0 {
            errors.push("rate limiter quota must be > 0".to_string());
        }
        if window.is_zero() {
            errors.push("rate limiter window must be > 0".to_string());
        }
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }

        Ok(Self {
            quota,
            window,
            min_interval: None,
            state: Mutex::new(WindowState::default()),
            permits_granted: AtomicU64::new(0),
            total_wait_micros: AtomicU64::new(0),
        })
    }

    /// Build from the `[rate_limit]` config section.
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, ConfigError> {
        let limiter = Self::new(config.quota, config.window())?;
        Ok(match config.min_interval() {
            Some(gap) => limiter.with_min_interval(gap),
            None => limiter,
        })
    }

    /// Additionally space consecutive grants at least `gap` apart.
    #[must_use]
    pub fn with_min_interval(mut self, gap: Duration) -> Self {
        self.min_interval = (!gap.is_zero()).then_some(gap);
        self
    }

    pub fn quota(&self) -> usize {
        self.quota
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn min_interval(&self) -> Option<Duration> {
        self.min_interval
    }

    fn lock_state(&self) -> MutexGuard<'_, WindowState> {
        // The state is valid after every mutation, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Grant a permit now if one is available.
    ///
    /// On refusal returns how long the caller must wait before a permit
    /// could be granted. The returned wait is always non-zero.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> Result<(), Duration> {
        let mut state = self.lock_state();
        state.prune(now, self.window);

        let mut wait = Duration::ZERO;
        if state.records.len() >= self.quota {
            if let Some(&oldest) = state.records.front() {
                wait = self.window.saturating_sub(now.saturating_duration_since(oldest));
            }
        }
        if let (Some(gap), Some(last)) = (self.min_interval, state.last_grant) {
            wait = wait.max(gap.saturating_sub(now.saturating_duration_since(last)));
        }

        if wait.is_zero() {
            state.records.push_back(now);
            state.last_grant = Some(now);
            self.permits_granted.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            Err(wait)
        }
    }

    /// Wait until a permit is granted and return the time spent waiting.
    ///
    /// Availability is re-checked after every sleep, so concurrent waiters
    /// racing for one freed slot never overshoot the quota. Dropping the
    /// future while it sleeps consumes no permit.
    pub async fn acquire(&self) -> Duration {
        let started = Instant::now();
        loop {
            match self.try_acquire() {
                Ok(()) => {
                    let waited = started.elapsed();
                    let micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
                    self.total_wait_micros.fetch_add(micros, Ordering::Relaxed);
                    trace!(waited_ms = waited.as_millis() as u64, "Permit granted");
                    return waited;
                }
                Err(wait) => {
                    debug!(
                        wait_ms = wait.as_millis() as u64,
                        quota = self.quota,
                        window_secs = self.window.as_secs(),
                        "Rate limit reached, waiting for window slot"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Permits that could be granted right now without waiting.
    pub fn remaining_capacity(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock_state();
        state.prune(now, self.window);
        let free = self.quota.saturating_sub(state.records.len());
        match (self.min_interval, state.last_grant) {
            (Some(gap), Some(last)) if now.saturating_duration_since(last) < gap => 0,
            _ => free,
        }
    }

    /// Forget every recorded permit and zero the counters.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        state.records.clear();
        state.last_grant = None;
        self.permits_granted.store(0, Ordering::Relaxed);
        self.total_wait_micros.store(0, Ordering::Relaxed);
        debug!("Rate limiter reset");
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            permits_granted: self.permits_granted.load(Ordering::Relaxed),
            total_wait: Duration::from_micros(self.total_wait_micros.load(Ordering::Relaxed)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_secs(60);

    /// Paused-clock sleeps may land on the next millisecond tick.
    fn assert_close(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual <= expected + Duration::from_millis(5),
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn test_zero_quota_or_window_rejected() {
        assert!(matches!(
            SlidingWindowLimiter::new(0, WINDOW),
            Err(ConfigError::Validation(_))
        ));
        match SlidingWindowLimiter::new(0, Duration::ZERO) {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_from_config_applies_min_interval() {
        let config = RateLimitConfig {
            quota: 3,
            window_seconds: 10,
            min_interval_seconds: 2.5,
        };
        let limiter = SlidingWindowLimiter::from_config(&config).unwrap();
        assert_eq!(limiter.quota(), 3);
        assert_eq!(limiter.window(), Duration::from_secs(10));
        assert_eq!(limiter.min_interval(), Some(Duration::from_millis(2500)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixth_call_waits_for_oldest_to_expire() {
        let limiter = SlidingWindowLimiter::new(5, WINDOW).unwrap();

        for _ in 0..5 {
            assert_eq!(limiter.acquire().await, Duration::ZERO);
        }
        assert_eq!(limiter.remaining_capacity(), 0);
        assert_eq!(limiter.try_acquire(), Err(WINDOW));

        let waited = limiter.acquire().await;
        assert_close(waited, WINDOW);

        let stats = limiter.stats();
        assert_eq!(stats.permits_granted, 6);
        assert_close(stats.total_wait, WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slots_free_as_records_age_out() {
        let limiter = SlidingWindowLimiter::new(2, WINDOW).unwrap();
        limiter.try_acquire().unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.try_acquire().unwrap();

        assert_eq!(limiter.try_acquire(), Err(Duration::from_secs(30)));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(limiter.remaining_capacity(), 1);
        assert!(limiter.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_spaces_consecutive_grants() {
        let limiter = SlidingWindowLimiter::new(10, WINDOW)
            .unwrap()
            .with_min_interval(Duration::from_secs(4));

        assert_eq!(limiter.acquire().await, Duration::ZERO);
        assert_eq!(limiter.remaining_capacity(), 0);
        assert_close(limiter.acquire().await, Duration::from_secs(4));
        assert_close(limiter.acquire().await, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_records_and_counters() {
        let limiter = SlidingWindowLimiter::new(1, WINDOW).unwrap();
        limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_err());

        limiter.reset();
        assert_eq!(limiter.remaining_capacity(), 1);
        assert_eq!(limiter.stats(), LimiterStats::default());
        assert!(limiter.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_never_exceed_quota_in_any_window() {
        const QUOTA: usize = 3;
        let limiter = Arc::new(SlidingWindowLimiter::new(QUOTA, WINDOW).unwrap());

        let handles: Vec<_> = (0..11)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut grants = Vec::new();
        for handle in handles {
            grants.push(handle.await.unwrap());
        }
        grants.sort();

        for pair in grants.windows(QUOTA + 1) {
            let span = pair[QUOTA].duration_since(pair[0]);
            assert!(span >= WINDOW, "{} grants within {span:?}", QUOTA + 1);
        }
        assert_eq!(limiter.stats().permits_granted, 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_waiter_consumes_no_permit() {
        let limiter = SlidingWindowLimiter::new(1, WINDOW).unwrap();
        limiter.try_acquire().unwrap();

        let timed_out =
            tokio::time::timeout(Duration::from_secs(5), limiter.acquire()).await;
        assert!(timed_out.is_err());
        assert_eq!(limiter.stats().permits_granted, 1);
    }
}
