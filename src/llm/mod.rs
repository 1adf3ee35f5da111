//! External Call Layer
//!
//! Everything between a pipeline stage and the generative service:
//!
//! - **SlidingWindowLimiter**: shared quota-per-window admission control
//! - **GenerativeService**: provider adapter trait with throttling classification
//! - **RetryPolicy**: exponential backoff schedule for throttled calls
//! - **RetryingCaller**: cache lookup, limiter, invoke, backoff, store
//!
//! One limiter and one cache are shared by every call that spends the same
//! quota; both are built once and injected as `Arc`s.

pub mod caller;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;
pub mod service;

pub use caller::{CallError, RetryingCaller};
pub use metrics::{CallMetrics, CallMetricsSnapshot};
pub use rate_limiter::{LimiterStats, SlidingWindowLimiter};
pub use retry::RetryPolicy;
pub use service::{parse_retry_hint, GenerativeService, ServiceError};
