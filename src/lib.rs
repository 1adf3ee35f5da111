//! Ticketflow: quota-constrained staged inference
//!
//! Runs multi-stage analysis pipelines against a rate-limited generative
//! service without wasting quota.
//!
//! ## Architecture
//!
//! - **Rate Limiter**: sliding-window admission control shared by every call
//! - **Response Cache**: durable sled store keyed by request fingerprint, with TTL
//! - **Retrying Caller**: cache lookup, permit, invoke, backoff on throttling, store
//! - **Orchestrator**: ordered stages with optional-stage degradation and cancellation

pub mod config;
pub mod llm;
pub mod pipeline;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::{ConfigError, PipelineConfig};

// Re-export request types
pub use types::{CallFingerprint, CallRequest, DecodingParams};

// Re-export call layer
pub use llm::{
    CallError, CallMetricsSnapshot, GenerativeService, RetryPolicy, RetryingCaller, ServiceError,
    SlidingWindowLimiter,
};

// Re-export storage
pub use storage::{CacheEntry, CacheError, CacheStats, ResponseCache};

// Re-export pipeline
pub use pipeline::{
    FailureCause, Orchestrator, PipelineFailure, PipelineState, RunStatus, Stage, StageContext,
    StageError,
};
