//! Stage trait and the context handed to each stage.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::state::PipelineState;
use crate::llm::{CallError, CallMetrics, RetryingCaller};
use crate::types::CallRequest;

// ============================================================================
// Stage Error
// ============================================================================

/// Why a stage produced no contribution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    /// An external call the stage depended on failed.
    #[error(transparent)]
    Call(#[from] CallError),

    /// The stage's own logic failed (bad input, unparseable response, ...).
    #[error("{0}")]
    Failed(String),

    #[error("Stage canceled")]
    Canceled,
}

impl StageError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// True for every flavor of cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled | Self::Call(CallError::Canceled))
    }
}

impl From<serde_json::Error> for StageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Failed(format!("JSON error: {e}"))
    }
}

// ============================================================================
// Stage Trait
// ============================================================================

/// One named step of a pipeline.
///
/// A stage reads earlier contributions from the state it is given and
/// returns its own contribution; it never mutates the state.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Unique name within one pipeline; contributions are keyed by it.
    fn name(&self) -> &str;

    async fn execute(
        &self,
        state: &PipelineState,
        ctx: &StageContext,
    ) -> Result<serde_json::Value, StageError>;
}

// ============================================================================
// Stage Context
// ============================================================================

/// Call access for a running stage, bound to the run's cancellation token.
///
/// Calls made here are also counted in the run's own metrics, so runs that
/// share one caller do not see each other's calls.
#[derive(Debug, Clone)]
pub struct StageContext {
    caller: Arc<RetryingCaller>,
    cancel: CancellationToken,
    run_metrics: Arc<CallMetrics>,
    run_id: String,
    stage: String,
}

impl StageContext {
    pub(crate) fn new(
        caller: Arc<RetryingCaller>,
        cancel: CancellationToken,
        run_metrics: Arc<CallMetrics>,
        run_id: impl Into<String>,
        stage: impl Into<String>,
    ) -> Self {
        Self {
            caller,
            cancel,
            run_metrics,
            run_id: run_id.into(),
            stage: stage.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn stage_name(&self) -> &str {
        &self.stage
    }

    pub fn caller(&self) -> &RetryingCaller {
        &self.caller
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Call through the shared caller with its default cache TTL.
    pub async fn call(&self, request: &CallRequest) -> Result<String, CallError> {
        self.call_with_ttl(request, self.caller.default_ttl()).await
    }

    pub async fn call_with_ttl(
        &self,
        request: &CallRequest,
        ttl: Duration,
    ) -> Result<String, CallError> {
        let traced;
        let request = if request.trace_id.is_none() {
            traced = request.clone().with_trace_id(format!("{}/{}", self.run_id, self.stage));
            &traced
        } else {
            request
        };
        self.caller
            .call_observed(request, ttl, &self.cancel, Some(&self.run_metrics))
            .await
    }

    /// Issue independent calls concurrently; results keep request order.
    ///
    /// All calls share the same limiter, so concurrency never exceeds quota.
    pub async fn call_all(&self, requests: &[CallRequest]) -> Vec<Result<String, CallError>> {
        join_all(requests.iter().map(|r| self.call(r))).await
    }
}
