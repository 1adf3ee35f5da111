//! Orchestrator - ordered stage execution with a failure policy
//!
//! Runs a fixed list of stages strictly in order. Each stage reads the state
//! accumulated so far and returns its contribution, which the orchestrator
//! commits before moving on.
//!
//! ## Failure Policy
//!
//! - **Required stage fails**: the run aborts with [`PipelineFailure`];
//!   later stages never run. The partial state travels with the failure.
//! - **Optional stage fails**: the failure is recorded as degraded and the
//!   run continues, ending `CompletedWithDegradation`.
//! - **Cancellation**: checked between stages and inside every call; a
//!   canceled run always fails, whatever stage it was in.
//!
//! There are no orchestrator-level retries. Retrying is the caller's job.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stage::{Stage, StageContext, StageError};
use super::state::{PipelineState, RunPhase, StageRecord, StageStatus};
use crate::config::ConfigError;
use crate::llm::{CallError, CallMetrics, RetryingCaller};

/// Progress hook invoked after every stage that ran.
pub type StageHook = Box<dyn Fn(&StageRecord) + Send + Sync>;

// ============================================================================
// Failure Types
// ============================================================================

/// Normalized reason a run failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The service kept throttling past the retry budget
    Throttled { attempts: u32, message: String },
    /// The service returned a non-throttling error
    Upstream { message: String },
    /// The stage's own logic failed
    Stage { message: String },
    Canceled,
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Throttled { attempts, message } => {
                write!(f, "throttled after {attempts} attempts: {message}")
            }
            Self::Upstream { message } => write!(f, "upstream error: {message}"),
            Self::Stage { message } => write!(f, "{message}"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl From<StageError> for FailureCause {
    fn from(e: StageError) -> Self {
        match e {
            StageError::Call(CallError::ThrottledExhausted {
                attempts,
                last_message,
            }) => Self::Throttled {
                attempts,
                message: last_message,
            },
            StageError::Call(CallError::Upstream { message }) => Self::Upstream { message },
            StageError::Call(CallError::Canceled) | StageError::Canceled => Self::Canceled,
            StageError::Failed(message) => Self::Stage { message },
        }
    }
}

/// A run that ended `Failed`, with the partial state for auditing.
#[derive(Debug, thiserror::Error)]
#[error("Pipeline failed at stage {stage_index} '{failed_stage}': {cause}")]
pub struct PipelineFailure {
    pub failed_stage: String,
    pub stage_index: usize,
    pub cause: FailureCause,
    pub state: Box<PipelineState>,
}

// ============================================================================
// Builder
// ============================================================================

struct StageSlot {
    stage: Box<dyn Stage>,
    optional: bool,
}

/// Assembles an [`Orchestrator`]; see [`Orchestrator::builder`].
pub struct OrchestratorBuilder {
    caller: Arc<RetryingCaller>,
    slots: Vec<StageSlot>,
    optional_names: Vec<String>,
    hooks: Vec<StageHook>,
}

impl OrchestratorBuilder {
    /// Append a required stage.
    #[must_use]
    pub fn stage(self, stage: impl Stage + 'static) -> Self {
        self.boxed_stage(Box::new(stage), false)
    }

    /// Append a stage whose failure only degrades the run.
    #[must_use]
    pub fn optional_stage(self, stage: impl Stage + 'static) -> Self {
        self.boxed_stage(Box::new(stage), true)
    }

    #[must_use]
    pub fn boxed_stage(mut self, stage: Box<dyn Stage>, optional: bool) -> Self {
        self.slots.push(StageSlot { stage, optional });
        self
    }

    /// Mark stages optional by name (the `[stages] optional` config list).
    #[must_use]
    pub fn optional_from_config(mut self, names: &[String]) -> Self {
        self.optional_names.extend(names.iter().cloned());
        self
    }

    /// Install a progress hook, called after each stage with its record.
    #[must_use]
    pub fn on_stage_complete(mut self, hook: impl Fn(&StageRecord) + Send + Sync + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Validate the stage list and build the orchestrator.
    ///
    /// Rejects an empty pipeline, duplicate stage names and optional names
    /// that match no stage.
    pub fn build(mut self) -> Result<Orchestrator, ConfigError> {
        let mut errors = Vec::new();
        if self.slots.is_empty() {
            errors.push("pipeline has no stages".to_string());
        }

        let mut seen = HashSet::new();
        for slot in &self.slots {
            let name = slot.stage.name();
            if name.trim().is_empty() {
                errors.push("stage name must not be empty".to_string());
            } else if !seen.insert(name.to_string()) {
                errors.push(format!("duplicate stage name '{name}'"));
            }
        }

        for name in &self.optional_names {
            if !seen.contains(name) {
                errors.push(format!("optional stage '{name}' matches no stage"));
            }
        }

        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }

        let optional: HashSet<String> = self.optional_names.drain(..).collect();
        for slot in &mut self.slots {
            if optional.contains(slot.stage.name()) {
                slot.optional = true;
            }
        }

        info!(
            stages = self.slots.len(),
            optional = self.slots.iter().filter(|s| s.optional).count(),
            "Pipeline assembled"
        );

        Ok(Orchestrator {
            caller: self.caller,
            slots: self.slots,
            hooks: self.hooks,
            runs_completed: 0,
        })
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs an ordered list of stages against one shared caller.
pub struct Orchestrator {
    caller: Arc<RetryingCaller>,
    slots: Vec<StageSlot>,
    hooks: Vec<StageHook>,
    runs_completed: u64,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("stages", &self.stage_names())
            .field("runs_completed", &self.runs_completed)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn builder(caller: Arc<RetryingCaller>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            caller,
            slots: Vec::new(),
            optional_names: Vec::new(),
            hooks: Vec::new(),
        }
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.stage.name()).collect()
    }

    pub fn is_optional(&self, stage: &str) -> bool {
        self.slots
            .iter()
            .any(|s| s.optional && s.stage.name() == stage)
    }

    pub fn caller(&self) -> &Arc<RetryingCaller> {
        &self.caller
    }

    /// Runs that finished without failing, degraded runs included.
    pub fn runs_completed(&self) -> u64 {
        self.runs_completed
    }

    /// Render the stage order as a text diagram.
    pub fn describe(&self) -> String {
        let mut out = String::from("input\n");
        for (i, slot) in self.slots.iter().enumerate() {
            let tag = if slot.optional { " (optional)" } else { "" };
            out.push_str(&format!("  |\n  v\n[{}] {}{}\n", i + 1, slot.stage.name(), tag));
        }
        out.push_str("  |\n  v\noutput\n");
        out
    }

    pub async fn run(&mut self, input: serde_json::Value) -> Result<PipelineState, PipelineFailure> {
        self.run_with_cancel(input, CancellationToken::new()).await
    }

    /// Execute every stage in order, honoring `cancel`.
    pub async fn run_with_cancel(
        &mut self,
        input: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<PipelineState, PipelineFailure> {
        let mut state = PipelineState::new(input);
        let run_started = Instant::now();
        let run_metrics = Arc::new(CallMetrics::default());

        info!(run_id = state.run_id(), stages = self.slots.len(), "Pipeline run started");

        for (index, slot) in self.slots.iter().enumerate() {
            let name = slot.stage.name();

            if cancel.is_cancelled() {
                warn!(run_id = state.run_id(), stage = name, "Run canceled before stage");
                return Err(self.fail(state, index, name, FailureCause::Canceled, run_started, &run_metrics));
            }

            state.set_phase(RunPhase::Running {
                stage_index: index,
                stage: name.to_string(),
            });
            debug!(run_id = state.run_id(), stage = name, index, "Stage started");

            let ctx = StageContext::new(
                Arc::clone(&self.caller),
                cancel.clone(),
                Arc::clone(&run_metrics),
                state.run_id(),
                name,
            );
            let started_at = chrono::Utc::now();
            let stage_started = Instant::now();

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(StageError::Canceled),
                result = slot.stage.execute(&state, &ctx) => result,
            };
            let elapsed = stage_started.elapsed();
            let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

            // A stage may finish after the token fired, e.g. from cache hits or by
            // swallowing a canceled call; its contribution is not committed.
            let result = if cancel.is_cancelled() {
                Err(StageError::Canceled)
            } else {
                result
            };
            let result = result.and_then(|value| {
                state
                    .commit_output(name, value)
                    .map_err(|e| StageError::failed(e.to_string()))
            });

            let mut record = StageRecord {
                name: name.to_string(),
                index,
                optional: slot.optional,
                status: StageStatus::Succeeded,
                started_at,
                duration_ms,
                error: None,
            };

            match result {
                Ok(()) => {
                    info!(run_id = state.run_id(), stage = name, duration_ms, "Stage completed");
                    state.push_record(record.clone());
                    self.notify(&record);
                }
                Err(e) if slot.optional && !e.is_canceled() => {
                    warn!(
                        run_id = state.run_id(),
                        stage = name,
                        duration_ms,
                        error = %e,
                        "Optional stage failed, continuing degraded"
                    );
                    record.status = StageStatus::Degraded;
                    record.error = Some(e.to_string());
                    state.push_record(record.clone());
                    self.notify(&record);
                }
                Err(e) => {
                    warn!(
                        run_id = state.run_id(),
                        stage = name,
                        duration_ms,
                        error = %e,
                        "Stage failed, aborting run"
                    );
                    record.status = StageStatus::Failed;
                    record.error = Some(e.to_string());
                    state.push_record(record.clone());
                    self.notify(&record);
                    return Err(self.fail(state, index, name, e.into(), run_started, &run_metrics));
                }
            }
        }

        let phase = if state.is_degraded() {
            RunPhase::CompletedWithDegradation
        } else {
            RunPhase::Completed
        };
        let metrics = run_metrics.snapshot();
        state.finish(phase, run_started.elapsed(), metrics);
        self.runs_completed += 1;

        info!(
            run_id = state.run_id(),
            status = ?state.status(),
            degraded = ?state.degraded_stages(),
            duration_ms = state.total_duration().map_or(0, |d| d.as_millis() as u64),
            cache_hits = metrics.cache_hits,
            upstream_calls = metrics.upstream_calls,
            "Pipeline run finished"
        );
        Ok(state)
    }

    fn notify(&self, record: &StageRecord) {
        for hook in &self.hooks {
            hook(record);
        }
    }

    fn fail(
        &self,
        mut state: PipelineState,
        stage_index: usize,
        stage: &str,
        cause: FailureCause,
        run_started: Instant,
        run_metrics: &CallMetrics,
    ) -> PipelineFailure {
        let metrics = run_metrics.snapshot();
        state.finish(RunPhase::Failed, run_started.elapsed(), metrics);
        PipelineFailure {
            failed_stage: stage.to_string(),
            stage_index,
            cause,
            state: Box::new(state),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerativeService, RetryPolicy, ServiceError, SlidingWindowLimiter};
    use crate::pipeline::RunStatus;
    use crate::storage::{InMemoryResponseCache, ResponseCache};
    use crate::types::CallRequest;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use std::time::Duration;

    struct EchoService;

    #[async_trait]
    impl GenerativeService for EchoService {
        async fn invoke(&self, request: &CallRequest) -> Result<String, ServiceError> {
            Ok(format!("echo: {}", request.prompt))
        }
    }

    struct FailingService;

    #[async_trait]
    impl GenerativeService for FailingService {
        async fn invoke(&self, _request: &CallRequest) -> Result<String, ServiceError> {
            Err(ServiceError::service("model not found"))
        }
    }

    /// Sleeps `delay`, then appends its name to a shared log.
    struct Step {
        name: &'static str,
        delay: Duration,
        fail: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Stage for Step {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, _state: &PipelineState, _ctx: &StageContext) -> Result<Value, StageError> {
            tokio::time::sleep(self.delay).await;
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                Err(StageError::failed(format!("{} exploded", self.name)))
            } else {
                Ok(json!({ "by": self.name }))
            }
        }
    }

    /// Issues one external call with the run input as prompt.
    struct CallingStage(&'static str);

    #[async_trait]
    impl Stage for CallingStage {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(&self, state: &PipelineState, ctx: &StageContext) -> Result<Value, StageError> {
            let prompt: String = state.input_as()?;
            let reply = ctx.call(&CallRequest::new("test", "m", prompt)).await?;
            Ok(Value::String(reply))
        }
    }

    /// Repeats the run input call, cancels the run, then calls once more.
    struct CancelMidStage {
        name: &'static str,
        swallow: bool,
    }

    #[async_trait]
    impl Stage for CancelMidStage {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, state: &PipelineState, ctx: &StageContext) -> Result<Value, StageError> {
            let request = CallRequest::new("test", "m", state.input_as::<String>()?);
            let first = ctx.call(&request).await?;
            ctx.cancellation_token().cancel();
            match ctx.call(&request).await {
                Ok(second) => Ok(json!([first, second])),
                Err(_) if self.swallow => Ok(json!([first])),
                Err(e) => Err(e.into()),
            }
        }
    }

    struct SlowEcho;

    #[async_trait]
    impl GenerativeService for SlowEcho {
        async fn invoke(&self, request: &CallRequest) -> Result<String, ServiceError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(format!("echo: {}", request.prompt))
        }
    }

    fn caller_with(service: Arc<dyn GenerativeService>) -> Arc<RetryingCaller> {
        let limiter = Arc::new(SlidingWindowLimiter::new(100, Duration::from_secs(60)).unwrap());
        let cache: Arc<dyn ResponseCache> = Arc::new(InMemoryResponseCache::new());
        Arc::new(RetryingCaller::new(service, limiter, Some(cache), RetryPolicy::default()))
    }

    fn step(name: &'static str, delay_ms: u64, fail: bool, log: &Arc<Mutex<Vec<&'static str>>>) -> Step {
        Step {
            name,
            delay: Duration::from_millis(delay_ms),
            fail,
            log: Arc::clone(log),
        }
    }

    fn five_stage(fail_at: Option<usize>, optional: &[&str]) -> (Orchestrator, Arc<Mutex<Vec<&'static str>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let names = ["s1", "s2", "s3", "s4", "s5"];
        let mut builder = Orchestrator::builder(caller_with(Arc::new(EchoService)));
        for (i, name) in names.into_iter().enumerate() {
            builder = builder.stage(step(name, 10, fail_at == Some(i), &log));
        }
        let optional: Vec<String> = optional.iter().map(|s| (*s).to_string()).collect();
        (builder.optional_from_config(&optional).build().unwrap(), log)
    }

    #[tokio::test(start_paused = true)]
    async fn test_stages_run_in_declared_order_regardless_of_duration() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut orch = Orchestrator::builder(caller_with(Arc::new(EchoService)))
            .stage(step("slow", 500, false, &log))
            .stage(step("fast", 1, false, &log))
            .stage(step("medium", 50, false, &log))
            .build()
            .unwrap();

        let state = orch.run(json!("ticket")).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["slow", "fast", "medium"]);
        let committed: Vec<&str> = state.outputs().iter().map(|o| o.stage.as_str()).collect();
        assert_eq!(committed, vec!["slow", "fast", "medium"]);
        assert_eq!(state.status(), Some(RunStatus::Completed));
        assert!(state.record("slow").unwrap().duration_ms >= 500);
        assert_eq!(orch.runs_completed(), 1);
    }

    #[tokio::test]
    async fn test_optional_failure_degrades_and_continues() {
        let (mut orch, log) = five_stage(Some(2), &["s3"]);

        let state = orch.run(json!({})).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["s1", "s2", "s3", "s4", "s5"]);
        assert_eq!(state.status(), Some(RunStatus::CompletedWithDegradation));
        assert_eq!(state.degraded_stages(), vec!["s3"]);
        assert!(state.output("s3").is_none());
        assert!(state.output("s5").is_some());
        assert_eq!(
            state.record("s3").unwrap().error.as_deref(),
            Some("s3 exploded")
        );
    }

    #[tokio::test]
    async fn test_required_failure_aborts_remaining_stages() {
        let (mut orch, log) = five_stage(Some(1), &[]);

        let failure = orch.run(json!({})).await.unwrap_err();

        assert_eq!(*log.lock().unwrap(), vec!["s1", "s2"]);
        assert_eq!(failure.failed_stage, "s2");
        assert_eq!(failure.stage_index, 1);
        assert_eq!(
            failure.cause,
            FailureCause::Stage {
                message: "s2 exploded".into()
            }
        );
        assert_eq!(failure.state.status(), Some(RunStatus::Failed));
        assert_eq!(failure.state.outputs().len(), 1);
        assert!(failure.state.record("s3").is_none());
    }

    #[tokio::test]
    async fn test_upstream_error_maps_to_failure_cause() {
        let mut orch = Orchestrator::builder(caller_with(Arc::new(FailingService)))
            .stage(CallingStage("reader"))
            .build()
            .unwrap();

        let failure = orch.run(json!("hello")).await.unwrap_err();

        assert_eq!(
            failure.cause,
            FailureCause::Upstream {
                message: "model not found".into()
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_before_run_fails_first_stage() {
        let (mut orch, log) = five_stage(None, &[]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let failure = orch.run_with_cancel(json!({}), cancel).await.unwrap_err();

        assert_eq!(failure.cause, FailureCause::Canceled);
        assert_eq!(failure.stage_index, 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_stage_fails_even_when_optional() {
        let (mut orch, log) = five_stage(None, &["s2"]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            trigger.cancel();
        });

        let failure = orch.run_with_cancel(json!({}), cancel).await.unwrap_err();

        assert_eq!(failure.cause, FailureCause::Canceled);
        assert_eq!(failure.failed_stage, "s2");
        assert_eq!(*log.lock().unwrap(), vec!["s1"]);
    }

    #[tokio::test]
    async fn test_hook_sees_every_stage_that_ran() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut orch = Orchestrator::builder(caller_with(Arc::new(EchoService)))
            .stage(step("a", 0, false, &log))
            .optional_stage(step("b", 0, true, &log))
            .stage(step("c", 0, false, &log))
            .on_stage_complete(move |r| sink.lock().unwrap().push((r.name.clone(), r.status)))
            .build()
            .unwrap();

        orch.run(json!({})).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("a".to_string(), StageStatus::Succeeded),
                ("b".to_string(), StageStatus::Degraded),
                ("c".to_string(), StageStatus::Succeeded),
            ]
        );
    }

    #[tokio::test]
    async fn test_run_metrics_cover_only_this_run() {
        let mut orch = Orchestrator::builder(caller_with(Arc::new(EchoService)))
            .stage(CallingStage("reader"))
            .build()
            .unwrap();

        let first = orch.run(json!("same prompt")).await.unwrap();
        let second = orch.run(json!("same prompt")).await.unwrap();

        assert_eq!(first.metrics().unwrap().upstream_calls, 1);
        let m = second.metrics().unwrap();
        assert_eq!((m.cache_hits, m.upstream_calls), (1, 0));
        assert_eq!(second.output("reader"), Some(&json!("echo: same prompt")));
        assert_ne!(first.run_id(), second.run_id());
    }

    #[tokio::test]
    async fn test_cancel_during_cached_calls_fails_run() {
        let mut orch = Orchestrator::builder(caller_with(Arc::new(EchoService)))
            .stage(CallingStage("reader"))
            .optional_stage(CancelMidStage { name: "auditor", swallow: false })
            .build()
            .unwrap();

        let failure = orch.run(json!("PROJ-11")).await.unwrap_err();

        assert_eq!(failure.cause, FailureCause::Canceled);
        assert_eq!(failure.failed_stage, "auditor");
        assert!(failure.state.output("auditor").is_none());
        assert_eq!(failure.state.metrics().unwrap().cache_hits, 1);
        assert_eq!(orch.runs_completed(), 0);
    }

    #[tokio::test]
    async fn test_stage_swallowing_cancellation_is_not_committed() {
        let mut orch = Orchestrator::builder(caller_with(Arc::new(EchoService)))
            .stage(CallingStage("reader"))
            .stage(CancelMidStage { name: "auditor", swallow: true })
            .build()
            .unwrap();

        let failure = orch.run(json!("PROJ-12")).await.unwrap_err();

        assert_eq!(failure.cause, FailureCause::Canceled);
        assert!(failure.state.output("auditor").is_none());
        assert_eq!(failure.state.record("auditor").unwrap().status, StageStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_runs_on_one_caller_keep_separate_metrics() {
        let caller = caller_with(Arc::new(SlowEcho));
        let mut first = Orchestrator::builder(Arc::clone(&caller))
            .stage(CallingStage("reader"))
            .build()
            .unwrap();
        let mut second = Orchestrator::builder(Arc::clone(&caller))
            .stage(CallingStage("reader"))
            .build()
            .unwrap();

        let (a, b) = tokio::join!(first.run(json!("ticket A")), second.run(json!("ticket B")));

        for state in [a.unwrap(), b.unwrap()] {
            let m = state.metrics().unwrap();
            assert_eq!((m.cache_misses, m.upstream_calls), (1, 1));
        }
        assert_eq!(caller.metrics().upstream_calls, 2);
    }

    #[test]
    fn test_build_rejects_bad_stage_lists() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let caller = caller_with(Arc::new(EchoService));

        assert!(Orchestrator::builder(Arc::clone(&caller)).build().is_err());

        let dup = Orchestrator::builder(Arc::clone(&caller))
            .stage(step("a", 0, false, &log))
            .stage(step("a", 0, false, &log))
            .build();
        assert!(matches!(dup, Err(ConfigError::Validation(e)) if e[0].contains("duplicate")));

        let unknown = Orchestrator::builder(caller)
            .stage(step("a", 0, false, &log))
            .optional_from_config(&["b".to_string()])
            .build();
        assert!(matches!(unknown, Err(ConfigError::Validation(e)) if e[0].contains("'b'")));
    }

    #[test]
    fn test_describe_lists_stages_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orch = Orchestrator::builder(caller_with(Arc::new(EchoService)))
            .stage(step("reader", 0, false, &log))
            .optional_stage(step("auditor", 0, false, &log))
            .build()
            .unwrap();

        let text = orch.describe();
        let reader = text.find("[1] reader").unwrap();
        let auditor = text.find("[2] auditor (optional)").unwrap();
        assert!(reader < auditor);
        assert!(orch.is_optional("auditor"));
        assert!(!orch.is_optional("reader"));
    }
}
