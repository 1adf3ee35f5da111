//! Pipeline run state: the typed record a run accumulates.
//!
//! Stage outputs form an append-only list keyed by stage name. Only the
//! orchestrator mutates a state; stages see it by shared reference.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::stage::StageError;
use crate::llm::CallMetricsSnapshot;

// ============================================================================
// Run Phase & Status
// ============================================================================

/// Where a run currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    Pending,
    Running { stage_index: usize, stage: String },
    Completed,
    CompletedWithDegradation,
    Failed,
}

/// User-visible outcome of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithDegradation,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::CompletedWithDegradation => write!(f, "completed with degradation"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ============================================================================
// Stage Records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    /// Optional stage failed; the run continued without its contribution
    Degraded,
    Failed,
}

/// Execution record for one stage that ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub index: usize,
    pub optional: bool,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageRecord {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// One stage's contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub stage: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("Stage '{0}' already committed an output")]
    DuplicateOutput(String),
}

// ============================================================================
// Pipeline State
// ============================================================================

/// Everything one run has produced so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    run_id: String,
    started_at: DateTime<Utc>,
    input: serde_json::Value,
    phase: RunPhase,
    outputs: Vec<StageOutput>,
    records: Vec<StageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metrics: Option<CallMetricsSnapshot>,
}

impl PipelineState {
    pub(crate) fn new(input: serde_json::Value) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            input,
            phase: RunPhase::Pending,
            outputs: Vec::new(),
            records: Vec::new(),
            total_duration_ms: None,
            metrics: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn input(&self) -> &serde_json::Value {
        &self.input
    }

    /// Deserialize the run input.
    pub fn input_as<T: DeserializeOwned>(&self) -> Result<T, StageError> {
        serde_json::from_value(self.input.clone())
            .map_err(|e| StageError::failed(format!("run input: {e}")))
    }

    pub fn phase(&self) -> &RunPhase {
        &self.phase
    }

    /// Final outcome, or `None` while the run is still in progress.
    pub fn status(&self) -> Option<RunStatus> {
        match self.phase {
            RunPhase::Completed => Some(RunStatus::Completed),
            RunPhase::CompletedWithDegradation => Some(RunStatus::CompletedWithDegradation),
            RunPhase::Failed => Some(RunStatus::Failed),
            RunPhase::Pending | RunPhase::Running { .. } => None,
        }
    }

    pub fn outputs(&self) -> &[StageOutput] {
        &self.outputs
    }

    /// Contribution of `stage`, if it ran and succeeded.
    pub fn output(&self, stage: &str) -> Option<&serde_json::Value> {
        self.outputs
            .iter()
            .find(|o| o.stage == stage)
            .map(|o| &o.value)
    }

    /// Deserialize a required earlier contribution.
    pub fn output_as<T: DeserializeOwned>(&self, stage: &str) -> Result<T, StageError> {
        let value = self
            .output(stage)
            .ok_or_else(|| StageError::failed(format!("no output from stage '{stage}'")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| StageError::failed(format!("output of '{stage}': {e}")))
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn record(&self, stage: &str) -> Option<&StageRecord> {
        self.records.iter().find(|r| r.name == stage)
    }

    /// Names of the optional stages that failed, in run order.
    pub fn degraded_stages(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.status == StageStatus::Degraded)
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn is_degraded(&self) -> bool {
        self.records.iter().any(|r| r.status == StageStatus::Degraded)
    }

    pub fn total_duration(&self) -> Option<Duration> {
        self.total_duration_ms.map(Duration::from_millis)
    }

    /// Call counters accumulated during this run.
    pub fn metrics(&self) -> Option<&CallMetricsSnapshot> {
        self.metrics.as_ref()
    }

    // ------------------------------------------------------------------------
    // Orchestrator-only mutators
    // ------------------------------------------------------------------------

    pub(crate) fn set_phase(&mut self, phase: RunPhase) {
        self.phase = phase;
    }

    pub(crate) fn commit_output(
        &mut self,
        stage: &str,
        value: serde_json::Value,
    ) -> Result<(), StateError> {
        if self.output(stage).is_some() {
            return Err(StateError::DuplicateOutput(stage.to_string()));
        }
        self.outputs.push(StageOutput {
            stage: stage.to_string(),
            value,
        });
        Ok(())
    }

    pub(crate) fn push_record(&mut self, record: StageRecord) {
        self.records.push(record);
    }

    pub(crate) fn finish(&mut self, phase: RunPhase, elapsed: Duration, metrics: CallMetricsSnapshot) {
        self.phase = phase;
        self.total_duration_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        self.metrics = Some(metrics);
    }
}
