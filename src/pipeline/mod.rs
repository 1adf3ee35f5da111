//! Staged Processing Pipeline
//!
//! ```text
//! input ─▶ [stage 1] ─▶ [stage 2] ─▶ ... ─▶ [stage N] ─▶ PipelineState
//!              │            │                   │
//!              └────────────┴── StageContext::call ──▶ RetryingCaller
//! ```
//!
//! Stages run strictly in declared order. Each one reads the accumulated
//! [`PipelineState`] and returns a JSON contribution, committed under its
//! name. Required stages abort the run on failure; optional stages degrade it.

mod orchestrator;
mod stage;
mod state;

pub use orchestrator::{FailureCause, Orchestrator, OrchestratorBuilder, PipelineFailure, StageHook};
pub use stage::{Stage, StageContext, StageError};
pub use state::{
    PipelineState, RunPhase, RunStatus, StageOutput, StageRecord, StageStatus, StateError,
};
