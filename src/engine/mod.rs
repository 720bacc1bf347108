// src/engine/mod.rs

//! Admission scheduler.
//!
//! - [`core`] is the synchronous, deterministic state machine: it computes
//!   the admissible set, dispatches into the ledger and absorbs completions.
//!   It has no channels, no Tokio types and performs no IO beyond the
//!   ledger's own persistence.
//! - [`runtime`] is the async shell: it spawns execution-adapter calls into
//!   a `JoinSet`, drains their completions one at a time and sleeps until
//!   the next cooldown expiry when nothing else can happen.
//! - [`plan`] renders the dry-run dispatch plan.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ExecutionError;
use crate::escalation::ModelProfile;
use crate::exec::AdapterOutcome;
use crate::manifest::TaskId;

pub mod core;
pub mod plan;
pub mod runtime;

pub use core::{CompletionStep, Scheduler};
pub use plan::{DryRunPlan, PlanRound};
pub use runtime::{RunReport, Runtime, RuntimeOptions};

/// Run-level state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Tasks are ready or running.
    #[default]
    Running,
    /// Fail-fast triggered; nothing new is dispatched.
    Halted,
    /// Nothing ready or running, and something is blocked or rejected.
    Drained,
    /// Every task completed.
    Done,
    /// Operator stopped the process; running tasks are resumed next time.
    Interrupted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Running => "running",
            RunState::Halted => "halted",
            RunState::Drained => "drained",
            RunState::Done => "done",
            RunState::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// A task the scheduler wants the execution adapter to run now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub task_id: TaskId,
    /// 1-based, monotonically increasing per task.
    pub attempt_number: u32,
    pub packet_ref: String,
    pub backlog_ref: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Rung of the model-profile ladder, when one is configured.
    pub profile: Option<ModelProfile>,
    /// Kind and evidence of the previous attempt, if it failed.
    pub previous_failure: Option<String>,
}

/// Events flowing into the runtime loop.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// An adapter call finished (or failed / timed out).
    AttemptFinished {
        task: TaskId,
        attempt_number: u32,
        result: Result<AdapterOutcome, ExecutionError>,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}
