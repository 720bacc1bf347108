// src/ledger/model.rs

//! Persisted ledger document.
//!
//! ```json
//! {
//!   "wave": "wave_b",
//!   "manifest_digest": "…",
//!   "updated_at": "2026-01-05T10:00:00Z",
//!   "run_state": "running",
//!   "tasks": [
//!     { "id": "WB01", "status": "running", "reason": null,
//!       "attempts": [{ "attempt_number": 1, "started_at": "…",
//!                      "finished_at": null, "outcome": null,
//!                      "evidence": "", "failure_kind": null,
//!                      "profile": { "model": "m", "reasoning": "low" } }],
//!       "quota": { "failure_count": 0, "cooldown_until": null },
//!       "escalation": { "profile_index": 0, "compile_streak": 0, "runtime_streak": 0 },
//!       "last_touched_files": [] }
//!   ]
//! }
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::RunState;
use crate::escalation::{EscalationState, ModelProfile};
use crate::exec::FailureKind;
use crate::manifest::TaskId;
use crate::quota::QuotaState;

/// Lifecycle status. Exactly one per task at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Ready,
    Running,
    Completed,
    Blocked,
    Rejected,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Ready,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Blocked,
        TaskStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task is `blocked` or `rejected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusReason {
    /// Some `depends_on` entry is not `completed` yet. The only promotable
    /// kind of `blocked`.
    AwaitingDependencies,
    /// A transitive prerequisite was rejected or blocked and can never
    /// complete in this run.
    DependencyFailed { dependency: TaskId },
    /// The agent reported an in-scope inability to proceed.
    ReportedBlocked,
    /// Failure quota reached.
    QuotaExhausted { failures: u32 },
}

impl fmt::Display for StatusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusReason::AwaitingDependencies => f.write_str("awaiting dependencies"),
            StatusReason::DependencyFailed { dependency } => {
                write!(f, "dependency {dependency} can no longer complete")
            }
            StatusReason::ReportedBlocked => f.write_str("agent reported blocked"),
            StatusReason::QuotaExhausted { failures } => {
                write!(f, "failure quota exhausted after {failures} failed attempts")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Completed,
    Blocked,
    Error,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttemptOutcome::Completed => "completed",
            AttemptOutcome::Blocked => "blocked",
            AttemptOutcome::Error => "error",
        };
        f.write_str(s)
    }
}

/// One execution try. Open (no `finished_at`) while the task is running;
/// never changed once finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outcome: Option<AttemptOutcome>,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub failure_kind: Option<FailureKind>,
    /// Profile the attempt was rendered with, when a ladder is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ModelProfile>,
}

impl Attempt {
    pub fn is_open(&self) -> bool {
        self.finished_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub status: TaskStatus,
    #[serde(default)]
    pub reason: Option<StatusReason>,
    #[serde(default)]
    pub attempts: Vec<Attempt>,
    #[serde(default)]
    pub quota: QuotaState,
    #[serde(default)]
    pub escalation: EscalationState,
    #[serde(default)]
    pub last_touched_files: Vec<String>,
}

impl TaskRecord {
    pub(crate) fn seeded(id: TaskId, has_dependencies: bool) -> Self {
        let (status, reason) = if has_dependencies {
            (TaskStatus::Blocked, Some(StatusReason::AwaitingDependencies))
        } else {
            (TaskStatus::Ready, None)
        };
        Self {
            id,
            status,
            reason,
            attempts: Vec::new(),
            quota: QuotaState::default(),
            escalation: EscalationState::default(),
            last_touched_files: Vec::new(),
        }
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    pub fn last_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    /// Evidence of the most recent finished attempt.
    pub fn last_evidence(&self) -> Option<&str> {
        self.attempts
            .iter()
            .rev()
            .find(|a| !a.is_open())
            .map(|a| a.evidence.as_str())
    }

    pub fn is_awaiting_dependencies(&self) -> bool {
        self.status == TaskStatus::Blocked
            && matches!(self.reason, Some(StatusReason::AwaitingDependencies))
    }
}

/// Full ledger snapshot; also the persisted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    #[serde(default)]
    pub wave: String,
    #[serde(default)]
    pub manifest_digest: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub run_state: RunState,
    /// Task records in manifest order.
    pub tasks: Vec<TaskRecord>,
}

impl LedgerState {
    pub fn task(&self, id: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub(crate) fn task_mut(&mut self, id: &str) -> Option<&mut TaskRecord> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.task(id).map(|t| t.status)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn ids_with_status(&self, status: TaskStatus) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn all_completed(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Completed)
    }
}
