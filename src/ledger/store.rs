// src/ledger/store.rs

//! Durable ledger with a single mutation entry point.
//!
//! Every call to [`Ledger::record_transition`] validates the transition,
//! applies it, and (for file-backed ledgers) writes the whole document
//! atomically before returning. The scheduler loop is the only caller, so
//! the file is never ahead of the work it describes.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dag::DagGraph;
use crate::engine::RunState;
use crate::errors::{Result, WaveError};
use crate::escalation::{EscalationState, ModelProfile};
use crate::exec::FailureKind;
use crate::ledger::events::{EventKind, EventLog, RunEvent};
use crate::ledger::model::{
    Attempt, AttemptOutcome, LedgerState, StatusReason, TaskRecord, TaskStatus,
};
use crate::manifest::Manifest;
use crate::quota::{QuotaPolicy, QuotaState};

const INTERRUPTED_EVIDENCE: &str =
    "interrupted before an outcome was recorded; previous process is not attached";

/// A state change for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// `blocked(awaiting dependencies)` -> `ready`.
    Promote,
    /// `ready` -> `running`; opens attempt `attempt_number`.
    Dispatch {
        attempt_number: u32,
        started_at: DateTime<Utc>,
        profile: Option<ModelProfile>,
    },
    /// `running` -> `status`; closes the open attempt.
    Finish(AttemptResult),
    /// `ready` / `blocked` -> `blocked` with a new reason.
    Block { reason: StatusReason },
}

/// Everything recorded when an attempt ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptResult {
    pub attempt_number: u32,
    pub finished_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub evidence: String,
    pub failure_kind: Option<FailureKind>,
    pub touched_files: Vec<String>,
    /// Task status after the attempt (`ready` for a retry).
    pub status: TaskStatus,
    pub reason: Option<StatusReason>,
    pub quota: QuotaState,
    pub escalation: EscalationState,
}

#[derive(Debug)]
pub struct Ledger {
    path: Option<PathBuf>,
    state: LedgerState,
    events: EventLog,
}

impl Ledger {
    /// Open the ledger for a run.
    ///
    /// - `resume = false`: any persisted ledger is discarded and statuses are
    ///   seeded from the graph (no dependencies → `ready`, otherwise
    ///   `blocked` awaiting dependencies).
    /// - `resume = true`: prior records are merged by task id; tasks left
    ///   `running` are demoted to `ready` (or `rejected` if their quota is
    ///   already exhausted).
    pub fn load(
        path: impl AsRef<Path>,
        resume: bool,
        manifest: &Manifest,
        graph: &DagGraph,
        quota: &QuotaPolicy,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut ledger = Self {
            path: Some(path.to_path_buf()),
            state: open_state(path, resume, manifest, graph, quota)?,
            events: EventLog::beside(path),
        };
        ledger.persist()?;
        Ok(ledger)
    }

    /// Same merge as [`Ledger::load`] without touching the file (dry-run).
    pub fn preview(
        path: impl AsRef<Path>,
        resume: bool,
        manifest: &Manifest,
        graph: &DagGraph,
        quota: &QuotaPolicy,
    ) -> Result<Self> {
        Ok(Self {
            path: None,
            state: open_state(path.as_ref(), resume, manifest, graph, quota)?,
            events: EventLog::disabled(),
        })
    }

    /// A fresh ledger that is never written to disk (dry-run and tests).
    pub fn in_memory(manifest: &Manifest, graph: &DagGraph) -> Self {
        Self {
            path: None,
            state: seed(manifest, graph, Utc::now()),
            events: EventLog::disabled(),
        }
    }

    /// An in-memory copy of an existing snapshot (dry-run planning).
    pub fn detached(state: LedgerState) -> Self {
        Self {
            path: None,
            state,
            events: EventLog::disabled(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// `events.jsonl` beside a file-backed ledger.
    pub fn events_path(&self) -> Option<&Path> {
        self.events.path()
    }

    /// Append an event that is not a status change (e.g. an escalation).
    pub fn emit(&self, event: &RunEvent) {
        self.events.emit(event);
    }

    /// Read-only view of the live state.
    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    /// Owned copy of the current state.
    pub fn snapshot(&self) -> LedgerState {
        self.state.clone()
    }

    pub fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.state.status_of(task_id)
    }

    /// Apply one transition and persist it before returning.
    pub fn record_transition(&mut self, task_id: &str, transition: Transition) -> Result<()> {
        let record = self
            .state
            .task_mut(task_id)
            .ok_or_else(|| WaveError::Ledger(format!("unknown task '{task_id}'")))?;

        let event = describe(task_id, &transition);
        apply(record, transition)?;
        debug!(
            task = %task_id,
            status = %record.status,
            reason = ?record.reason,
            attempts = record.attempts.len(),
            "ledger transition recorded"
        );
        self.persist()?;
        self.events.emit(&event);
        Ok(())
    }

    pub fn set_run_state(&mut self, run_state: RunState) -> Result<()> {
        if self.state.run_state == run_state {
            return Ok(());
        }
        self.state.run_state = run_state;
        self.persist()?;
        self.events.emit(
            &RunEvent::new(EventKind::RunState, None, format!("run {run_state}"))
                .with("run_state", run_state),
        );
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        self.state.updated_at = Utc::now();
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let mut buf = serde_json::to_string_pretty(&self.state)?;
        buf.push('\n');
        write_atomic(path, &buf)
    }
}

/// Read a persisted ledger without opening it for mutation.
pub fn read_snapshot(path: impl AsRef<Path>) -> Result<LedgerState> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        WaveError::Ledger(format!("read ledger {}: {e}", path.display()))
    })?;
    serde_json::from_str(&contents)
        .map_err(|e| WaveError::Ledger(format!("parse ledger {}: {e}", path.display())))
}

fn open_state(
    path: &Path,
    resume: bool,
    manifest: &Manifest,
    graph: &DagGraph,
    quota: &QuotaPolicy,
) -> Result<LedgerState> {
    let now = Utc::now();
    if resume && path.exists() {
        let prior = read_snapshot(path)?;
        info!(
            path = %path.display(),
            tasks = prior.tasks.len(),
            "resuming from existing ledger"
        );
        return Ok(merge_for_resume(prior, manifest, graph, quota, now));
    }

    if resume {
        info!(path = %path.display(), "no existing ledger; starting fresh");
    } else if path.exists() {
        info!(path = %path.display(), "discarding existing ledger (resume disabled)");
    }
    Ok(seed(manifest, graph, now))
}

fn apply(record: &mut TaskRecord, transition: Transition) -> Result<()> {
    let illegal = |what: &str, record: &TaskRecord| {
        WaveError::Ledger(format!(
            "illegal transition for task '{}': {what} from status {}",
            record.id, record.status
        ))
    };

    match transition {
        Transition::Promote => {
            if !record.is_awaiting_dependencies() {
                return Err(illegal("promote", record));
            }
            record.status = TaskStatus::Ready;
            record.reason = None;
        }
        Transition::Dispatch {
            attempt_number,
            started_at,
            profile,
        } => {
            if record.status != TaskStatus::Ready {
                return Err(illegal("dispatch", record));
            }
            let expected = record.attempts.len() as u32 + 1;
            if attempt_number != expected {
                return Err(WaveError::Ledger(format!(
                    "task '{}': attempt number {attempt_number} out of sequence (expected {expected})",
                    record.id
                )));
            }
            record.status = TaskStatus::Running;
            record.reason = None;
            record.attempts.push(Attempt {
                attempt_number,
                started_at,
                finished_at: None,
                outcome: None,
                evidence: String::new(),
                failure_kind: None,
                profile,
            });
        }
        Transition::Finish(result) => {
            if record.status != TaskStatus::Running {
                return Err(illegal("finish", record));
            }
            if result.status == TaskStatus::Running {
                return Err(illegal("finish into running", record));
            }
            let attempt = match record.attempts.last_mut() {
                Some(a) if a.is_open() && a.attempt_number == result.attempt_number => a,
                _ => {
                    return Err(WaveError::Ledger(format!(
                        "task '{}': no open attempt {}",
                        record.id, result.attempt_number
                    )));
                }
            };
            attempt.finished_at = Some(result.finished_at);
            attempt.outcome = Some(result.outcome);
            attempt.evidence = result.evidence;
            attempt.failure_kind = result.failure_kind;

            record.status = result.status;
            record.reason = result.reason;
            record.quota = result.quota;
            record.escalation = result.escalation;
            if !result.touched_files.is_empty() {
                record.last_touched_files = result.touched_files;
            }
        }
        Transition::Block { reason } => {
            if !matches!(record.status, TaskStatus::Ready | TaskStatus::Blocked) {
                return Err(illegal("block", record));
            }
            record.status = TaskStatus::Blocked;
            record.reason = Some(reason);
        }
    }
    Ok(())
}

/// Event-stream entry for a transition about to be applied.
fn describe(task_id: &str, transition: &Transition) -> RunEvent {
    let task = Some(task_id);
    match transition {
        Transition::Promote => RunEvent::new(
            EventKind::TaskPromoted,
            task,
            format!("{task_id} dependencies satisfied"),
        ),
        Transition::Dispatch {
            attempt_number,
            profile,
            ..
        } => {
            let on = profile.as_ref().map(|p| format!(" with {p}")).unwrap_or_default();
            RunEvent::new(
                EventKind::TaskLaunched,
                task,
                format!("{task_id} attempt {attempt_number} launched{on}"),
            )
            .with("attempt", attempt_number)
            .with("profile", profile)
        }
        Transition::Finish(result) => {
            let n = result.attempt_number;
            let (kind, message) = match result.status {
                TaskStatus::Completed => (EventKind::TaskCompleted, format!("{task_id} completed")),
                TaskStatus::Ready => (
                    EventKind::TaskRetry,
                    format!("{task_id} attempt {n} failed; retry scheduled"),
                ),
                TaskStatus::Rejected => (EventKind::TaskRejected, format!("{task_id} rejected")),
                TaskStatus::Blocked | TaskStatus::Running => {
                    (EventKind::TaskBlocked, format!("{task_id} blocked"))
                }
            };
            RunEvent::new(kind, task, message)
                .with("attempt", n)
                .with("outcome", result.outcome)
                .with("failure_kind", result.failure_kind)
                .with("reason", result.reason.as_ref().map(ToString::to_string))
                .with("cooldown_until", result.quota.cooldown_until)
                .with("touched_files", &result.touched_files)
        }
        Transition::Block { reason } => {
            RunEvent::new(EventKind::TaskBlocked, task, format!("{task_id} blocked: {reason}"))
                .with("reason", reason.to_string())
        }
    }
}

fn seed(manifest: &Manifest, graph: &DagGraph, now: DateTime<Utc>) -> LedgerState {
    let tasks = graph
        .tasks()
        .map(|id| TaskRecord::seeded(id.to_string(), !graph.dependencies_of(id).is_empty()))
        .collect();

    LedgerState {
        wave: manifest.wave.clone(),
        manifest_digest: manifest.digest.clone(),
        updated_at: now,
        run_state: RunState::Running,
        tasks,
    }
}

fn merge_for_resume(
    mut prior: LedgerState,
    manifest: &Manifest,
    graph: &DagGraph,
    quota: &QuotaPolicy,
    now: DateTime<Utc>,
) -> LedgerState {
    if prior.manifest_digest != manifest.digest {
        warn!(
            ledger_wave = %prior.wave,
            manifest_wave = %manifest.wave,
            "ledger was written for a different manifest; merging by task id"
        );
    }

    let mut tasks = Vec::with_capacity(graph.len());
    let mut demoted = 0usize;

    for id in graph.tasks() {
        let position = prior.tasks.iter().position(|r| r.id == id);
        let mut record = match position {
            Some(pos) => prior.tasks.swap_remove(pos),
            None => {
                debug!(task = %id, "task not present in ledger; seeding");
                TaskRecord::seeded(id.to_string(), !graph.dependencies_of(id).is_empty())
            }
        };

        if record.status == TaskStatus::Running {
            demote_running(&mut record, quota, now);
            demoted += 1;
        }
        tasks.push(record);
    }

    for dropped in &prior.tasks {
        warn!(task = %dropped.id, "ledger task no longer in manifest; dropping");
    }

    let mut state = LedgerState {
        wave: manifest.wave.clone(),
        manifest_digest: manifest.digest.clone(),
        updated_at: now,
        run_state: RunState::Running,
        tasks,
    };
    reconcile(&mut state, graph);

    info!(
        restored = state.tasks.len(),
        running_to_ready = demoted,
        "ledger merged for resume"
    );
    state
}

/// A task running at process exit has an unknown outcome: close its attempt
/// and make it admissible again unless its quota is already spent.
fn demote_running(record: &mut TaskRecord, quota: &QuotaPolicy, now: DateTime<Utc>) {
    if let Some(attempt) = record.attempts.last_mut().filter(|a| a.is_open()) {
        attempt.finished_at = Some(now);
        attempt.outcome = Some(AttemptOutcome::Error);
        attempt.evidence = INTERRUPTED_EVIDENCE.to_string();
        attempt.failure_kind = Some(FailureKind::Infra);
    }

    if quota.is_exhausted(&record.quota) {
        record.status = TaskStatus::Rejected;
        record.reason = Some(StatusReason::QuotaExhausted {
            failures: record.quota.failure_count,
        });
        warn!(task = %record.id, "stale running task already exhausted its quota; rejecting");
    } else {
        record.status = TaskStatus::Ready;
        record.reason = None;
        info!(task = %record.id, "stale running task demoted to ready");
    }
}

/// Bring waiting tasks in line with their dependencies after a merge.
fn reconcile(state: &mut LedgerState, graph: &DagGraph) {
    let mut changed = true;
    while changed {
        changed = false;
        for id in graph.tasks() {
            let deps = graph.dependencies_of(id);
            let failed_dep = deps.iter().find(|dep| {
                state.task(dep).is_some_and(|d| {
                    d.status == TaskStatus::Rejected
                        || (d.status == TaskStatus::Blocked && !d.is_awaiting_dependencies())
                })
            });
            let all_done = deps
                .iter()
                .all(|dep| state.status_of(dep) == Some(TaskStatus::Completed));

            let Some(record) = state.task(id) else {
                continue;
            };
            let waiting = record.status == TaskStatus::Ready || record.is_awaiting_dependencies();
            if !waiting {
                continue;
            }

            let next = if let Some(dep) = failed_dep {
                Some((
                    TaskStatus::Blocked,
                    Some(StatusReason::DependencyFailed {
                        dependency: dep.clone(),
                    }),
                ))
            } else if all_done && record.status != TaskStatus::Ready {
                Some((TaskStatus::Ready, None))
            } else if !all_done && record.status == TaskStatus::Ready {
                Some((TaskStatus::Blocked, Some(StatusReason::AwaitingDependencies)))
            } else {
                None
            };

            if let Some((status, reason)) = next {
                if let Some(record) = state.task_mut(id) {
                    debug!(task = %id, from = %record.status, to = %status, "reconciled on resume");
                    record.status = status;
                    record.reason = reason;
                    changed = true;
                }
            }
        }
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            WaveError::Ledger(format!("create directory {}: {e}", parent.display()))
        })?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents).map_err(|e| {
        WaveError::Ledger(format!("write temp ledger {}: {e}", tmp_path.display()))
    })?;
    fs::rename(&tmp_path, path)
        .map_err(|e| WaveError::Ledger(format!("replace ledger {}: {e}", path.display())))?;
    Ok(())
}
