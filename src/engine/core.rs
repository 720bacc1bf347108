// src/engine/core.rs

//! Pure admission state machine.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dag::DagGraph;
use crate::engine::{Dispatch, RunState};
use crate::errors::{ExecutionError, Result};
use crate::escalation::EscalationPolicy;
use crate::exec::{AdapterOutcome, TerminalState, classify_error};
use crate::ledger::{
    AttemptOutcome, AttemptResult, EventKind, Ledger, LedgerState, RunEvent, StatusReason,
    TaskStatus, Transition,
};
use crate::manifest::TaskId;
use crate::quota::{QuotaPolicy, QuotaVerdict};

/// Structured result of absorbing one completion.
///
/// Useful for tests that step the scheduler by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionStep {
    pub task: TaskId,
    pub outcome: AttemptOutcome,
    /// Status the task ended in (`ready` for a retry).
    pub status: TaskStatus,
    /// Dependents promoted to `ready` by this completion.
    pub promoted: Vec<TaskId>,
    /// Transitive dependents newly blocked by this completion.
    pub newly_blocked: Vec<TaskId>,
    /// Whether this completion triggered fail-fast.
    pub halted: bool,
}

/// Holds the immutable graph, the quota and escalation policies and the
/// concurrency bound.
///
/// Task status lives only in the [`Ledger`]; every method that changes it
/// takes the ledger by reference and goes through `record_transition`.
#[derive(Debug)]
pub struct Scheduler {
    graph: DagGraph,
    quota: QuotaPolicy,
    escalation: EscalationPolicy,
    max_parallel: usize,
    halted_by: Option<TaskId>,
}

impl Scheduler {
    /// Build a scheduler whose quota state is seeded from `ledger`.
    pub fn new(
        graph: DagGraph,
        mut quota: QuotaPolicy,
        max_parallel: usize,
        ledger: &LedgerState,
    ) -> Self {
        quota.seed(ledger);
        Self {
            graph,
            quota,
            escalation: EscalationPolicy::default(),
            max_parallel: max_parallel.max(1),
            halted_by: None,
        }
    }

    /// Use a model-profile ladder, seeded from `ledger`.
    pub fn with_escalation(mut self, mut escalation: EscalationPolicy, ledger: &LedgerState) -> Self {
        escalation.seed(ledger);
        self.escalation = escalation;
        self
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    pub fn quota(&self) -> &QuotaPolicy {
        &self.quota
    }

    pub fn escalation(&self) -> &EscalationPolicy {
        &self.escalation
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Task whose rejection halted the run, if fail-fast fired.
    pub fn halted_by(&self) -> Option<&str> {
        self.halted_by.as_deref()
    }

    /// Tasks that may be dispatched right now, in manifest order.
    ///
    /// A task is admissible when it is `ready`, every dependency is
    /// `completed`, it is not cooling down, and the number of `running`
    /// tasks leaves room for it. Cooling-down tasks do not consume a slot.
    pub fn admissible(&self, ledger: &LedgerState, now: DateTime<Utc>) -> Vec<TaskId> {
        if self.halted_by.is_some() {
            return Vec::new();
        }

        let running = ledger.count(TaskStatus::Running);
        let budget = self.max_parallel.saturating_sub(running);
        if budget == 0 {
            return Vec::new();
        }

        self.graph
            .tasks()
            .filter(|id| ledger.status_of(id) == Some(TaskStatus::Ready))
            .filter(|id| self.dependencies_completed(ledger, id))
            .filter(|id| self.quota.may_attempt(id, now))
            .take(budget)
            .map(|id| id.to_string())
            .collect()
    }

    /// Move every admissible task to `running` and describe the work.
    pub fn dispatch_round(&mut self, ledger: &mut Ledger, now: DateTime<Utc>) -> Result<Vec<Dispatch>> {
        let ids = self.admissible(ledger.state(), now);
        let mut dispatches = Vec::with_capacity(ids.len());

        for id in ids {
            let record = ledger.state().task(&id);
            let attempt_number = record.map(|r| r.attempt_count() as u32 + 1).unwrap_or(1);
            let previous_failure = record
                .and_then(|r| r.last_attempt())
                .filter(|a| a.outcome == Some(AttemptOutcome::Error))
                .map(|a| match a.failure_kind {
                    Some(kind) => format!("failure_kind: {kind}\n{}", a.evidence),
                    None => a.evidence.clone(),
                });
            let profile = self.escalation.profile_for(&id).cloned();

            ledger.record_transition(
                &id,
                Transition::Dispatch {
                    attempt_number,
                    started_at: now,
                    profile: profile.clone(),
                },
            )?;

            let (packet_ref, backlog_ref) = match self.graph.task(&id) {
                Some(task) => (task.packet_ref.clone(), task.backlog_ref.clone()),
                None => (String::new(), None),
            };

            info!(task = %id, attempt = attempt_number, "dispatching task");
            dispatches.push(Dispatch {
                task_id: id,
                attempt_number,
                packet_ref,
                backlog_ref,
                started_at: now,
                profile,
                previous_failure,
            });
        }

        Ok(dispatches)
    }

    /// Absorb the result of one attempt.
    ///
    /// Returns `None` when the completion does not match the task's open
    /// attempt (stale or duplicate), in which case nothing changes.
    pub fn complete(
        &mut self,
        ledger: &mut Ledger,
        task_id: &str,
        attempt_number: u32,
        result: std::result::Result<AdapterOutcome, ExecutionError>,
        now: DateTime<Utc>,
    ) -> Result<Option<CompletionStep>> {
        let open = ledger
            .state()
            .task(task_id)
            .filter(|r| r.status == TaskStatus::Running)
            .and_then(|r| r.last_attempt())
            .is_some_and(|a| a.is_open() && a.attempt_number == attempt_number);
        if !open {
            warn!(task = %task_id, attempt = attempt_number, "completion for no open attempt; ignoring");
            return Ok(None);
        }

        let mut halted = false;
        let (outcome, status, reason, evidence, failure_kind, touched_files) = match result {
            Ok(AdapterOutcome {
                state: TerminalState::Completed,
                touched_files,
                evidence,
            }) => {
                self.quota.record_success(task_id);
                self.escalation.record_success(task_id);
                info!(task = %task_id, attempt = attempt_number, "task completed");
                (
                    AttemptOutcome::Completed,
                    TaskStatus::Completed,
                    None,
                    evidence,
                    None,
                    touched_files,
                )
            }
            Ok(AdapterOutcome {
                state: TerminalState::Blocked,
                touched_files,
                evidence,
            }) => {
                // A scope signal, not a failure: no quota penalty.
                info!(task = %task_id, attempt = attempt_number, "task reported blocked");
                (
                    AttemptOutcome::Blocked,
                    TaskStatus::Blocked,
                    Some(StatusReason::ReportedBlocked),
                    evidence,
                    None,
                    touched_files,
                )
            }
            Err(err) => {
                let kind = classify_error(&err);
                warn!(
                    task = %task_id,
                    attempt = attempt_number,
                    failure_kind = %kind,
                    error = %err,
                    "task attempt failed"
                );
                if let Some(up) = self.escalation.record_failure(task_id, kind) {
                    ledger.emit(
                        &RunEvent::new(
                            EventKind::Escalation,
                            Some(task_id),
                            format!(
                                "{task_id} escalated from {} to {} after repeated {} failures",
                                up.from, up.to, up.kind
                            ),
                        )
                        .with("kind", up.kind)
                        .with("from_profile", &up.from)
                        .with("to_profile", &up.to),
                    );
                }
                let (status, reason) = match self.quota.record_failure(task_id, now) {
                    QuotaVerdict::Retry { .. } => (TaskStatus::Ready, None),
                    QuotaVerdict::Exhausted { failures, halt_run } => {
                        if halt_run && self.halted_by.is_none() {
                            warn!(task = %task_id, "fail-fast: halting run, no further dispatches");
                            self.halted_by = Some(task_id.to_string());
                            halted = true;
                        }
                        (
                            TaskStatus::Rejected,
                            Some(StatusReason::QuotaExhausted { failures }),
                        )
                    }
                };
                (
                    AttemptOutcome::Error,
                    status,
                    reason,
                    err.evidence(),
                    Some(kind),
                    Vec::new(),
                )
            }
        };

        ledger.record_transition(
            task_id,
            Transition::Finish(AttemptResult {
                attempt_number,
                finished_at: now,
                outcome,
                evidence,
                failure_kind,
                touched_files,
                status,
                reason,
                quota: self.quota.state_of(task_id),
                escalation: self.escalation.state_of(task_id),
            }),
        )?;

        let mut promoted = Vec::new();
        let mut newly_blocked = Vec::new();
        match status {
            TaskStatus::Completed => promoted = self.promote_dependents(ledger, task_id)?,
            TaskStatus::Blocked | TaskStatus::Rejected => {
                newly_blocked = self.block_dependents(ledger, task_id)?;
            }
            TaskStatus::Ready | TaskStatus::Running => {}
        }

        Ok(Some(CompletionStep {
            task: task_id.to_string(),
            outcome,
            status,
            promoted,
            newly_blocked,
            halted,
        }))
    }

    /// Run-level state derived from the ledger.
    pub fn run_state(&self, ledger: &LedgerState) -> RunState {
        if self.halted_by.is_some() {
            return RunState::Halted;
        }
        if ledger.all_completed() {
            return RunState::Done;
        }
        let active = ledger
            .tasks
            .iter()
            .any(|r| matches!(r.status, TaskStatus::Ready | TaskStatus::Running));
        if active {
            RunState::Running
        } else {
            RunState::Drained
        }
    }

    /// When the earliest cooling-down `ready` task becomes admissible.
    pub fn next_wakeup(&self, ledger: &LedgerState, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let ready = ledger
            .tasks
            .iter()
            .filter(|r| r.status == TaskStatus::Ready)
            .map(|r| r.id.as_str());
        self.quota.next_expiry(ready, now)
    }

    fn dependencies_completed(&self, ledger: &LedgerState, id: &str) -> bool {
        self.graph
            .dependencies_of(id)
            .iter()
            .all(|dep| ledger.status_of(dep) == Some(TaskStatus::Completed))
    }

    fn promote_dependents(&self, ledger: &mut Ledger, task_id: &str) -> Result<Vec<TaskId>> {
        let mut promoted = Vec::new();
        for dependent in self.graph.dependents_of(task_id) {
            let waiting = ledger
                .state()
                .task(dependent)
                .is_some_and(|r| r.is_awaiting_dependencies());
            if waiting && self.dependencies_completed(ledger.state(), dependent) {
                ledger.record_transition(dependent, Transition::Promote)?;
                debug!(task = %dependent, after = %task_id, "dependencies satisfied; promoted to ready");
                promoted.push(dependent.clone());
            }
        }
        Ok(promoted)
    }

    /// A blocked or rejected prerequisite can never be satisfied: every
    /// transitive dependent still waiting becomes `blocked`.
    fn block_dependents(&self, ledger: &mut Ledger, task_id: &str) -> Result<Vec<TaskId>> {
        let mut blocked = Vec::new();
        for dependent in self.graph.transitive_dependents(task_id) {
            let waiting = ledger.state().task(&dependent).is_some_and(|r| {
                r.status == TaskStatus::Ready || r.is_awaiting_dependencies()
            });
            if !waiting {
                continue;
            }
            ledger.record_transition(
                &dependent,
                Transition::Block {
                    reason: StatusReason::DependencyFailed {
                        dependency: task_id.to_string(),
                    },
                },
            )?;
            debug!(task = %dependent, cause = %task_id, "blocked by failed prerequisite");
            blocked.push(dependent);
        }
        Ok(blocked)
    }
}
