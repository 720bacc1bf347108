// src/quota.rs

//! Per-task failure quota and cooldown (retry backpressure).
//!
//! The policy is time-based: a failed task is not admissible again until
//! `cooldown_until`, but it never holds a concurrency slot while it waits.
//! Once a task's `failure_count` reaches `max_failures_per_task` it is
//! exhausted and must be rejected; with `fail_fast` the whole run halts.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ledger::LedgerState;
use crate::manifest::TaskId;

/// `[quota]` section of the settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSettings {
    /// Minimum wait after a failure before the task may be retried.
    /// `0` disables the delay but keeps the failure ceiling.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,

    /// Failures after which a task is rejected.
    #[serde(default = "default_max_failures_per_task")]
    pub max_failures_per_task: u32,

    /// Halt the whole run on the first rejection.
    #[serde(default)]
    pub fail_fast: bool,
}

fn default_cooldown_seconds() -> u64 {
    900
}

fn default_max_failures_per_task() -> u32 {
    3
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            cooldown_seconds: default_cooldown_seconds(),
            max_failures_per_task: default_max_failures_per_task(),
            fail_fast: false,
        }
    }
}

/// Persisted quota bookkeeping for one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub failure_count: u32,
    #[serde(default)]
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl QuotaState {
    pub fn cooling_down(&self, now: DateTime<Utc>) -> bool {
        matches!(self.cooldown_until, Some(until) if now < until)
    }
}

/// What the scheduler must do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaVerdict {
    /// Task goes back to `ready`; not admissible before `cooldown_until`.
    Retry { cooldown_until: DateTime<Utc> },
    /// Task must be `rejected`. `halt_run` is set when fail-fast is on.
    Exhausted { failures: u32, halt_run: bool },
}

#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    settings: QuotaSettings,
    states: HashMap<TaskId, QuotaState>,
}

impl QuotaPolicy {
    pub fn new(settings: QuotaSettings) -> Self {
        Self {
            settings,
            states: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &QuotaSettings {
        &self.settings
    }

    /// Load quota state from a ledger, replacing anything held in memory.
    pub fn seed(&mut self, ledger: &LedgerState) {
        self.states = ledger
            .tasks
            .iter()
            .map(|record| (record.id.clone(), record.quota.clone()))
            .collect();
        debug!(tasks = self.states.len(), "quota policy seeded from ledger");
    }

    /// `false` while `now < cooldown_until`.
    pub fn may_attempt(&self, task_id: &str, now: DateTime<Utc>) -> bool {
        match self.states.get(task_id) {
            Some(state) => !state.cooling_down(now),
            None => true,
        }
    }

    pub fn record_failure(&mut self, task_id: &str, now: DateTime<Utc>) -> QuotaVerdict {
        let cooldown_until = cooldown_deadline(now, self.settings.cooldown_seconds);
        let state = self.states.entry(task_id.to_string()).or_default();
        state.failure_count += 1;
        state.cooldown_until = Some(cooldown_until);

        if state.failure_count >= self.settings.max_failures_per_task {
            warn!(
                task = %task_id,
                failure_count = state.failure_count,
                max_failures = self.settings.max_failures_per_task,
                fail_fast = self.settings.fail_fast,
                "failure quota exhausted"
            );
            return QuotaVerdict::Exhausted {
                failures: state.failure_count,
                halt_run: self.settings.fail_fast,
            };
        }

        info!(
            task = %task_id,
            failure_count = state.failure_count,
            cooldown_until = %cooldown_until,
            "task failed; cooling down before retry"
        );
        QuotaVerdict::Retry { cooldown_until }
    }

    pub fn record_success(&mut self, task_id: &str) {
        if let Some(state) = self.states.get_mut(task_id) {
            *state = QuotaState::default();
        }
    }

    /// Current quota state for a task (default if never failed).
    pub fn state_of(&self, task_id: &str) -> QuotaState {
        self.states.get(task_id).cloned().unwrap_or_default()
    }

    pub fn is_exhausted(&self, state: &QuotaState) -> bool {
        state.failure_count >= self.settings.max_failures_per_task
    }

    /// Earliest future cooldown expiry among the given tasks.
    pub fn next_expiry<'a, I>(&self, task_ids: I, now: DateTime<Utc>) -> Option<DateTime<Utc>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        task_ids
            .into_iter()
            .filter_map(|id| self.states.get(id))
            .filter_map(|state| state.cooldown_until)
            .filter(|until| *until > now)
            .min()
    }
}

fn cooldown_deadline(now: DateTime<Utc>, seconds: u64) -> DateTime<Utc> {
    let secs = i64::try_from(seconds).unwrap_or(i64::MAX);
    let delta = TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::MAX);
    now.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
