// src/engine/runtime.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::engine::core::Scheduler;
use crate::engine::{Dispatch, RunState, RuntimeEvent};
use crate::errors::{ExecutionError, Result, WaveError};
use crate::exec::{AdapterOutcome, ExecutionAdapter};
use crate::ledger::{Ledger, LedgerState, TaskStatus};
use crate::manifest::TaskId;

/// Options that influence how the runtime behaves.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Bound on one whole adapter call. `None` relies on the adapter's own
    /// timeouts.
    pub attempt_timeout: Option<Duration>,
}

/// What a finished run looks like.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_state: RunState,
    pub ledger: LedgerState,
    /// Attempts started during this process.
    pub dispatched: usize,
    pub halted_by: Option<String>,
}

impl RunReport {
    /// Map the run-level state to the process result.
    pub fn into_result(self) -> Result<()> {
        match self.run_state {
            RunState::Done => Ok(()),
            RunState::Halted => Err(WaveError::RunHalted {
                task: self.halted_by.unwrap_or_default(),
            }),
            RunState::Interrupted => Err(WaveError::Interrupted),
            RunState::Drained | RunState::Running => {
                let rejected = self.ledger.ids_with_status(TaskStatus::Rejected);
                if rejected.is_empty() {
                    Err(WaveError::Unfinished {
                        blocked: self.ledger.ids_with_status(TaskStatus::Blocked),
                    })
                } else {
                    Err(WaveError::QuotaExhausted { tasks: rejected })
                }
            }
        }
    }
}

/// Async shell around [`Scheduler`].
///
/// Responsibilities:
/// - Dispatch admissible tasks and spawn one adapter call per dispatch into
///   a [`JoinSet`].
/// - Turn each joined call into an `AttemptFinished` event and apply them
///   one at a time, so completions are serialised and every ledger write
///   happens on this task.
/// - Sleep until the earliest cooldown expiry when nothing is running.
/// - Stop on `ShutdownRequested`: abort in-flight attempts (dropping their
///   agent processes) and leave those tasks `running` in the ledger.
pub struct Runtime {
    scheduler: Scheduler,
    ledger: Ledger,
    adapter: Arc<dyn ExecutionAdapter>,
    options: RuntimeOptions,

    events_tx: mpsc::Sender<RuntimeEvent>,
    events_rx: mpsc::Receiver<RuntimeEvent>,

    attempts: JoinSet<std::result::Result<AdapterOutcome, ExecutionError>>,
    attempt_ids: HashMap<Id, (TaskId, u32)>,
    dispatched: usize,
}

impl Runtime {
    pub fn new(
        scheduler: Scheduler,
        ledger: Ledger,
        adapter: Arc<dyn ExecutionAdapter>,
        options: RuntimeOptions,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(8);
        Self {
            scheduler,
            ledger,
            adapter,
            options,
            events_tx,
            events_rx,
            attempts: JoinSet::new(),
            attempt_ids: HashMap::new(),
            dispatched: 0,
        }
    }

    /// Handle for external producers (Ctrl-C).
    pub fn event_sender(&self) -> mpsc::Sender<RuntimeEvent> {
        self.events_tx.clone()
    }

    /// Main event loop. Returns once the run is terminal and nothing is in
    /// flight, or on shutdown once every in-flight attempt has been dropped.
    pub async fn run(mut self) -> Result<RunReport> {
        info!(
            tasks = self.ledger.state().tasks.len(),
            max_parallel = self.scheduler.max_parallel(),
            "wavesched runtime started"
        );
        self.ledger.set_run_state(RunState::Running)?;

        let run_state = loop {
            let now = Utc::now();
            for dispatch in self.scheduler.dispatch_round(&mut self.ledger, now)? {
                self.spawn_attempt(dispatch);
            }

            let state = self.scheduler.run_state(self.ledger.state());
            if state.is_terminal() && self.attempts.is_empty() {
                break state;
            }

            let wakeup = self.scheduler.next_wakeup(self.ledger.state(), now);
            if wakeup.is_none() && self.attempts.is_empty() {
                // Ready tasks exist but none can ever be admitted.
                warn!("nothing running and nothing admissible; treating run as drained");
                break RunState::Drained;
            }
            let delay = wakeup
                .and_then(|at| (at - now).to_std().ok())
                .unwrap_or_default();
            if wakeup.is_some() {
                debug!(seconds = delay.as_secs(), "waiting for completion or cooldown expiry");
            }

            let event = tokio::select! {
                Some(joined) = self.attempts.join_next_with_id() => Some(self.finished(joined)),
                event = self.events_rx.recv() => event,
                _ = tokio::time::sleep(delay), if wakeup.is_some() => continue,
            };

            match event {
                Some(RuntimeEvent::AttemptFinished {
                    task,
                    attempt_number,
                    result,
                }) => {
                    self.scheduler.complete(
                        &mut self.ledger,
                        &task,
                        attempt_number,
                        result,
                        Utc::now(),
                    )?;
                }
                Some(RuntimeEvent::ShutdownRequested) => {
                    warn!(
                        in_flight = self.attempts.len(),
                        "shutdown requested; aborting running attempts, they resume on the next run"
                    );
                    self.abort_in_flight().await;
                    break RunState::Interrupted;
                }
                None => {
                    warn!("runtime event channel closed unexpectedly");
                    self.abort_in_flight().await;
                    break RunState::Interrupted;
                }
            }
        };

        self.ledger.set_run_state(run_state)?;
        info!(
            run_state = %run_state,
            dispatched = self.dispatched,
            "wavesched runtime exiting"
        );

        Ok(RunReport {
            run_state,
            ledger: self.ledger.snapshot(),
            dispatched: self.dispatched,
            halted_by: self.scheduler.halted_by().map(str::to_string),
        })
    }

    fn spawn_attempt(&mut self, dispatch: Dispatch) {
        self.dispatched += 1;

        let adapter = Arc::clone(&self.adapter);
        let limit = self.options.attempt_timeout;
        let key = (dispatch.task_id.clone(), dispatch.attempt_number);

        let handle = self.attempts.spawn(async move {
            let fut = adapter.run(&dispatch);
            match limit {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(ExecutionError::Timeout {
                        what: "attempt".to_string(),
                        seconds: limit.as_secs(),
                    }),
                },
                None => fut.await,
            }
        });
        self.attempt_ids.insert(handle.id(), key);
    }

    /// Map a joined attempt back to its task. A panicking adapter still
    /// produces a completion.
    fn finished(
        &mut self,
        joined: std::result::Result<(Id, std::result::Result<AdapterOutcome, ExecutionError>), JoinError>,
    ) -> RuntimeEvent {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(join_err) => (
                join_err.id(),
                Err(ExecutionError::Launch {
                    what: "execution adapter".to_string(),
                    reason: join_err.to_string(),
                }),
            ),
        };
        let (task, attempt_number) = self.attempt_ids.remove(&id).unwrap_or_default();
        RuntimeEvent::AttemptFinished {
            task,
            attempt_number,
            result,
        }
    }

    /// Abort every spawned attempt and wait until each future has been
    /// dropped, which kills any agent process it owns.
    async fn abort_in_flight(&mut self) {
        self.attempts.abort_all();
        while self.attempts.join_next().await.is_some() {}
        self.attempt_ids.clear();
    }
}
