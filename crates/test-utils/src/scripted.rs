use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::debug;
use wavesched::engine::Dispatch;
use wavesched::errors::ExecutionError;
use wavesched::exec::{AdapterFuture, AdapterOutcome, ExecutionAdapter};

/// One scripted attempt result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Complete,
    /// Complete, reporting these touched files.
    CompleteTouching(Vec<String>),
    Block,
    /// Fail with a non-zero exit whose output is the given text.
    Fail(String),
    /// Never finish (exercises attempt timeouts and shutdown).
    Hang,
}

impl Step {
    pub fn fail(text: &str) -> Self {
        Step::Fail(text.to_string())
    }
}

/// A fake adapter that:
/// - replays per-task outcome scripts (falling back to a per-task or global
///   default once a script runs out)
/// - records every dispatch in order
/// - tracks live and peak concurrency
pub struct ScriptedAdapter {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    fallbacks: HashMap<String, Step>,
    default_step: Step,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    log: Mutex<Vec<(String, u32)>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallbacks: HashMap::new(),
            default_step: Step::Complete,
            delays: HashMap::new(),
            default_delay: Duration::from_millis(5),
            log: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Outcomes for successive attempts of `task`.
    pub fn script(self, task: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(task.to_string(), steps.into_iter().collect());
        self
    }

    /// Outcome for every attempt of `task` not covered by a script.
    pub fn always(mut self, task: &str, step: Step) -> Self {
        self.fallbacks.insert(task.to_string(), step);
        self
    }

    pub fn with_delay(mut self, task: &str, delay: Duration) -> Self {
        self.delays.insert(task.to_string(), delay);
        self
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// `(task, attempt)` in dispatch order.
    pub fn dispatch_log(&self) -> Vec<(String, u32)> {
        self.log.lock().unwrap().clone()
    }

    pub fn dispatched_tasks(&self) -> Vec<String> {
        self.dispatch_log().into_iter().map(|(t, _)| t).collect()
    }

    pub fn attempts_of(&self, task: &str) -> usize {
        self.dispatch_log().iter().filter(|(t, _)| t == task).count()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Attempts whose futures are still alive.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    fn next_step(&self, task: &str) -> Step {
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(task)
            .and_then(|q| q.pop_front());
        scripted
            .or_else(|| self.fallbacks.get(task).cloned())
            .unwrap_or_else(|| self.default_step.clone())
    }
}

impl Default for ScriptedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ExecutionAdapter for ScriptedAdapter {
    fn run<'a>(&'a self, dispatch: &'a Dispatch) -> AdapterFuture<'a> {
        Box::pin(async move {
            self.log
                .lock()
                .unwrap()
                .push((dispatch.task_id.clone(), dispatch.attempt_number));

            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let _guard = RunningGuard(&self.running);

            let step = self.next_step(&dispatch.task_id);
            debug!(task = %dispatch.task_id, attempt = dispatch.attempt_number, ?step, "scripted attempt");

            let delay = self
                .delays
                .get(&dispatch.task_id)
                .copied()
                .unwrap_or(self.default_delay);
            tokio::time::sleep(delay).await;

            match step {
                Step::Complete => Ok(AdapterOutcome::completed("scripted success")),
                Step::CompleteTouching(files) => {
                    Ok(AdapterOutcome::completed("scripted success").with_touched_files(files))
                }
                Step::Block => Ok(AdapterOutcome::blocked("scripted blocker")),
                Step::Fail(text) => Err(ExecutionError::NonZeroExit {
                    code: 1,
                    output_tail: text,
                }),
                Step::Hang => std::future::pending().await,
            }
        })
    }
}
