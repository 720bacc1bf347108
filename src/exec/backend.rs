// src/exec/backend.rs

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::engine::Dispatch;
use crate::errors::ExecutionError;

/// Boxed future returned by [`ExecutionAdapter::run`].
pub type AdapterFuture<'a> =
    Pin<Box<dyn Future<Output = Result<AdapterOutcome, ExecutionError>> + Send + 'a>>;

/// Terminal state the agent reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Completed,
    Blocked,
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalState::Completed => f.write_str("completed"),
            TerminalState::Blocked => f.write_str("blocked"),
        }
    }
}

/// Successful adapter result. Failures travel as [`ExecutionError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterOutcome {
    pub state: TerminalState,
    pub touched_files: Vec<String>,
    pub evidence: String,
}

impl AdapterOutcome {
    pub fn completed(evidence: impl Into<String>) -> Self {
        Self {
            state: TerminalState::Completed,
            touched_files: Vec::new(),
            evidence: evidence.into(),
        }
    }

    pub fn blocked(evidence: impl Into<String>) -> Self {
        Self {
            state: TerminalState::Blocked,
            touched_files: Vec::new(),
            evidence: evidence.into(),
        }
    }

    pub fn with_touched_files(mut self, files: Vec<String>) -> Self {
        self.touched_files = files;
        self
    }
}

/// Runs one attempt of one task.
///
/// Implementations are shared across concurrently running attempts, so
/// `run` takes `&self`. The scheduler never inspects how an attempt is
/// carried out, only the outcome.
pub trait ExecutionAdapter: Send + Sync {
    fn run<'a>(&'a self, dispatch: &'a Dispatch) -> AdapterFuture<'a>;
}
