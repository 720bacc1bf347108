// src/errors.rs

//! Crate-wide error types.
//!
//! - [`GraphError`]: malformed manifest, fatal at load time.
//! - [`ExecutionError`]: a single attempt failed; always recoverable through
//!   the quota policy, never fatal for the run loop.
//! - [`WaveError`]: everything that can end the process, including the
//!   run-level terminal conditions surfaced to the operator.

use thiserror::Error;

/// Structural problems in a manifest. No scheduling happens after one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("manifest contains no tasks")]
    EmptyManifest,

    #[error("invalid manifest document: {0}")]
    InvalidDocument(String),

    #[error("duplicate task id '{0}' in manifest")]
    DuplicateTask(String),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("task '{task}' lists unknown task '{hint}' in can_run_in_parallel_with")]
    UnknownHint { task: String, hint: String },

    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Why a single execution attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("failed to launch {what}: {reason}")]
    Launch { what: String, reason: String },

    #[error("{what} timed out after {seconds}s")]
    Timeout { what: String, seconds: u64 },

    #[error("code-generation agent exited with code {code}")]
    NonZeroExit { code: i32, output_tail: String },

    #[error("malformed status block: {0}")]
    MalformedOutput(String),

    #[error("scope violation: touched files outside the allowed set: {}", .files.join(", "))]
    ScopeViolation { files: Vec<String> },

    #[error("packet contract error: {0}")]
    Packet(String),

    #[error("validation command `{command}` failed with exit code {code}")]
    ValidationFailed {
        command: String,
        code: i32,
        output_tail: String,
    },

    #[error("validation command `{command}` timed out after {seconds}s")]
    ValidationTimeout { command: String, seconds: u64 },
}

impl ExecutionError {
    /// Free-form diagnostic text recorded as attempt evidence.
    pub fn evidence(&self) -> String {
        match self {
            ExecutionError::NonZeroExit { output_tail, .. }
            | ExecutionError::ValidationFailed { output_tail, .. }
                if !output_tail.trim().is_empty() =>
            {
                format!("{self}\n{output_tail}")
            }
            _ => self.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum WaveError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("run halted: task '{task}' exhausted its failure quota with fail-fast enabled")]
    RunHalted { task: String },

    #[error("run drained with rejected tasks: {}", .tasks.join(", "))]
    QuotaExhausted { tasks: Vec<String> },

    #[error("run drained with blocked tasks: {}", .blocked.join(", "))]
    Unfinished { blocked: Vec<String> },

    #[error("no ledger at {path}; nothing to report")]
    MissingLedger { path: String },

    #[error("run interrupted by operator")]
    Interrupted,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WaveError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            WaveError::RunHalted { .. }
            | WaveError::QuotaExhausted { .. }
            | WaveError::Unfinished { .. }
            | WaveError::MissingLedger { .. } => 1,
            WaveError::Interrupted => 130,
            _ => 2,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WaveError>;
