// src/config/model.rs

use std::fmt;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::escalation::EscalationSettings;
use crate::quota::QuotaSettings;

/// Settings as read from `Wavesched.toml`, before CLI overrides.
///
/// ```toml
/// [scheduler]
/// max_parallel = 2
/// ledger_path = "tmp/wavesched/ledger.json"
///
/// [quota]
/// cooldown_seconds = 900
/// max_failures_per_task = 3
/// fail_fast = false
///
/// [executor]
/// mode = "orchestrator"
/// worker_command = "agent run -m {model_q} --packet {packet_q} --task {task_id}"
/// validation_bridge = "gpu-exec --command {command_q}"
/// use_worktrees = true
///
/// [escalation]
/// after_compile_failures = 2
/// profiles = [
///     { model = "agent-small", reasoning = "low" },
///     { model = "agent-large", reasoning = "high" },
/// ]
/// ```
///
/// Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub quota: QuotaSettings,

    #[serde(default)]
    pub executor: ExecutorSettings,

    #[serde(default)]
    pub escalation: EscalationSettings,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Upper bound on concurrently running tasks.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Where the ledger document lives.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Hard bound on one whole attempt (agent plus validation).
    /// `0` leaves attempts bounded only by the executor timeouts.
    #[serde(default)]
    pub attempt_timeout_seconds: u64,
}

fn default_max_parallel() -> usize {
    1
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("tmp/wavesched/ledger.json")
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            ledger_path: default_ledger_path(),
            attempt_timeout_seconds: 0,
        }
    }
}

/// Who runs a packet's validation commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// The agent validates its own work.
    #[default]
    Worker,
    /// The scheduler runs validation after the agent reports `completed`.
    Orchestrator,
}

impl ValidationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationMode::Worker => "worker",
            ValidationMode::Orchestrator => "orchestrator",
        }
    }
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `[executor]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default)]
    pub mode: ValidationMode,

    /// Working directory for the agent and local validation; packet
    /// references are resolved against it.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    /// Agent command template.
    #[serde(default)]
    pub worker_command: Option<String>,

    /// Optional wrapper for validation commands in orchestrator mode.
    #[serde(default)]
    pub validation_bridge: Option<String>,

    /// `0` disables the agent timeout.
    #[serde(default = "default_timeout_seconds")]
    pub worker_timeout_seconds: u64,

    #[serde(default = "default_timeout_seconds")]
    pub command_timeout_seconds: u64,

    /// Accept packets whose `Allowed Files` section parses to nothing.
    #[serde(default)]
    pub allow_empty_allowed_files: bool,

    /// Give every task its own git worktree and branch, created from
    /// `base_ref` in the repository at `workdir`.
    #[serde(default)]
    pub use_worktrees: bool,

    /// Default: `worktrees/` beside the ledger.
    #[serde(default)]
    pub worktree_root: Option<PathBuf>,

    #[serde(default = "default_base_ref")]
    pub base_ref: String,

    /// Also audit scope against what git reports as changed in the agent's
    /// directory. Always on with `use_worktrees`.
    #[serde(default)]
    pub git_scope_audit: bool,
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

fn default_timeout_seconds() -> u64 {
    1800
}

fn default_base_ref() -> String {
    "HEAD".to_string()
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            mode: ValidationMode::default(),
            workdir: default_workdir(),
            worker_command: None,
            validation_bridge: None,
            worker_timeout_seconds: default_timeout_seconds(),
            command_timeout_seconds: default_timeout_seconds(),
            allow_empty_allowed_files: false,
            use_worktrees: false,
            worktree_root: None,
            base_ref: default_base_ref(),
            git_scope_audit: false,
        }
    }
}
