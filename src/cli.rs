// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::config::ValidationMode;

/// Command-line arguments for `wavesched`.
#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "wavesched",
    version,
    about = "Dispatch a wave of work packets to a code-generation agent, respecting dependencies and failure quotas.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the wave manifest (JSON).
    #[arg(long, value_name = "PATH", default_value = "manifest.json")]
    pub manifest: String,

    /// Path to the settings file (TOML).
    ///
    /// Default: `Wavesched.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Discard any existing ledger and start fresh.
    #[arg(long)]
    pub no_resume: bool,

    /// Upper bound on concurrently running tasks.
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Print the dispatch plan without executing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the report for the current ledger and exit.
    #[arg(long)]
    pub report: bool,

    /// Ledger location (overrides `[scheduler].ledger_path`).
    #[arg(long, value_name = "PATH")]
    pub ledger: Option<String>,

    /// Wait after a failed attempt before the task may be retried.
    #[arg(long, value_name = "SECONDS")]
    pub quota_cooldown_seconds: Option<u64>,

    /// Failed attempts after which a task is rejected.
    #[arg(long, value_name = "N")]
    pub quota_max_failures_per_task: Option<u32>,

    /// Halt the whole run on the first rejected task.
    #[arg(long)]
    pub quota_fail_fast: bool,

    /// Who runs packet validation commands.
    #[arg(long, value_enum, value_name = "MODE")]
    pub validation_executor: Option<ValidationMode>,

    /// Agent command template (overrides `[executor].worker_command`).
    #[arg(long, value_name = "TEMPLATE")]
    pub worker_command: Option<String>,

    /// Accept packets whose `Allowed Files` section is empty.
    #[arg(long)]
    pub allow_empty_allowed_files: bool,

    /// Run every task in its own git worktree.
    #[arg(long)]
    pub use_worktrees: bool,

    /// Worktree directory (default: `worktrees/` beside the ledger).
    #[arg(long, value_name = "PATH")]
    pub worktree_root: Option<String>,

    /// Base ref for new task branches.
    #[arg(long, value_name = "REF")]
    pub base_ref: Option<String>,

    /// Model-profile ladder, e.g. `small:low;small:high;large:high`.
    #[arg(long, value_name = "LADDER")]
    pub profiles: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WAVESCHED_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

impl CliArgs {
    pub fn resume(&self) -> bool {
        !self.no_resume
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
