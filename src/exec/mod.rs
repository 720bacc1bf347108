// src/exec/mod.rs

//! Execution adapter layer.
//!
//! The scheduler only sees [`ExecutionAdapter`]; everything below it is how
//! the production adapter drives a code-generation agent:
//!
//! - [`agent`]: [`ProcessAdapter`], the shell-command adapter.
//! - [`git`]: per-task worktrees and the changed-file audit.
//! - [`artifacts`]: per-attempt prompt and log files.
//! - [`status`]: parsing the agent's `[TASK]`/`[STATE]`/... status block.
//! - [`packet`]: allowed-file scope and validation commands of a packet.
//! - [`validation`]: serialised orchestrator-side validation.
//! - [`process`]: `tokio::process` helper with timeouts.
//! - [`template`]: command templates with shell-quoted placeholders.
//! - [`classify`]: diagnostic failure kinds.

pub mod agent;
pub mod artifacts;
pub mod backend;
pub mod classify;
pub mod git;
pub mod packet;
pub mod process;
pub mod status;
pub mod template;
pub mod validation;

pub use agent::ProcessAdapter;
pub use backend::{AdapterFuture, AdapterOutcome, ExecutionAdapter, TerminalState};
pub use classify::{FailureKind, classify_error, classify_text};
pub use packet::{PacketContract, ScopeGate};
pub use status::{StatusBlock, parse_status_block};
pub use template::CommandTemplate;
pub use validation::ValidationGate;
