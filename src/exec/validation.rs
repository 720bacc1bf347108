// src/exec/validation.rs

//! Orchestrator-side validation.
//!
//! Validation commands share scarce resources (a GPU box, a build cache),
//! so each task's whole command sequence runs under one run-wide async
//! mutex: sequences never interleave, regardless of `max_parallel`.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::engine::Dispatch;
use crate::errors::ExecutionError;
use crate::exec::process::{ShellCommand, ShellFailure, output_tail, run_shell, timeout_from_secs};
use crate::exec::template::CommandTemplate;

const NOT_PERSISTED: &str = "not persisted";
const TAIL_LINES: usize = 40;

static ARTIFACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)artifacts=(\S+)").unwrap());

/// Serialised validation runner shared by all attempts of a run.
#[derive(Debug, Clone)]
pub struct ValidationGate {
    lock: Arc<Mutex<()>>,
    bridge: Option<CommandTemplate>,
    timeout_seconds: u64,
}

impl ValidationGate {
    pub fn new(bridge: Option<CommandTemplate>, timeout_seconds: u64) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            bridge,
            timeout_seconds,
        }
    }

    /// Run every command in order in `workdir`, stopping at the first
    /// failure.
    ///
    /// Returns one evidence line per command on success.
    pub async fn run(
        &self,
        dispatch: &Dispatch,
        commands: &[String],
        workdir: &Path,
    ) -> Result<String, ExecutionError> {
        if commands.is_empty() {
            return Ok("no validation commands in packet".to_string());
        }

        let _guard = self.lock.lock().await;
        debug!(task = %dispatch.task_id, commands = commands.len(), "validation lock acquired");
        let mut lines = Vec::with_capacity(commands.len());
        for (idx, command) in commands.iter().enumerate() {
            let line = self.run_one(dispatch, idx + 1, command, workdir).await?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    async fn run_one(
        &self,
        dispatch: &Dispatch,
        index: usize,
        command: &str,
        workdir: &Path,
    ) -> Result<String, ExecutionError> {
        let attempt = dispatch.attempt_number.to_string();
        let line = match &self.bridge {
            Some(template) => template.render(&[
                ("command", command),
                ("task_id", dispatch.task_id.as_str()),
                ("attempt", attempt.as_str()),
            ]),
            None => command.to_string(),
        };

        info!(
            task = %dispatch.task_id,
            attempt = dispatch.attempt_number,
            index,
            command = %command,
            bridged = self.bridge.is_some(),
            "running validation command"
        );

        let output = run_shell(ShellCommand {
            command: &line,
            workdir,
            env: vec![
                ("WAVESCHED_TASK_ID".to_string(), dispatch.task_id.clone()),
                ("WAVESCHED_ATTEMPT".to_string(), attempt.clone()),
            ],
            stdin: None,
            timeout: timeout_from_secs(self.timeout_seconds),
        })
        .await
        .map_err(|failure| match failure {
            ShellFailure::TimedOut => ExecutionError::ValidationTimeout {
                command: command.to_string(),
                seconds: self.timeout_seconds,
            },
            ShellFailure::Launch(reason) => ExecutionError::Launch {
                what: "validation command".to_string(),
                reason,
            },
        })?;

        if !output.success() {
            return Err(ExecutionError::ValidationFailed {
                command: command.to_string(),
                code: output.code,
                output_tail: output_tail(&output.combined(), TAIL_LINES),
            });
        }

        let locator = artifact_locator(&output.stdout);
        debug!(task = %dispatch.task_id, index, artifacts = ?locator, "validation command passed");
        Ok(format!(
            "[{index}] `{command}` ok (artifacts: {})",
            locator.as_deref().unwrap_or(NOT_PERSISTED)
        ))
    }
}

/// Last `artifacts=<locator>` token on stdout, if any.
pub fn artifact_locator(stdout: &str) -> Option<String> {
    ARTIFACT_RE
        .captures_iter(stdout)
        .last()
        .map(|c| c[1].to_string())
        .filter(|v| !matches!(v.as_str(), "None" | "none" | "null"))
}
