// src/exec/artifacts.rs

//! Per-attempt prompt and log files.
//!
//! ```text
//! <runtime dir>/prompts/WB01_attempt_01.txt
//! <runtime dir>/logs/WB01_attempt_01.log
//! ```

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::errors::ExecutionError;
use crate::exec::process::{ProcessOutput, ShellFailure};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDirs {
    prompts: PathBuf,
    logs: PathBuf,
}

/// Files of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFiles {
    pub prompt: PathBuf,
    pub log: PathBuf,
}

impl ArtifactDirs {
    pub fn under(root: &Path) -> Self {
        Self {
            prompts: root.join("prompts"),
            logs: root.join("logs"),
        }
    }

    pub fn for_attempt(&self, task_id: &str, attempt: u32) -> AttemptFiles {
        let stem = format!("{task_id}_attempt_{attempt:02}");
        AttemptFiles {
            prompt: self.prompts.join(format!("{stem}.txt")),
            log: self.logs.join(format!("{stem}.log")),
        }
    }
}

impl AttemptFiles {
    /// The prompt file is referenced by the agent command, so failing to
    /// write it fails the attempt.
    pub async fn write_prompt(&self, prompt: &str) -> Result<(), ExecutionError> {
        write(&self.prompt, prompt.as_bytes())
            .await
            .map_err(|reason| ExecutionError::Launch {
                what: "attempt prompt file".to_string(),
                reason,
            })
    }

    /// Record how the agent run ended. Failures are only logged.
    pub async fn write_log(&self, command: &str, run: &Result<ProcessOutput, ShellFailure>) {
        let mut body = format!("# launch: {command}\n");
        match run {
            Ok(output) => {
                body.push_str(&output.stdout);
                if !output.stderr.is_empty() {
                    body.push_str("\n# stderr\n");
                    body.push_str(&output.stderr);
                }
                body.push_str(&format!("\n# exit code {}\n", output.code));
            }
            Err(ShellFailure::TimedOut) => body.push_str("# timed out; process killed\n"),
            Err(ShellFailure::Launch(reason)) => body.push_str(&format!("# launch failed: {reason}\n")),
        }
        if let Err(e) = write(&self.log, body.as_bytes()).await {
            warn!(path = %self.log.display(), error = %e, "failed to write attempt log");
        }
    }
}

async fn write(path: &Path, contents: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("create {}: {e}", parent.display()))?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| format!("write {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_files_are_numbered_per_task() {
        let dirs = ArtifactDirs::under(Path::new("run"));
        let files = dirs.for_attempt("WB01", 3);
        assert_eq!(files.prompt, PathBuf::from("run/prompts/WB01_attempt_03.txt"));
        assert_eq!(files.log, PathBuf::from("run/logs/WB01_attempt_03.log"));
    }

    #[tokio::test]
    async fn log_records_command_output_and_exit() {
        let dir = tempfile::tempdir().unwrap();
        let files = ArtifactDirs::under(dir.path()).for_attempt("A", 1);
        let run = Ok(ProcessOutput {
            code: 2,
            stdout: "working\n".to_string(),
            stderr: "boom".to_string(),
        });
        files.write_log("agent --go", &run).await;

        let log = std::fs::read_to_string(&files.log).unwrap();
        assert!(log.starts_with("# launch: agent --go\nworking\n"));
        assert!(log.contains("# stderr\nboom"));
        assert!(log.ends_with("# exit code 2\n"));
    }
}
