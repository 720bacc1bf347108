// src/exec/process.rs

//! Shell process helper shared by the agent launcher and validation.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// A command line to run through the platform shell.
#[derive(Debug, Clone)]
pub struct ShellCommand<'a> {
    pub command: &'a str,
    pub workdir: &'a Path,
    pub env: Vec<(String, String)>,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `-1` when the process was killed by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.trim_end(), self.stderr.trim_end()) {
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellFailure {
    /// Could not spawn or wait on the process.
    Launch(String),
    /// Deadline passed; the child has been killed.
    TimedOut,
}

/// Run `shell.command` to completion, capturing output.
pub async fn run_shell(shell: ShellCommand<'_>) -> Result<ProcessOutput, ShellFailure> {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(shell.command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(shell.command);
        c
    };

    cmd.current_dir(shell.workdir)
        .envs(shell.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if shell.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| ShellFailure::Launch(format!("spawning `{}`: {e}", shell.command)))?;

    if let (Some(input), Some(mut pipe)) = (shell.stdin, child.stdin.take()) {
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(input.as_bytes()).await {
                debug!(error = %e, "child closed stdin early");
            }
        });
    }

    let wait = child.wait_with_output();
    let output = match shell.timeout {
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(result) => result,
            Err(_) => {
                warn!(command = %shell.command, seconds = limit.as_secs(), "process timed out; killed");
                return Err(ShellFailure::TimedOut);
            }
        },
        None => wait.await,
    }
    .map_err(|e| ShellFailure::Launch(format!("waiting for `{}`: {e}", shell.command)))?;

    Ok(ProcessOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Last `max_lines` lines of `text`.
pub fn output_tail(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// `Some(duration)` unless `seconds` is zero.
pub fn timeout_from_secs(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(output_tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(output_tail("a", 5), "a");
    }

    #[tokio::test]
    async fn captures_exit_code_and_stdin() {
        let out = run_shell(ShellCommand {
            command: "cat; exit 3",
            workdir: Path::new("."),
            env: Vec::new(),
            stdin: Some("hello".to_string()),
            timeout: Some(Duration::from_secs(10)),
        })
        .await
        .unwrap();
        assert_eq!(out.code, 3);
        assert_eq!(out.stdout, "hello");
    }

    #[tokio::test]
    async fn times_out_long_commands() {
        let err = run_shell(ShellCommand {
            command: "sleep 5",
            workdir: Path::new("."),
            env: Vec::new(),
            stdin: None,
            timeout: Some(Duration::from_millis(100)),
        })
        .await
        .unwrap_err();
        assert_eq!(err, ShellFailure::TimedOut);
    }
}
