// src/exec/agent.rs

//! [`ProcessAdapter`]: runs the code-generation agent as a shell command,
//! audits its scope and (in orchestrator mode) runs validation.
//!
//! Per attempt:
//! 1. Resolve the agent's directory: the shared `workdir`, or the task's own
//!    git worktree when `use_worktrees` is set.
//! 2. Write the prompt file, run the agent with the prompt on stdin, write
//!    the attempt log.
//! 3. Parse the status block and check the reported files, plus whatever
//!    git sees as changed when the git audit is on, against the packet's
//!    allowed files.
//! 4. Run validation in the agent's directory (orchestrator mode only).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{ExecutorSettings, ValidationMode};
use crate::engine::Dispatch;
use crate::errors::{ExecutionError, Result, WaveError};
use crate::exec::artifacts::{ArtifactDirs, AttemptFiles};
use crate::exec::backend::{AdapterFuture, AdapterOutcome, ExecutionAdapter, TerminalState};
use crate::exec::git::{branch_name, changed_files, ensure_worktree, worktree_dir};
use crate::exec::packet::PacketContract;
use crate::exec::process::{ShellCommand, ShellFailure, output_tail, run_shell, timeout_from_secs};
use crate::exec::status::parse_status_block;
use crate::exec::template::{BRIDGE_PLACEHOLDERS, CommandTemplate, WORKER_PLACEHOLDERS};
use crate::exec::validation::ValidationGate;

const AGENT: &str = "code-generation agent";
const TAIL_LINES: usize = 40;
const PREVIOUS_FAILURE_LINES: usize = 20;

#[derive(Debug)]
pub struct ProcessAdapter {
    settings: ExecutorSettings,
    worker: CommandTemplate,
    gate: ValidationGate,
    worktree_root: PathBuf,
    /// Serialises `git worktree add` against the shared repository.
    worktree_lock: Arc<Mutex<()>>,
    artifacts: Option<ArtifactDirs>,
    /// Runtime directory relative to `workdir`, hidden from the git audit.
    audit_exclude: Option<String>,
}

impl ProcessAdapter {
    pub fn new(settings: &ExecutorSettings) -> Result<Self> {
        let source = settings.worker_command.as_deref().ok_or_else(|| {
            WaveError::ConfigError(
                "no agent command configured: set [executor].worker_command, \
                 --worker-command or WAVESCHED_WORKER_COMMAND"
                    .to_string(),
            )
        })?;
        let worker = CommandTemplate::parse(source, WORKER_PLACEHOLDERS)?;
        let bridge = settings
            .validation_bridge
            .as_deref()
            .map(|b| CommandTemplate::parse(b, BRIDGE_PLACEHOLDERS))
            .transpose()?;

        if settings.mode == ValidationMode::Worker && bridge.is_some() {
            warn!("validation_bridge is ignored in worker validation mode");
        }

        let worktree_root = settings
            .worktree_root
            .clone()
            .unwrap_or_else(|| settings.workdir.join("tmp/wavesched/worktrees"));

        Ok(Self {
            gate: ValidationGate::new(bridge, settings.command_timeout_seconds),
            settings: settings.clone(),
            worker,
            worktree_root: absolute(&worktree_root),
            worktree_lock: Arc::new(Mutex::new(())),
            artifacts: None,
            audit_exclude: None,
        })
    }

    /// Keep prompts and logs under `dir` (normally the ledger's directory),
    /// and put worktrees there unless `worktree_root` is configured.
    pub fn with_runtime_dir(mut self, dir: &Path) -> Self {
        self.artifacts = Some(ArtifactDirs::under(dir));
        if self.settings.worktree_root.is_none() {
            self.worktree_root = absolute(&dir.join("worktrees"));
        }
        self.audit_exclude = relative_to(dir, &self.settings.workdir);
        self
    }

    fn packet_path(&self, dispatch: &Dispatch) -> PathBuf {
        self.settings.workdir.join(&dispatch.packet_ref)
    }

    fn git_audit(&self) -> bool {
        self.settings.use_worktrees || self.settings.git_scope_audit
    }

    /// Directory the agent and validation run in.
    async fn task_dir(&self, dispatch: &Dispatch) -> std::result::Result<PathBuf, ExecutionError> {
        if !self.settings.use_worktrees {
            return Ok(self.settings.workdir.clone());
        }
        let dir = worktree_dir(&self.worktree_root, &dispatch.task_id);
        let branch = branch_name(&dispatch.task_id, &dispatch.packet_ref);
        let _guard = self.worktree_lock.lock().await;
        ensure_worktree(&self.settings.workdir, &dir, &branch, &self.settings.base_ref).await?;
        Ok(dir)
    }

    async fn attempt(&self, dispatch: &Dispatch) -> std::result::Result<AdapterOutcome, ExecutionError> {
        let packet_path = self.packet_path(dispatch);
        let contract = PacketContract::load(&packet_path)?;
        let scope = contract.scope(self.settings.allow_empty_allowed_files)?;
        let task_dir = self.task_dir(dispatch).await?;

        let files: Option<AttemptFiles> = self
            .artifacts
            .as_ref()
            .map(|a| a.for_attempt(&dispatch.task_id, dispatch.attempt_number));
        let packet = packet_path.display().to_string();
        let prompt = compose_prompt(dispatch, &packet, &contract, self.settings.mode);
        if let Some(files) = &files {
            files.write_prompt(&prompt).await?;
        }

        let attempt = dispatch.attempt_number.to_string();
        let backlog = dispatch.backlog_ref.clone().unwrap_or_default();
        let workdir = task_dir.display().to_string();
        let mode = self.settings.mode.as_str();
        let (model, reasoning) = dispatch
            .profile
            .as_ref()
            .map(|p| (p.model.as_str(), p.reasoning.as_str()))
            .unwrap_or_default();
        let prompt_file = files.as_ref().map(|f| f.prompt.display().to_string()).unwrap_or_default();
        let log_file = files.as_ref().map(|f| f.log.display().to_string()).unwrap_or_default();
        let values = [
            ("task_id", dispatch.task_id.as_str()),
            ("attempt", attempt.as_str()),
            ("packet", packet.as_str()),
            ("backlog", backlog.as_str()),
            ("workdir", workdir.as_str()),
            ("validation_mode", mode),
            ("model", model),
            ("reasoning", reasoning),
            ("prompt_file", prompt_file.as_str()),
            ("log_file", log_file.as_str()),
        ];
        let command = self.worker.render(&values);
        let env = values
            .iter()
            .map(|(k, v)| (format!("WAVESCHED_{}", k.to_ascii_uppercase()), v.to_string()))
            .collect();

        info!(
            task = %dispatch.task_id,
            attempt = dispatch.attempt_number,
            validation_mode = mode,
            workdir = %workdir,
            model,
            "launching agent"
        );

        let run = run_shell(ShellCommand {
            command: &command,
            workdir: &task_dir,
            env,
            stdin: Some(prompt),
            timeout: timeout_from_secs(self.settings.worker_timeout_seconds),
        })
        .await;
        if let Some(files) = &files {
            files.write_log(&command, &run).await;
        }

        let output = run.map_err(|failure| match failure {
            ShellFailure::TimedOut => ExecutionError::Timeout {
                what: AGENT.to_string(),
                seconds: self.settings.worker_timeout_seconds,
            },
            ShellFailure::Launch(reason) => ExecutionError::Launch {
                what: AGENT.to_string(),
                reason,
            },
        })?;

        if !output.success() {
            let mut output_tail = output_tail(&output.combined(), TAIL_LINES);
            if let Some(files) = &files {
                output_tail.push_str(&format!("\n(full log: {})", files.log.display()));
            }
            return Err(ExecutionError::NonZeroExit {
                code: output.code,
                output_tail,
            });
        }

        let block = parse_status_block(&dispatch.task_id, &output.stdout)?;
        let touched = self.touched_files(&block.files, &task_dir).await;
        let outside = scope.out_of_scope(&touched);
        if !outside.is_empty() {
            return Err(ExecutionError::ScopeViolation { files: outside });
        }

        let mut evidence = block.summary();
        if block.state == TerminalState::Completed && self.settings.mode == ValidationMode::Orchestrator {
            let report = self
                .gate
                .run(dispatch, &contract.validation_commands, &task_dir)
                .await?;
            evidence.push('\n');
            evidence.push_str(&report);
        }

        let outcome = match block.state {
            TerminalState::Completed => AdapterOutcome::completed(evidence),
            TerminalState::Blocked => AdapterOutcome::blocked(evidence),
        };
        Ok(outcome.with_touched_files(touched))
    }

    /// Reported files, plus git's view of the directory when the audit is on.
    async fn touched_files(&self, reported: &[String], dir: &Path) -> Vec<String> {
        let mut touched = reported.to_vec();
        if !self.git_audit() {
            return touched;
        }

        let seen = changed_files(dir).await;
        let unreported: Vec<String> = seen
            .into_iter()
            .filter(|f| !touched.contains(f))
            .filter(|f| {
                self.settings.use_worktrees
                    || self
                        .audit_exclude
                        .as_deref()
                        .is_none_or(|prefix| !f.starts_with(prefix))
            })
            .collect();
        if !unreported.is_empty() {
            debug!(files = ?unreported, "git reports changes the agent did not list");
        }
        touched.extend(unreported);
        touched
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// `dir` relative to `base` as a `/`-terminated prefix, when it lies inside.
fn relative_to(dir: &Path, base: &Path) -> Option<String> {
    let dir = dir.canonicalize().ok()?;
    let base = base.canonicalize().ok()?;
    let rel = dir.strip_prefix(&base).ok()?;
    let rel = rel.to_string_lossy().replace('\\', "/");
    (!rel.is_empty()).then(|| format!("{rel}/"))
}

impl ExecutionAdapter for ProcessAdapter {
    fn run<'a>(&'a self, dispatch: &'a Dispatch) -> AdapterFuture<'a> {
        Box::pin(self.attempt(dispatch))
    }
}

/// Instructions written to the agent's stdin.
fn compose_prompt(
    dispatch: &Dispatch,
    packet: &str,
    contract: &PacketContract,
    mode: ValidationMode,
) -> String {
    let bullets = |items: &[String]| {
        if items.is_empty() {
            "- (none parsed)".to_string()
        } else {
            items
                .iter()
                .map(|i| format!("- `{i}`"))
                .collect::<Vec<_>>()
                .join("\n")
        }
    };
    let validation_step = match mode {
        ValidationMode::Worker => "Run the validation commands below before exiting.",
        ValidationMode::Orchestrator => {
            "Do not run the validation commands; the scheduler runs them after you report completed."
        }
    };

    let profile = dispatch
        .profile
        .as_ref()
        .map(|p| format!("Target model profile: {p}\n"))
        .unwrap_or_default();
    let previous = dispatch
        .previous_failure
        .as_deref()
        .map(|f| {
            format!(
                "\nPrevious attempt failed:\n{}\nAddress this directly before making new changes.\n",
                output_tail(f, PREVIOUS_FAILURE_LINES)
            )
        })
        .unwrap_or_default();

    format!(
        "You are executing packet {task} (attempt {attempt}).\n\
         Packet path: {packet}\n\
         {profile}{previous}\
         \n\
         1. Read and carry out the packet.\n\
         2. Edit only the allowed files below.\n\
         3. {validation_step}\n\
         4. If blocked, name the exact failing command or missing input.\n\
         \n\
         Allowed files:\n{allowed}\n\
         \n\
         Validation commands:\n{commands}\n\
         \n\
         Finish with this block:\n\
         [TASK] {task}\n\
         [STATE] completed|blocked\n\
         [FILES] comma-separated paths you changed, or none\n\
         [VALIDATION] what you ran\n\
         [EVIDENCE] key output lines\n\
         [BLOCKERS] none|...\n",
        task = dispatch.task_id,
        attempt = dispatch.attempt_number,
        allowed = bullets(&contract.allowed_files),
        commands = bullets(&contract.validation_commands),
    )
}
