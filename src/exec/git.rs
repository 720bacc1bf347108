// src/exec/git.rs

//! Git plumbing for per-task worktrees and the changed-file scope audit.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::ExecutionError;
use crate::exec::process::ProcessOutput;

const GIT_TIMEOUT: Duration = Duration::from_secs(120);

static SLUG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Run `git` with `args` in `cwd`.
pub async fn git(args: &[&str], cwd: &Path) -> Result<ProcessOutput, ExecutionError> {
    let launch = |reason: String| ExecutionError::Launch {
        what: format!("git {}", args.join(" ")),
        reason,
    };

    let child = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| launch(e.to_string()))?;

    let output = tokio::time::timeout(GIT_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| launch(format!("timed out after {}s", GIT_TIMEOUT.as_secs())))?
        .map_err(|e| launch(e.to_string()))?;

    Ok(ProcessOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// `wavesched/<task>-<packet stem>`, lowercased and slugged.
pub fn branch_name(task_id: &str, packet_ref: &str) -> String {
    let stem = Path::new(packet_ref)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("wavesched/{}-{}", slug(task_id), slug(&stem))
}

pub fn worktree_dir(root: &Path, task_id: &str) -> PathBuf {
    root.join(slug(task_id))
}

fn slug(value: &str) -> String {
    let lowered = value.to_lowercase();
    let slug = SLUG_RE.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug.to_string()
    }
}

/// Make sure `path` is a worktree of `repo` on `branch`.
///
/// An existing worktree is reused as is, so a retry continues from the
/// previous attempt's edits. A new one checks out `branch` if it exists,
/// otherwise creates it from `base_ref`.
pub async fn ensure_worktree(
    repo: &Path,
    path: &Path,
    branch: &str,
    base_ref: &str,
) -> Result<(), ExecutionError> {
    if path.exists() {
        let inside = git(&["rev-parse", "--is-inside-work-tree"], path).await?;
        if !inside.success() {
            return Err(ExecutionError::Launch {
                what: "git worktree".to_string(),
                reason: format!("{} exists but is not a git worktree", path.display()),
            });
        }
        debug!(path = %path.display(), "reusing task worktree");
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ExecutionError::Launch {
                what: "git worktree".to_string(),
                reason: format!("create {}: {e}", parent.display()),
            })?;
    }

    let target = path.to_string_lossy().into_owned();
    let exists = git(&["rev-parse", "--verify", "--quiet", branch], repo)
        .await?
        .success();
    let args: Vec<&str> = if exists {
        vec!["worktree", "add", target.as_str(), branch]
    } else {
        vec!["worktree", "add", "-b", branch, target.as_str(), base_ref]
    };

    let out = git(&args, repo).await?;
    if !out.success() {
        return Err(ExecutionError::Launch {
            what: "git worktree".to_string(),
            reason: out.combined(),
        });
    }
    info!(path = %path.display(), branch, reused_branch = exists, "created task worktree");
    Ok(())
}

/// Files git sees as modified, staged or untracked under `dir`, relative
/// to `dir`, sorted and deduplicated. A failing listing contributes nothing.
pub async fn changed_files(dir: &Path) -> Vec<String> {
    let listings: [&[&str]; 3] = [
        &["diff", "--name-only", "--relative"],
        &["diff", "--cached", "--name-only", "--relative"],
        &["ls-files", "--others", "--exclude-standard"],
    ];

    let mut files = Vec::new();
    for args in listings {
        match git(args, dir).await {
            Ok(out) if out.success() => files.extend(
                out.stdout
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string),
            ),
            Ok(out) => warn!(dir = %dir.display(), ?args, code = out.code, "git listing failed"),
            Err(e) => warn!(dir = %dir.display(), error = %e, "git listing failed"),
        }
    }
    files.sort();
    files.dedup();
    files
}
