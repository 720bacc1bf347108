// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cli::CliArgs;
use crate::config::model::Settings;
use crate::config::validate::validate_settings;
use crate::errors::{Result, WaveError};
use crate::escalation::{ProfileLadder, normalize_reasoning};

/// Environment fallback for `[executor].worker_command`.
pub const WORKER_COMMAND_ENV: &str = "WAVESCHED_WORKER_COMMAND";

/// Load a settings file without validating it.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        WaveError::ConfigError(format!("reading settings file {}: {e}", path.display()))
    })?;
    let settings: Settings = toml::from_str(&contents)?;
    Ok(settings)
}

/// Resolve run controls: defaults, then the settings file, then CLI flags.
///
/// An explicit `--config` must exist; the default path is optional.
pub fn resolve(args: &CliArgs) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => load_from_path(path)?,
        None => {
            let path = default_config_path();
            if path.exists() {
                debug!(path = %path.display(), "loading default settings file");
                load_from_path(&path)?
            } else {
                Settings::default()
            }
        }
    };

    apply_overrides(&mut settings, args)?;

    if settings.executor.worker_command.is_none() {
        settings.executor.worker_command = std::env::var(WORKER_COMMAND_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty());
    }

    for profile in &mut settings.escalation.profiles {
        if !profile.reasoning.is_empty() {
            profile.reasoning = normalize_reasoning(&profile.reasoning)?;
        }
    }

    validate_settings(&settings)?;
    Ok(settings)
}

fn apply_overrides(settings: &mut Settings, args: &CliArgs) -> Result<()> {
    if let Some(n) = args.max_parallel {
        settings.scheduler.max_parallel = n;
    }
    if let Some(path) = &args.ledger {
        settings.scheduler.ledger_path = PathBuf::from(path);
    }
    if let Some(secs) = args.quota_cooldown_seconds {
        settings.quota.cooldown_seconds = secs;
    }
    if let Some(n) = args.quota_max_failures_per_task {
        settings.quota.max_failures_per_task = n;
    }
    if args.quota_fail_fast {
        settings.quota.fail_fast = true;
    }
    if let Some(mode) = args.validation_executor {
        settings.executor.mode = mode;
    }
    if let Some(cmd) = &args.worker_command {
        settings.executor.worker_command = Some(cmd.clone());
    }
    if args.allow_empty_allowed_files {
        settings.executor.allow_empty_allowed_files = true;
    }
    if args.use_worktrees {
        settings.executor.use_worktrees = true;
    }
    if let Some(root) = &args.worktree_root {
        settings.executor.worktree_root = Some(PathBuf::from(root));
    }
    if let Some(base) = &args.base_ref {
        settings.executor.base_ref = base.clone();
    }
    if let Some(ladder) = &args.profiles {
        settings.escalation.profiles = ladder.parse::<ProfileLadder>()?.0;
    }
    Ok(())
}

/// `Wavesched.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Wavesched.toml")
}
