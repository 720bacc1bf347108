// src/config/validate.rs

use crate::config::model::Settings;
use crate::errors::{Result, WaveError};
use crate::escalation::normalize_reasoning;
use crate::exec::template::{BRIDGE_PLACEHOLDERS, CommandTemplate, WORKER_PLACEHOLDERS};

/// Semantic checks on resolved settings.
///
/// `cooldown_seconds = 0` is legal: retries are immediate but the failure
/// ceiling still applies.
pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.scheduler.max_parallel == 0 {
        return Err(WaveError::ConfigError(
            "[scheduler].max_parallel must be >= 1 (got 0)".to_string(),
        ));
    }
    if settings.quota.max_failures_per_task == 0 {
        return Err(WaveError::ConfigError(
            "[quota].max_failures_per_task must be >= 1 (got 0)".to_string(),
        ));
    }
    if settings.executor.command_timeout_seconds == 0 {
        return Err(WaveError::ConfigError(
            "[executor].command_timeout_seconds must be >= 1 (got 0)".to_string(),
        ));
    }

    if settings.escalation.after_compile_failures == 0
        || settings.escalation.after_runtime_failures == 0
    {
        return Err(WaveError::ConfigError(
            "[escalation].after_compile_failures and after_runtime_failures must be >= 1"
                .to_string(),
        ));
    }
    for profile in &settings.escalation.profiles {
        if profile.model.trim().is_empty() {
            return Err(WaveError::ConfigError(
                "[escalation].profiles: model must not be empty".to_string(),
            ));
        }
        if !profile.reasoning.is_empty() {
            normalize_reasoning(&profile.reasoning)?;
        }
    }
    if settings.executor.use_worktrees && settings.executor.base_ref.trim().is_empty() {
        return Err(WaveError::ConfigError(
            "[executor].base_ref must not be empty when use_worktrees is set".to_string(),
        ));
    }

    if let Some(template) = &settings.executor.worker_command {
        CommandTemplate::parse(template, WORKER_PLACEHOLDERS)
            .map_err(|e| WaveError::ConfigError(format!("[executor].worker_command: {e}")))?;
    }
    if let Some(template) = &settings.executor.validation_bridge {
        CommandTemplate::parse(template, BRIDGE_PLACEHOLDERS)
            .map_err(|e| WaveError::ConfigError(format!("[executor].validation_bridge: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_settings(&Settings::default()).is_ok());
    }

    #[test]
    fn zero_cooldown_is_allowed_but_zero_failures_is_not() {
        let mut settings = Settings::default();
        settings.quota.cooldown_seconds = 0;
        assert!(validate_settings(&settings).is_ok());

        settings.quota.max_failures_per_task = 0;
        let err = validate_settings(&settings).unwrap_err();
        assert!(err.to_string().contains("max_failures_per_task"));
    }

    #[test]
    fn unknown_placeholder_in_worker_command_is_rejected() {
        let mut settings = Settings::default();
        settings.executor.worker_command = Some("agent --gpu {gpu} {task_id}".to_string());
        let err = validate_settings(&settings).unwrap_err();
        assert!(err.to_string().contains("gpu"));
    }

    #[test]
    fn escalation_thresholds_and_reasoning_are_checked() {
        let mut settings = Settings::default();
        settings.escalation.after_runtime_failures = 0;
        assert!(validate_settings(&settings).is_err());

        let mut settings: Settings = toml::from_str(
            r#"
            [escalation]
            profiles = [{ model = "small", reasoning = "low" }, { model = "big", reasoning = "warp" }]
            "#,
        )
        .unwrap();
        let err = validate_settings(&settings).unwrap_err();
        assert!(err.to_string().contains("warp"));

        settings.escalation.profiles[1].reasoning = "xhigh".to_string();
        assert!(validate_settings(&settings).is_ok());
        assert_eq!(settings.escalation.after_compile_failures, 2);
    }

    #[test]
    fn settings_file_sections_are_optional() {
        let settings: Settings = toml::from_str(
            r#"
            [quota]
            fail_fast = true
            "#,
        )
        .unwrap();
        assert!(settings.quota.fail_fast);
        assert_eq!(settings.quota.cooldown_seconds, 900);
        assert_eq!(settings.scheduler.max_parallel, 1);
    }
}
