// tests/config_resolution.rs

use std::fs;

use clap::Parser;
use wavesched::cli::CliArgs;
use wavesched::config::{ValidationMode, resolve};
use wavesched::errors::WaveError;

fn args(extra: &[&str]) -> CliArgs {
    CliArgs::parse_from(std::iter::once("wavesched").chain(extra.iter().copied()))
}

#[test]
fn cli_flags_override_the_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Wavesched.toml");
    fs::write(
        &path,
        r#"
[scheduler]
max_parallel = 4
ledger_path = "state/ledger.json"

[quota]
cooldown_seconds = 60
fail_fast = false

[executor]
mode = "orchestrator"
worker_command = "agent --packet {packet_q}"
"#,
    )
    .unwrap();
    let config = path.to_str().unwrap();

    let from_file = resolve(&args(&["--config", config])).unwrap();
    assert_eq!(from_file.scheduler.max_parallel, 4);
    assert_eq!(from_file.quota.cooldown_seconds, 60);
    assert_eq!(from_file.quota.max_failures_per_task, 3);
    assert_eq!(from_file.executor.mode, ValidationMode::Orchestrator);

    let overridden = resolve(&args(&[
        "--config",
        config,
        "--max-parallel",
        "2",
        "--quota-cooldown-seconds",
        "0",
        "--quota-fail-fast",
        "--validation-executor",
        "worker",
        "--ledger",
        "other.json",
    ]))
    .unwrap();
    assert_eq!(overridden.scheduler.max_parallel, 2);
    assert_eq!(overridden.quota.cooldown_seconds, 0);
    assert!(overridden.quota.fail_fast);
    assert_eq!(overridden.executor.mode, ValidationMode::Worker);
    assert_eq!(overridden.scheduler.ledger_path.to_str(), Some("other.json"));
    assert_eq!(
        overridden.executor.worker_command.as_deref(),
        Some("agent --packet {packet_q}")
    );
}

#[test]
fn explicit_config_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    let err = resolve(&args(&["--config", missing.to_str().unwrap()])).unwrap_err();
    assert!(matches!(err, WaveError::ConfigError(_)));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn out_of_range_controls_are_rejected() {
    let err = resolve(&args(&["--max-parallel", "0"])).unwrap_err();
    assert!(err.to_string().contains("max_parallel"));

    let err = resolve(&args(&["--quota-max-failures-per-task", "0"])).unwrap_err();
    assert!(err.to_string().contains("max_failures_per_task"));

    let err = resolve(&args(&["--worker-command", "agent {model}"])).unwrap_err();
    assert!(err.to_string().contains("{model}"));
}

#[test]
fn malformed_settings_file_is_a_toml_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[scheduler\nmax_parallel = ").unwrap();
    let err = resolve(&args(&["--config", path.to_str().unwrap()])).unwrap_err();
    assert!(matches!(err, WaveError::TomlError(_)));
}

#[test]
fn resume_is_the_default() {
    assert!(args(&[]).resume());
    assert!(!args(&["--no-resume"]).resume());
    assert_eq!(args(&[]).manifest, "manifest.json");
}
