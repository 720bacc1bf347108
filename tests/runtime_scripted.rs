// tests/runtime_scripted.rs

mod common;
use crate::common::builders::ManifestBuilder;
use crate::common::scripted::{ScriptedAdapter, Step};
use crate::common::{ids, init_tracing, quota, with_timeout};

use std::sync::Arc;
use std::time::{Duration, Instant};

use wavesched::dag::DagGraph;
use wavesched::engine::{RunState, Runtime, RuntimeEvent, RuntimeOptions, Scheduler};
use wavesched::errors::WaveError;
use wavesched::escalation::{EscalationPolicy, EscalationSettings, ProfileLadder};
use wavesched::exec::FailureKind;
use wavesched::ledger::{EventKind, Ledger, StatusReason, TaskStatus, read_events, read_snapshot};
use wavesched::manifest::Manifest;
use wavesched::quota::{QuotaPolicy, QuotaSettings};

fn runtime(
    manifest: &Manifest,
    settings: QuotaSettings,
    max_parallel: usize,
    adapter: &Arc<ScriptedAdapter>,
    options: RuntimeOptions,
) -> Runtime {
    let graph = DagGraph::from_manifest(manifest);
    let ledger = Ledger::in_memory(manifest, &graph);
    let scheduler = Scheduler::new(graph, QuotaPolicy::new(settings), max_parallel, ledger.state());
    Runtime::new(scheduler, ledger, adapter.clone(), options)
}

#[tokio::test]
async fn chain_and_fan_out_run_to_done() {
    init_tracing();
    let manifest = ManifestBuilder::new("wave_a")
        .task("A", &[])
        .task("B", &["A"])
        .task("C", &["A"])
        .task("D", &["B", "C"])
        .build();
    let adapter = Arc::new(ScriptedAdapter::new());
    let rt = runtime(&manifest, quota(900, 3, false), 2, &adapter, RuntimeOptions::default());

    let report = with_timeout(rt.run()).await.unwrap();
    assert_eq!(report.run_state, RunState::Done);
    assert_eq!(report.dispatched, 4);
    assert_eq!(report.ledger.count(TaskStatus::Completed), 4);

    let order = adapter.dispatched_tasks();
    assert_eq!(order.first().map(String::as_str), Some("A"));
    assert_eq!(order.last().map(String::as_str), Some("D"));
    assert!(report.into_result().is_ok());
}

#[tokio::test]
async fn concurrency_never_exceeds_max_parallel() {
    init_tracing();
    let mut builder = ManifestBuilder::new("wide");
    for i in 0..8 {
        builder = builder.task(&format!("T{i}"), &[]);
    }
    let manifest = builder.build();
    let adapter = Arc::new(ScriptedAdapter::new().with_default_delay(Duration::from_millis(20)));
    let rt = runtime(&manifest, quota(900, 3, false), 3, &adapter, RuntimeOptions::default());

    let report = with_timeout(rt.run()).await.unwrap();
    assert_eq!(report.run_state, RunState::Done);
    assert!(adapter.peak_concurrency() <= 3, "peak was {}", adapter.peak_concurrency());
    assert!(adapter.peak_concurrency() >= 2);
}

#[tokio::test]
async fn failure_is_retried_after_zero_cooldown() {
    init_tracing();
    let manifest = ManifestBuilder::new("retry").task("A", &[]).task("B", &["A"]).build();
    let adapter = Arc::new(
        ScriptedAdapter::new().script("A", [Step::fail("error: could not compile `x`"), Step::Complete]),
    );
    let rt = runtime(&manifest, quota(0, 3, false), 1, &adapter, RuntimeOptions::default());

    let report = with_timeout(rt.run()).await.unwrap();
    assert_eq!(report.run_state, RunState::Done);
    assert_eq!(adapter.dispatch_log(), vec![
        ("A".to_string(), 1),
        ("A".to_string(), 2),
        ("B".to_string(), 1),
    ]);

    let a = report.ledger.task("A").unwrap();
    assert_eq!(a.attempts[0].failure_kind, Some(FailureKind::Compile));
    assert_eq!(a.quota.failure_count, 0, "success resets the failure count");
    assert!(a.quota.cooldown_until.is_none());
}

#[tokio::test]
async fn runtime_sleeps_until_cooldown_expires() {
    init_tracing();
    let manifest = ManifestBuilder::new("cool").task("A", &[]).build();
    let adapter = Arc::new(ScriptedAdapter::new().script("A", [Step::fail("boom"), Step::Complete]));
    let rt = runtime(&manifest, quota(1, 3, false), 1, &adapter, RuntimeOptions::default());

    let started = Instant::now();
    let report = with_timeout(rt.run()).await.unwrap();
    assert_eq!(report.run_state, RunState::Done);
    assert_eq!(adapter.attempts_of("A"), 2);
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn fail_fast_lets_running_work_finish_then_halts() {
    init_tracing();
    let manifest = ManifestBuilder::new("ff")
        .task("X", &[])
        .task("Z", &[])
        .task("W", &[])
        .build();
    let adapter = Arc::new(
        ScriptedAdapter::new()
            .always("X", Step::fail("boom"))
            .with_delay("Z", Duration::from_millis(100)),
    );
    let rt = runtime(&manifest, quota(900, 1, true), 2, &adapter, RuntimeOptions::default());

    let report = with_timeout(rt.run()).await.unwrap();
    assert_eq!(report.run_state, RunState::Halted);
    assert_eq!(report.halted_by.as_deref(), Some("X"));
    assert_eq!(report.ledger.status_of("X"), Some(TaskStatus::Rejected));
    assert_eq!(report.ledger.status_of("Z"), Some(TaskStatus::Completed));
    assert_eq!(report.ledger.status_of("W"), Some(TaskStatus::Ready));
    assert_eq!(adapter.attempts_of("W"), 0);

    let err = report.into_result().unwrap_err();
    assert!(matches!(err, WaveError::RunHalted { ref task } if task == "X"));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn fail_fast_after_a_retry_still_waits_for_running_work() {
    init_tracing();
    let manifest = ManifestBuilder::new("ff2")
        .task("X", &[])
        .task("Z", &[])
        .task("W", &[])
        .build();
    let adapter = Arc::new(
        ScriptedAdapter::new()
            .always("X", Step::fail("boom"))
            .with_delay("Z", Duration::from_millis(200)),
    );
    let rt = runtime(&manifest, quota(0, 2, true), 2, &adapter, RuntimeOptions::default());

    let report = with_timeout(rt.run()).await.unwrap();
    assert_eq!(report.run_state, RunState::Halted);
    assert_eq!(report.halted_by.as_deref(), Some("X"));
    assert_eq!(adapter.attempts_of("X"), 2);
    assert_eq!(adapter.attempts_of("W"), 0);

    let x = report.ledger.task("X").unwrap();
    assert_eq!(x.status, TaskStatus::Rejected);
    assert_eq!(x.attempts.len(), 2);
    assert_eq!(report.ledger.status_of("Z"), Some(TaskStatus::Completed));
    assert_eq!(report.ledger.status_of("W"), Some(TaskStatus::Ready));
}

#[tokio::test]
async fn exhausted_quota_drains_with_rejection() {
    init_tracing();
    let manifest = ManifestBuilder::new("rej")
        .task("A", &[])
        .task("B", &["A"])
        .task("C", &[])
        .build();
    let adapter = Arc::new(ScriptedAdapter::new().always("A", Step::fail("boom")));
    let rt = runtime(&manifest, quota(0, 2, false), 2, &adapter, RuntimeOptions::default());

    let report = with_timeout(rt.run()).await.unwrap();
    assert_eq!(report.run_state, RunState::Drained);
    assert_eq!(adapter.attempts_of("A"), 2);
    assert_eq!(report.ledger.status_of("C"), Some(TaskStatus::Completed));
    assert_eq!(
        report.ledger.task("B").unwrap().reason,
        Some(StatusReason::DependencyFailed {
            dependency: "A".to_string()
        })
    );

    let err = report.into_result().unwrap_err();
    match err {
        WaveError::QuotaExhausted { ref tasks } => assert_eq!(tasks, &ids(&["A"])),
        other => panic!("expected QuotaExhausted, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn reported_blocker_drains_as_unfinished() {
    init_tracing();
    let manifest = ManifestBuilder::new("blk").task("A", &[]).task("B", &["A"]).build();
    let adapter = Arc::new(ScriptedAdapter::new().always("A", Step::Block));
    let rt = runtime(&manifest, quota(900, 3, false), 1, &adapter, RuntimeOptions::default());

    let report = with_timeout(rt.run()).await.unwrap();
    assert_eq!(report.run_state, RunState::Drained);
    assert_eq!(adapter.attempts_of("A"), 1);
    assert_eq!(report.ledger.task("A").unwrap().quota.failure_count, 0);

    match report.into_result().unwrap_err() {
        WaveError::Unfinished { blocked } => assert_eq!(blocked, ids(&["A", "B"])),
        other => panic!("expected Unfinished, got {other:?}"),
    }
}

#[tokio::test]
async fn hung_attempt_times_out_as_infra_failure() {
    init_tracing();
    let manifest = ManifestBuilder::new("hang").task("A", &[]).build();
    let adapter = Arc::new(ScriptedAdapter::new().always("A", Step::Hang));
    let options = RuntimeOptions {
        attempt_timeout: Some(Duration::from_millis(50)),
    };
    let rt = runtime(&manifest, quota(900, 1, false), 1, &adapter, options);

    let report = with_timeout(rt.run()).await.unwrap();
    let a = report.ledger.task("A").unwrap();
    assert_eq!(a.status, TaskStatus::Rejected);
    assert_eq!(a.attempts[0].failure_kind, Some(FailureKind::Infra));
    assert!(a.attempts[0].evidence.contains("timed out"));
}

#[tokio::test]
async fn shutdown_aborts_attempts_and_leaves_tasks_running() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let manifest = ManifestBuilder::new("stop").task("A", &[]).build();
    let graph = DagGraph::from_manifest(&manifest);
    let policy = QuotaPolicy::new(quota(900, 3, false));
    let ledger = Ledger::load(&path, true, &manifest, &graph, &policy).unwrap();
    let scheduler = Scheduler::new(graph, policy, 1, ledger.state());

    let adapter = Arc::new(ScriptedAdapter::new().always("A", Step::Hang));
    let rt = Runtime::new(scheduler, ledger, adapter.clone(), RuntimeOptions::default());
    let events = rt.event_sender();
    let handle = tokio::spawn(rt.run());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(adapter.running(), 1);
    events.send(RuntimeEvent::ShutdownRequested).await.unwrap();

    let report = with_timeout(handle).await.unwrap().unwrap();
    assert_eq!(report.run_state, RunState::Interrupted);
    // The hung attempt was dropped before `run` returned.
    assert_eq!(adapter.running(), 0);
    assert_eq!(report.ledger.status_of("A"), Some(TaskStatus::Running));

    let on_disk = read_snapshot(&path).unwrap();
    assert_eq!(on_disk.run_state, RunState::Interrupted);
    assert!(on_disk.task("A").unwrap().attempts[0].is_open());
    assert_eq!(report.into_result().unwrap_err().exit_code(), 130);
}

#[tokio::test]
async fn finished_run_is_readable_from_disk() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let manifest = ManifestBuilder::new("disk").task("A", &[]).task("B", &["A"]).build();
    let graph = DagGraph::from_manifest(&manifest);
    let policy = QuotaPolicy::new(quota(900, 3, false));
    let ledger = Ledger::load(&path, true, &manifest, &graph, &policy).unwrap();
    let scheduler = Scheduler::new(graph, policy, 1, ledger.state());

    let adapter = Arc::new(
        ScriptedAdapter::new().always("B", Step::CompleteTouching(vec!["src/b.rs".to_string()])),
    );
    let rt = Runtime::new(scheduler, ledger, adapter.clone(), RuntimeOptions::default());
    let report = with_timeout(rt.run()).await.unwrap();
    assert_eq!(report.run_state, RunState::Done);

    let on_disk = read_snapshot(&path).unwrap();
    assert_eq!(on_disk, report.ledger);
    assert_eq!(on_disk.run_state, RunState::Done);
    assert_eq!(on_disk.task("B").unwrap().last_touched_files, ids(&["src/b.rs"]));
}

#[tokio::test]
async fn repeated_compile_failures_escalate_and_are_recorded() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let manifest = ManifestBuilder::new("ladder").task("A", &[]).build();
    let graph = DagGraph::from_manifest(&manifest);
    let policy = QuotaPolicy::new(quota(0, 5, false));
    let ledger = Ledger::load(&path, false, &manifest, &graph, &policy).unwrap();
    let escalation = EscalationPolicy::new(EscalationSettings {
        profiles: "small:low;big:high".parse::<ProfileLadder>().unwrap().0,
        ..EscalationSettings::default()
    });
    let scheduler = Scheduler::new(graph, policy, 1, ledger.state()).with_escalation(escalation, ledger.state());
    let adapter = Arc::new(ScriptedAdapter::new().script(
        "A",
        [
            Step::fail("error[E0308]: mismatched types"),
            Step::fail("error[E0425]: cannot find value"),
            Step::Complete,
        ],
    ));
    let rt = Runtime::new(scheduler, ledger, adapter.clone(), RuntimeOptions::default());

    let report = with_timeout(rt.run()).await.unwrap();
    assert_eq!(report.run_state, RunState::Done);

    let snapshot = read_snapshot(&path).unwrap();
    let a = snapshot.task("A").unwrap();
    let profiles: Vec<String> = a
        .attempts
        .iter()
        .map(|at| at.profile.as_ref().map(ToString::to_string).unwrap_or_default())
        .collect();
    assert_eq!(profiles, ["small/low", "small/low", "big/high"]);
    assert_eq!(a.escalation.profile_index, 1);

    let events = read_events(dir.path().join("events.jsonl")).unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.event).collect();
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::TaskLaunched).count(), 3);
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::TaskRetry).count(), 2);
    assert_eq!(kinds.last(), Some(&EventKind::RunState));

    let escalated = events.iter().find(|e| e.event == EventKind::Escalation).unwrap();
    assert_eq!(escalated.task.as_deref(), Some("A"));
    assert_eq!(escalated.details["to_profile"]["model"], "big");
    let escalated_at = events.iter().position(|e| e.event == EventKind::Escalation).unwrap();
    let completed_at = events.iter().position(|e| e.event == EventKind::TaskCompleted).unwrap();
    assert!(escalated_at < completed_at);
}
