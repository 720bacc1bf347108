// tests/report.rs

mod common;
use crate::common::builders::ManifestBuilder;
use crate::common::{quota, scheduler_for};

use chrono::Utc;
use wavesched::errors::ExecutionError;
use wavesched::exec::AdapterOutcome;
use wavesched::ledger::TaskStatus;
use wavesched::report::render;

#[test]
fn report_summarises_statuses_blockers_and_cooldowns() {
    let manifest = ManifestBuilder::new("wave_r")
        .task("A", &[])
        .task("B", &["A"])
        .task("C", &[])
        .task("D", &["C"])
        .task("E", &[])
        .build();
    let (mut scheduler, mut ledger) = scheduler_for(&manifest, quota(900, 3, false), 3);

    let now = Utc::now();
    let dispatched: Vec<String> = scheduler
        .dispatch_round(&mut ledger, now)
        .unwrap()
        .into_iter()
        .map(|d| d.task_id)
        .collect();
    assert_eq!(dispatched, vec!["A", "C", "E"]);

    let noisy = format!("first line\n\n   {}", "x".repeat(200));
    scheduler
        .complete(
            &mut ledger,
            "A",
            1,
            Err(ExecutionError::NonZeroExit { code: 2, output_tail: noisy }),
            now,
        )
        .unwrap();
    scheduler
        .complete(&mut ledger, "C", 1, Ok(AdapterOutcome::blocked("needs schema")), now)
        .unwrap();

    let report = render(ledger.state());
    assert_eq!(report.wave, "wave_r");
    assert_eq!(report.count(TaskStatus::Ready), 1);
    assert_eq!(report.count(TaskStatus::Running), 1);
    assert_eq!(report.count(TaskStatus::Blocked), 3);
    assert_eq!(report.count(TaskStatus::Completed), 0);
    assert_eq!(report.counts.len(), TaskStatus::ALL.len());

    let blocked: Vec<(&str, &str)> = report
        .blocked
        .iter()
        .map(|(id, reason)| (id.as_str(), reason.as_str()))
        .collect();
    assert_eq!(
        blocked,
        vec![
            ("B", "awaiting dependencies"),
            ("C", "agent reported blocked"),
            ("D", "dependency C can no longer complete"),
        ]
    );

    assert_eq!(report.cooling_down.len(), 1);
    assert_eq!(report.cooling_down[0].0, "A");

    let a = report.rows.iter().find(|r| r.id == "A").unwrap();
    assert_eq!(a.attempts, 1);
    assert_eq!(a.failures, 1);
    assert!(!a.evidence.contains('\n'));
    assert!(a.evidence.ends_with("..."));
    assert!(a.evidence.starts_with("code-generation agent exited with code 2 first line"));

    let text = report.to_string();
    assert!(text.contains("wave: wave_r"));
    assert!(text.contains("counts: ready=1 running=1 completed=0 blocked=3 rejected=0"));
    assert!(text.contains("blocked tasks:"));
    assert!(text.contains("  D: dependency C can no longer complete"));
    assert!(text.contains("cooling down:"));
}

#[test]
fn finished_snapshot_has_no_blockers_or_cooldowns() {
    let manifest = ManifestBuilder::new("wave_ok").task("A", &[]).build();
    let (mut scheduler, mut ledger) = scheduler_for(&manifest, quota(900, 3, false), 1);
    let now = Utc::now();

    scheduler.dispatch_round(&mut ledger, now).unwrap();
    scheduler
        .complete(&mut ledger, "A", 1, Ok(AdapterOutcome::completed("all green")), now)
        .unwrap();

    let report = render(ledger.state());
    assert_eq!(report.count(TaskStatus::Completed), 1);
    assert!(report.blocked.is_empty());
    assert!(report.cooling_down.is_empty());
    assert_eq!(report.rows[0].evidence, "all green");

    let text = report.to_string();
    assert!(!text.contains("blocked tasks:"));
    assert!(!text.contains("cooling down:"));
}
