#![allow(dead_code)]

pub use wavesched_test_utils::{builders, init_tracing, scripted, with_timeout};

use chrono::{DateTime, TimeZone, Utc};
use wavesched::dag::DagGraph;
use wavesched::engine::Scheduler;
use wavesched::ledger::Ledger;
use wavesched::manifest::Manifest;
use wavesched::quota::{QuotaPolicy, QuotaSettings};

pub fn quota(cooldown_seconds: u64, max_failures_per_task: u32, fail_fast: bool) -> QuotaSettings {
    QuotaSettings {
        cooldown_seconds,
        max_failures_per_task,
        fail_fast,
    }
}

/// Scheduler over an in-memory ledger.
pub fn scheduler_for(
    manifest: &Manifest,
    settings: QuotaSettings,
    max_parallel: usize,
) -> (Scheduler, Ledger) {
    let graph = DagGraph::from_manifest(manifest);
    let ledger = Ledger::in_memory(manifest, &graph);
    let scheduler = Scheduler::new(graph, QuotaPolicy::new(settings), max_parallel, ledger.state());
    (scheduler, ledger)
}

/// Fixed instant so cooldown arithmetic is deterministic.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap()
}

pub fn ids(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
