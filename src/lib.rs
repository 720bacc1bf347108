// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod escalation;
pub mod exec;
pub mod ledger;
pub mod logging;
pub mod manifest;
pub mod quota;
pub mod report;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::Settings;
use crate::dag::DagGraph;
use crate::engine::{DryRunPlan, Runtime, RuntimeEvent, RuntimeOptions, Scheduler};
use crate::errors::{Result, WaveError};
use crate::escalation::EscalationPolicy;
use crate::exec::ProcessAdapter;
use crate::exec::process::timeout_from_secs;
use crate::ledger::{Ledger, read_snapshot};
use crate::manifest::load_and_validate;
use crate::quota::QuotaPolicy;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - settings resolution (file + CLI overrides)
/// - report-only and dry-run modes
/// - manifest, graph, ledger and quota policy
/// - model-profile escalation
/// - the process adapter (worktrees, attempt files) and the runtime loop
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let settings = config::resolve(&args)?;
    let ledger_path = settings.scheduler.ledger_path.clone();

    if args.report {
        return print_report(&ledger_path);
    }

    let manifest = load_and_validate(&args.manifest)?;
    let graph = DagGraph::from_manifest(&manifest);
    let quota = QuotaPolicy::new(settings.quota);
    info!(
        wave = %manifest.wave,
        tasks = manifest.len(),
        resume = args.resume(),
        "manifest loaded"
    );

    if args.dry_run {
        let ledger = Ledger::preview(&ledger_path, args.resume(), &manifest, &graph, &quota)?;
        let plan = DryRunPlan::simulate(&graph, ledger.state(), settings.scheduler.max_parallel);
        print!("{plan}");
        for warning in graph.hint_warnings() {
            println!("warning: {warning}");
        }
        debug!("dry-run complete (no execution)");
        return Ok(());
    }

    let ledger = Ledger::load(&ledger_path, args.resume(), &manifest, &graph, &quota)?;
    let runtime_dir = ledger_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let adapter = ProcessAdapter::new(&settings.executor)?.with_runtime_dir(runtime_dir);
    if let Some(events) = ledger.events_path() {
        info!(events = %events.display(), "recording run events");
    }
    let scheduler = Scheduler::new(graph, quota, settings.scheduler.max_parallel, ledger.state())
        .with_escalation(EscalationPolicy::new(settings.escalation.clone()), ledger.state());
    let runtime = Runtime::new(scheduler, ledger, Arc::new(adapter), runtime_options(&settings));

    // Ctrl-C → graceful shutdown.
    {
        let tx = runtime.event_sender();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let outcome = runtime.run().await?;
    print!("{}", report::render(&outcome.ledger));
    outcome.into_result()
}

fn runtime_options(settings: &Settings) -> RuntimeOptions {
    RuntimeOptions {
        attempt_timeout: timeout_from_secs(settings.scheduler.attempt_timeout_seconds),
    }
}

fn print_report(ledger_path: &Path) -> Result<()> {
    if !ledger_path.exists() {
        return Err(WaveError::MissingLedger {
            path: ledger_path.display().to_string(),
        });
    }
    let snapshot = read_snapshot(ledger_path)?;
    print!("{}", report::render(&snapshot));
    Ok(())
}
