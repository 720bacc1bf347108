// src/engine/plan.rs

//! Dry-run planning: dispatch rounds assuming every attempt succeeds.
//!
//! Cooldowns are ignored and nothing is executed or persisted. Parallel
//! hints only annotate the output; they never change a round.

use std::collections::HashMap;
use std::fmt;

use crate::dag::DagGraph;
use crate::ledger::{LedgerState, TaskStatus};
use crate::manifest::TaskId;

/// One admission round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRound {
    /// 1-based.
    pub index: usize,
    /// Tasks dispatched in this round, manifest order.
    pub dispatched: Vec<TaskId>,
    /// Ready tasks that did not fit under `max_parallel`.
    pub deferred: Vec<TaskId>,
    /// Per-task parallel-hint annotations.
    pub hints: Vec<(TaskId, Vec<TaskId>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DryRunPlan {
    pub max_parallel: usize,
    /// Completed before planning starts (e.g. on resume).
    pub already_completed: Vec<TaskId>,
    pub rounds: Vec<PlanRound>,
    /// Never dispatched even under all-success: blocked or rejected
    /// upstream, or blocked themselves.
    pub unreachable: Vec<(TaskId, TaskStatus)>,
}

impl DryRunPlan {
    /// Simulate from the given ledger snapshot.
    pub fn simulate(graph: &DagGraph, snapshot: &LedgerState, max_parallel: usize) -> Self {
        let max_parallel = max_parallel.max(1);
        let mut status: HashMap<&str, TaskStatus> = graph
            .tasks()
            .map(|id| (id, snapshot.status_of(id).unwrap_or(TaskStatus::Blocked)))
            .collect();

        let already_completed = graph
            .tasks()
            .filter(|id| status.get(id) == Some(&TaskStatus::Completed))
            .map(str::to_string)
            .collect();

        // Anything left running in the snapshot is treated as ready again,
        // the way resume treats it.
        for value in status.values_mut() {
            if *value == TaskStatus::Running {
                *value = TaskStatus::Ready;
            }
        }

        let mut rounds = Vec::new();
        loop {
            promote(graph, snapshot, &mut status);

            let ready: Vec<&str> = graph
                .tasks()
                .filter(|id| status.get(id) == Some(&TaskStatus::Ready))
                .collect();
            if ready.is_empty() {
                break;
            }

            let (now, later) = ready.split_at(ready.len().min(max_parallel));
            for id in now {
                status.insert(*id, TaskStatus::Completed);
            }

            let hints = now
                .iter()
                .filter(|id| !graph.parallel_hints_of(id).is_empty())
                .map(|id| (id.to_string(), graph.parallel_hints_of(id).to_vec()))
                .collect();

            rounds.push(PlanRound {
                index: rounds.len() + 1,
                dispatched: now.iter().map(|s| s.to_string()).collect(),
                deferred: later.iter().map(|s| s.to_string()).collect(),
                hints,
            });
        }

        let unreachable = graph
            .tasks()
            .filter_map(|id| match status.get(id) {
                Some(TaskStatus::Completed) | None => None,
                Some(s) => Some((id.to_string(), *s)),
            })
            .collect();

        Self {
            max_parallel,
            already_completed,
            rounds,
            unreachable,
        }
    }

    pub fn total_dispatched(&self) -> usize {
        self.rounds.iter().map(|r| r.dispatched.len()).sum()
    }
}

/// Promote awaiting tasks whose dependencies are all completed. Tasks whose
/// snapshot reason is anything other than awaiting stay put.
fn promote<'a>(graph: &'a DagGraph, snapshot: &LedgerState, status: &mut HashMap<&'a str, TaskStatus>) {
    for id in graph.tasks() {
        if status.get(id) != Some(&TaskStatus::Blocked) {
            continue;
        }
        let awaiting = snapshot
            .task(id)
            .is_none_or(|r| r.is_awaiting_dependencies());
        let deps_done = graph
            .dependencies_of(id)
            .iter()
            .all(|dep| status.get(dep.as_str()) == Some(&TaskStatus::Completed));
        if awaiting && deps_done {
            status.insert(id, TaskStatus::Ready);
        }
    }
}

impl fmt::Display for DryRunPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dry-run plan (max_parallel={})", self.max_parallel)?;
        if !self.already_completed.is_empty() {
            writeln!(f, "already completed: {}", self.already_completed.join(", "))?;
        }
        if self.rounds.is_empty() {
            writeln!(f, "nothing to dispatch")?;
        }
        for round in &self.rounds {
            writeln!(f, "round {}: {}", round.index, round.dispatched.join(", "))?;
            for (id, peers) in &round.hints {
                writeln!(f, "    hint: {id} may run alongside {}", peers.join(", "))?;
            }
            if !round.deferred.is_empty() {
                writeln!(f, "    deferred: {}", round.deferred.join(", "))?;
            }
        }
        for (id, status) in &self.unreachable {
            writeln!(f, "not reachable: {id} ({status})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use crate::manifest::{Manifest, RawManifest, RawTask};

    fn task(id: &str, deps: &[&str]) -> RawTask {
        RawTask {
            id: id.to_string(),
            backlog: None,
            packet: format!("packets/{id}.md"),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            can_run_in_parallel_with: Vec::new(),
        }
    }

    fn manifest(tasks: Vec<RawTask>) -> Manifest {
        Manifest::try_from(RawManifest {
            wave: "w".to_string(),
            generated_at: None,
            tasks,
        })
        .unwrap()
    }

    #[test]
    fn diamond_plans_in_three_rounds() {
        let m = manifest(vec![
            task("A", &[]),
            task("B", &["A"]),
            task("C", &["A"]),
            task("D", &["B", "C"]),
        ]);
        let graph = DagGraph::from_manifest(&m);
        let ledger = Ledger::in_memory(&m, &graph);

        let plan = DryRunPlan::simulate(&graph, ledger.state(), 2);
        let rounds: Vec<Vec<TaskId>> = plan.rounds.iter().map(|r| r.dispatched.clone()).collect();
        assert_eq!(
            rounds,
            vec![
                vec!["A".to_string()],
                vec!["B".to_string(), "C".to_string()],
                vec!["D".to_string()],
            ]
        );
        assert!(plan.unreachable.is_empty());
    }

    #[test]
    fn max_parallel_defers_in_manifest_order() {
        let m = manifest(vec![task("A", &[]), task("B", &[]), task("C", &[])]);
        let graph = DagGraph::from_manifest(&m);
        let ledger = Ledger::in_memory(&m, &graph);

        let plan = DryRunPlan::simulate(&graph, ledger.state(), 1);
        assert_eq!(plan.rounds.len(), 3);
        assert_eq!(plan.rounds[0].deferred, vec!["B".to_string(), "C".to_string()]);
        assert_eq!(plan.total_dispatched(), 3);
    }

    #[test]
    fn hinted_peers_share_a_round_and_their_join_follows() {
        let mut a = task("A", &[]);
        a.can_run_in_parallel_with = vec!["B".to_string()];
        let mut b = task("B", &[]);
        b.can_run_in_parallel_with = vec!["A".to_string()];
        let m = manifest(vec![a, b, task("C", &["A", "B"])]);
        let graph = DagGraph::from_manifest(&m);
        let ledger = Ledger::in_memory(&m, &graph);

        let plan = DryRunPlan::simulate(&graph, ledger.state(), 2);
        let rounds: Vec<Vec<TaskId>> = plan.rounds.iter().map(|r| r.dispatched.clone()).collect();
        assert_eq!(
            rounds,
            vec![vec!["A".to_string(), "B".to_string()], vec!["C".to_string()]]
        );
        assert_eq!(
            plan.rounds[0].hints,
            vec![
                ("A".to_string(), vec!["B".to_string()]),
                ("B".to_string(), vec!["A".to_string()]),
            ]
        );
        assert!(plan.rounds[1].hints.is_empty());
        assert!(plan.to_string().contains("hint: A may run alongside B"));
    }
}
