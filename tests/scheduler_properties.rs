// tests/scheduler_properties.rs

mod common;
use crate::common::builders::ManifestBuilder;
use crate::common::{quota, scheduler_for, t0};

use std::collections::{HashSet, VecDeque};

use chrono::TimeDelta;
use proptest::prelude::*;
use wavesched::engine::RunState;
use wavesched::errors::ExecutionError;
use wavesched::exec::AdapterOutcome;
use wavesched::ledger::TaskStatus;
use wavesched::manifest::Manifest;

// Acyclic by construction: task N may only depend on tasks 0..N-1.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Manifest> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), num_tasks)
            .prop_map(move |raw_deps| {
                let mut builder = ManifestBuilder::new("prop");
                for (i, potential) in raw_deps.into_iter().enumerate() {
                    let deps: HashSet<String> = if i == 0 {
                        HashSet::new()
                    } else {
                        potential.into_iter().map(|d| format!("t{}", d % i)).collect()
                    };
                    let mut deps: Vec<&str> = deps.iter().map(String::as_str).collect();
                    deps.sort();
                    builder = builder.task(&format!("t{i}"), &deps);
                }
                builder.build()
            })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn scheduler_invariants_hold_under_random_failures(
        manifest in dag_strategy(10),
        failing_indices in proptest::collection::vec(0..10usize, 0..4),
        max_parallel in 1..4usize,
    ) {
        let names: Vec<String> = manifest.tasks.iter().map(|t| t.id.clone()).collect();
        let failing: HashSet<String> = failing_indices
            .iter()
            .filter(|&&i| i < names.len())
            .map(|&i| names[i].clone())
            .collect();

        let (mut scheduler, mut ledger) = scheduler_for(&manifest, quota(0, 2, false), max_parallel);
        let mut executing: VecDeque<(String, u32)> = VecDeque::new();
        let mut now = t0();
        let mut steps = 0;
        let max_steps = 1000;

        while steps < max_steps {
            steps += 1;

            for dispatch in scheduler.dispatch_round(&mut ledger, now).unwrap() {
                for dep in scheduler.graph().dependencies_of(&dispatch.task_id) {
                    prop_assert_eq!(
                        ledger.status_of(dep),
                        Some(TaskStatus::Completed),
                        "{} dispatched before {}",
                        &dispatch.task_id,
                        dep
                    );
                }
                executing.push_back((dispatch.task_id, dispatch.attempt_number));
            }
            prop_assert!(ledger.state().count(TaskStatus::Running) <= max_parallel);

            let Some((task, attempt)) = executing.pop_front() else {
                break;
            };
            let result = if failing.contains(&task) {
                Err(ExecutionError::NonZeroExit { code: 1, output_tail: "boom".to_string() })
            } else {
                Ok(AdapterOutcome::completed("ok"))
            };
            now += TimeDelta::seconds(1);
            prop_assert!(scheduler.complete(&mut ledger, &task, attempt, result, now).unwrap().is_some());
        }

        prop_assert!(steps < max_steps, "simulation did not terminate");
        prop_assert_eq!(ledger.state().count(TaskStatus::Running), 0);

        let state = scheduler.run_state(ledger.state());
        prop_assert!(state.is_terminal());
        if failing.is_empty() {
            prop_assert_eq!(state, RunState::Done);
        }

        for id in ledger.state().ids_with_status(TaskStatus::Rejected) {
            prop_assert!(failing.contains(&id));
            for dependent in scheduler.graph().transitive_dependents(&id) {
                prop_assert_eq!(ledger.status_of(&dependent), Some(TaskStatus::Blocked));
            }
        }
        for id in &failing {
            prop_assert_ne!(ledger.status_of(id), Some(TaskStatus::Completed));
        }
    }
}
