// src/manifest/validate.rs

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::GraphError;
use crate::manifest::model::{Manifest, RawManifest, RawTask, Task};

impl TryFrom<RawManifest> for Manifest {
    type Error = GraphError;

    fn try_from(raw: RawManifest) -> Result<Self, Self::Error> {
        validate_raw_manifest(&raw)?;

        let canonical =
            serde_json::to_vec(&raw).map_err(|e| GraphError::InvalidDocument(e.to_string()))?;
        let digest = blake3::hash(&canonical).to_hex().to_string();

        let tasks = raw.tasks.into_iter().map(Task::from).collect();
        Ok(Manifest::new_unchecked(
            raw.wave,
            raw.generated_at,
            tasks,
            digest,
        ))
    }
}

fn validate_raw_manifest(raw: &RawManifest) -> Result<(), GraphError> {
    ensure_has_tasks(raw)?;
    let ids = ensure_unique_ids(&raw.tasks)?;
    validate_references(&raw.tasks, &ids)?;
    validate_acyclic(&raw.tasks)?;
    Ok(())
}

fn ensure_has_tasks(raw: &RawManifest) -> Result<(), GraphError> {
    if raw.tasks.is_empty() {
        return Err(GraphError::EmptyManifest);
    }
    Ok(())
}

fn ensure_unique_ids(tasks: &[RawTask]) -> Result<HashSet<&str>, GraphError> {
    let mut ids = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if task.id.trim().is_empty() {
            return Err(GraphError::InvalidDocument(
                "task id must not be empty".to_string(),
            ));
        }
        if !ids.insert(task.id.as_str()) {
            return Err(GraphError::DuplicateTask(task.id.clone()));
        }
    }
    Ok(ids)
}

fn validate_references(tasks: &[RawTask], ids: &HashSet<&str>) -> Result<(), GraphError> {
    for task in tasks {
        for dep in &task.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(GraphError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        // Hints are checked for existence only; consistency with
        // `depends_on` is a warning raised by `DagGraph`.
        for hint in &task.can_run_in_parallel_with {
            if !ids.contains(hint.as_str()) {
                return Err(GraphError::UnknownHint {
                    task: task.id.clone(),
                    hint: hint.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_acyclic(tasks: &[RawTask]) -> Result<(), GraphError> {
    // Edge direction: task -> dependency, so a reported cycle reads in
    // `depends_on` order (A -> B means "A depends on B").
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for task in tasks {
        graph.add_node(task.id.as_str());
    }
    for task in tasks {
        for dep in &task.depends_on {
            graph.add_edge(task.id.as_str(), dep.as_str(), ());
        }
    }

    if toposort(&graph, None).is_ok() {
        return Ok(());
    }

    let order: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    match find_cycle(&graph, &order) {
        Some(cycle) => Err(GraphError::Cycle(cycle)),
        // toposort and the DFS disagree only if the graph changed underneath.
        None => Err(GraphError::Cycle(Vec::new())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

/// Depth-first search with an explicit frame stack, so chain length is
/// bounded by heap rather than call depth.
///
/// Returns the first cycle found, as the id sequence with the entry id
/// repeated at the end (e.g. `["A", "B", "A"]`).
fn find_cycle<'a>(graph: &DiGraphMap<&'a str, ()>, order: &[&'a str]) -> Option<Vec<String>> {
    let mut marks: HashMap<&'a str, Mark> = HashMap::new();

    for &start in order {
        if marks.contains_key(start) {
            continue;
        }

        marks.insert(start, Mark::OnStack);
        let mut frames = vec![(start, graph.neighbors(start))];

        while let Some((node, neighbors)) = frames.last_mut() {
            let node = *node;
            match neighbors.next() {
                Some(next) => match marks.get(next) {
                    Some(Mark::OnStack) => {
                        let from = frames.iter().position(|(n, _)| *n == next)?;
                        let mut cycle: Vec<String> =
                            frames[from..].iter().map(|(n, _)| n.to_string()).collect();
                        cycle.push(next.to_string());
                        return Some(cycle);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next, Mark::OnStack);
                        frames.push((next, graph.neighbors(next)));
                    }
                },
                None => {
                    marks.insert(node, Mark::Done);
                    frames.pop();
                }
            }
        }
    }
    None
}
