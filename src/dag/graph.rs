// src/dag/graph.rs

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::manifest::{Manifest, Task, TaskId};

/// Internal node structure: the task plus its immediate dependents.
#[derive(Debug, Clone)]
struct DagNode {
    task: Task,
    /// Direct dependents: tasks that list this one in `depends_on`.
    dependents: Vec<TaskId>,
}

/// In-memory task graph keyed by task id, in manifest declaration order.
///
/// Acyclicity and referential integrity were already checked when the
/// [`Manifest`] was validated; this only keeps adjacency information for
/// scheduling and diagnostics.
#[derive(Debug, Clone)]
pub struct DagGraph {
    order: Vec<TaskId>,
    nodes: HashMap<TaskId, DagNode>,
    hint_warnings: Vec<String>,
}

impl DagGraph {
    /// Build the graph from a validated [`Manifest`].
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let mut nodes: HashMap<TaskId, DagNode> = HashMap::with_capacity(manifest.len());
        let order: Vec<TaskId> = manifest.tasks.iter().map(|t| t.id.clone()).collect();

        for task in &manifest.tasks {
            nodes.insert(
                task.id.clone(),
                DagNode {
                    task: task.clone(),
                    dependents: Vec::new(),
                },
            );
        }

        // Dependents are filled in manifest order so every traversal is
        // deterministic.
        for task in &manifest.tasks {
            for dep in &task.depends_on {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.push(task.id.clone());
                }
            }
        }

        let mut graph = Self {
            order,
            nodes,
            hint_warnings: Vec::new(),
        };
        graph.hint_warnings = graph.check_parallel_hints();
        for warning in &graph.hint_warnings {
            warn!(warning = %warning, "inconsistent parallel hint (advisory only)");
        }
        graph
    }

    /// Task ids in manifest declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.nodes.get(id).map(|n| &n.task)
    }

    /// Immediate dependencies of a task (its `depends_on`).
    pub fn dependencies_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.task.depends_on.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Advisory parallel hints. Never used for admission or ordering.
    pub fn parallel_hints_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.task.parallel_hint.as_slice())
            .unwrap_or(&[])
    }

    /// Every task reachable through `dependents_of`, in manifest order.
    pub fn transitive_dependents(&self, id: &str) -> Vec<TaskId> {
        let reached = self.reach(id, |node| self.dependents_of(node));
        self.in_manifest_order(reached)
    }

    /// Every task reachable through `dependencies_of`, in manifest order.
    pub fn transitive_dependencies(&self, id: &str) -> Vec<TaskId> {
        let reached = self.reach(id, |node| self.dependencies_of(node));
        self.in_manifest_order(reached)
    }

    /// Warnings for hints that contradict `depends_on`.
    pub fn hint_warnings(&self) -> &[String] {
        &self.hint_warnings
    }

    fn reach<'a, F>(&'a self, root: &str, next: F) -> HashSet<&'a str>
    where
        F: Fn(&str) -> &'a [TaskId],
    {
        let mut stack: Vec<&'a str> = next(root).iter().map(|s| s.as_str()).collect();
        let mut visited: HashSet<&'a str> = HashSet::new();

        while let Some(name) = stack.pop() {
            if !visited.insert(name) {
                continue;
            }
            stack.extend(next(name).iter().map(|s| s.as_str()));
        }

        visited
    }

    fn in_manifest_order(&self, set: HashSet<&str>) -> Vec<TaskId> {
        self.order
            .iter()
            .filter(|id| set.contains(id.as_str()))
            .cloned()
            .collect()
    }

    fn check_parallel_hints(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for id in &self.order {
            let hints = self.parallel_hints_of(id);
            if hints.is_empty() {
                continue;
            }
            let upstream: HashSet<TaskId> = self.transitive_dependencies(id).into_iter().collect();
            let downstream: HashSet<TaskId> = self.transitive_dependents(id).into_iter().collect();

            for hint in hints {
                if hint == id {
                    warnings.push(format!("task '{id}' is hinted parallel with itself"));
                } else if upstream.contains(hint) {
                    warnings.push(format!(
                        "task '{id}' is hinted parallel with '{hint}' but depends on it"
                    ));
                } else if downstream.contains(hint) {
                    warnings.push(format!(
                        "task '{id}' is hinted parallel with '{hint}' but '{hint}' depends on it"
                    ));
                }
            }
        }
        warnings
    }
}
