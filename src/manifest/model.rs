// src/manifest/model.rs

use serde::{Deserialize, Serialize};

/// Canonical task identifier used throughout the crate.
pub type TaskId = String;

/// Manifest document exactly as it appears on disk.
///
/// ```json
/// {
///   "wave": "wave_b",
///   "generated_at": "2026-01-05T10:00:00Z",
///   "tasks": [
///     { "id": "WB01", "packet": "docs/packets/WB01.md",
///       "depends_on": [], "can_run_in_parallel_with": ["WB02"] }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawManifest {
    #[serde(default)]
    pub wave: String,

    #[serde(default)]
    pub generated_at: Option<String>,

    pub tasks: Vec<RawTask>,
}

/// One `tasks[]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTask {
    pub id: TaskId,

    /// Opaque reference to the backlog entry this packet came from.
    #[serde(default)]
    pub backlog: Option<String>,

    /// Opaque reference to the packet document handed to the agent.
    pub packet: String,

    /// Hard ordering: every listed task must be `completed` first.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,

    /// Advisory only. Never consulted for admission or ordering.
    #[serde(default)]
    pub can_run_in_parallel_with: Vec<TaskId>,
}

/// A validated task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub depends_on: Vec<TaskId>,
    pub parallel_hint: Vec<TaskId>,
    pub backlog_ref: Option<String>,
    pub packet_ref: String,
}

impl From<RawTask> for Task {
    fn from(raw: RawTask) -> Self {
        Self {
            id: raw.id,
            depends_on: raw.depends_on,
            parallel_hint: raw.can_run_in_parallel_with,
            backlog_ref: raw.backlog,
            packet_ref: raw.packet,
        }
    }
}

/// Immutable, validated snapshot of one wave's task graph.
///
/// Only obtainable through `TryFrom<RawManifest>` (see `validate.rs`), so a
/// `Manifest` in hand is known to be acyclic with no dangling references.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub wave: String,
    pub generated_at: Option<String>,
    /// Tasks in declaration order. This order is the dispatch tie-break.
    pub tasks: Vec<Task>,
    /// blake3 digest of the manifest content, recorded in the ledger.
    pub digest: String,
}

impl Manifest {
    pub(crate) fn new_unchecked(
        wave: String,
        generated_at: Option<String>,
        tasks: Vec<Task>,
        digest: String,
    ) -> Self {
        Self {
            wave,
            generated_at,
            tasks,
            digest,
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
