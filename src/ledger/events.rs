// src/ledger/events.rs

//! Append-only event stream (`events.jsonl`) written beside the ledger.
//!
//! The ledger is the source of truth; this stream is a readable history of
//! how it got there. One JSON object per line, never rewritten. A failed
//! append is logged and does not fail the run.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::errors::{Result, WaveError};
use crate::manifest::TaskId;

pub const EVENTS_FILE_NAME: &str = "events.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunState,
    TaskLaunched,
    TaskCompleted,
    TaskBlocked,
    TaskRetry,
    TaskRejected,
    TaskPromoted,
    Escalation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub time: DateTime<Utc>,
    pub event: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskId>,
    pub message: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl RunEvent {
    pub fn new(event: EventKind, task: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            event,
            task: task.map(str::to_string),
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.details.insert(key.to_string(), value);
        }
        self
    }
}

/// Where events go; a log without a path drops them.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    path: Option<PathBuf>,
}

impl EventLog {
    /// Events for the ledger at `ledger_path`, in the same directory.
    pub fn beside(ledger_path: &Path) -> Self {
        Self {
            path: Some(ledger_path.with_file_name(EVENTS_FILE_NAME)),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn emit(&self, event: &RunEvent) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        if let Err(e) = append_line(path, event) {
            warn!(path = %path.display(), error = %e, "failed to append run event");
        }
    }
}

fn append_line(path: &Path, event: &RunEvent) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Read every event from an `events.jsonl` file.
pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<RunEvent>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .map_err(|e| WaveError::Ledger(format!("read events {}: {e}", path.display())))?;
    contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str(l)
                .map_err(|e| WaveError::Ledger(format!("parse events {}: {e}", path.display())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_append_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::beside(&dir.path().join("ledger.json"));
        log.emit(&RunEvent::new(EventKind::TaskLaunched, Some("A"), "A attempt 1 launched").with("attempt", 1));
        log.emit(&RunEvent::new(EventKind::RunState, None, "run done").with("run_state", "done"));

        let path = dir.path().join(EVENTS_FILE_NAME);
        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.lines().next().unwrap().contains(r#""event":"task_launched""#));

        let events = read_events(&path).unwrap();
        assert_eq!(events[0].task.as_deref(), Some("A"));
        assert_eq!(events[0].details["attempt"], 1);
        assert_eq!(events[1].task, None);
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let log = EventLog::disabled();
        log.emit(&RunEvent::new(EventKind::RunState, None, "ignored"));
        assert!(log.path().is_none());
    }
}
