// src/report.rs

//! Human-readable summary of a ledger snapshot. Pure: no IO.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::engine::RunState;
use crate::ledger::{LedgerState, TaskStatus};
use crate::manifest::TaskId;

const EVIDENCE_WIDTH: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub id: TaskId,
    pub status: TaskStatus,
    pub attempts: usize,
    pub failures: u32,
    /// Last evidence, compacted to one line.
    pub evidence: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub wave: String,
    pub updated_at: DateTime<Utc>,
    pub run_state: RunState,
    pub rows: Vec<ReportRow>,
    /// Every status, including zero counts, in lifecycle order.
    pub counts: Vec<(TaskStatus, usize)>,
    pub blocked: Vec<(TaskId, String)>,
    pub cooling_down: Vec<(TaskId, DateTime<Utc>)>,
}

impl Report {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.counts
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

/// Summarise a snapshot. Cooldowns are judged against `updated_at`.
pub fn render(ledger: &LedgerState) -> Report {
    let rows = ledger
        .tasks
        .iter()
        .map(|r| ReportRow {
            id: r.id.clone(),
            status: r.status,
            attempts: r.attempt_count(),
            failures: r.quota.failure_count,
            evidence: compact_text(r.last_evidence().unwrap_or(""), EVIDENCE_WIDTH),
        })
        .collect();

    let counts = TaskStatus::ALL
        .iter()
        .map(|s| (*s, ledger.count(*s)))
        .collect();

    let blocked = ledger
        .tasks
        .iter()
        .filter(|r| matches!(r.status, TaskStatus::Blocked | TaskStatus::Rejected))
        .map(|r| {
            let reason = r
                .reason
                .as_ref()
                .map(|reason| reason.to_string())
                .unwrap_or_else(|| "no reason recorded".to_string());
            (r.id.clone(), reason)
        })
        .collect();

    let cooling_down = ledger
        .tasks
        .iter()
        .filter(|r| r.status == TaskStatus::Ready)
        .filter_map(|r| {
            r.quota
                .cooldown_until
                .filter(|until| *until > ledger.updated_at)
                .map(|until| (r.id.clone(), until))
        })
        .collect();

    Report {
        wave: ledger.wave.clone(),
        updated_at: ledger.updated_at,
        run_state: ledger.run_state,
        rows,
        counts,
        blocked,
        cooling_down,
    }
}

/// Collapse whitespace onto one line and cut to `max_chars`, marking the
/// cut with `...`.
pub fn compact_text(text: &str, max_chars: usize) -> String {
    let joined = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if joined.chars().count() <= max_chars {
        return joined;
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = joined.chars().take(keep).collect();
    out.push_str("...");
    out
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wave = if self.wave.is_empty() { "-" } else { self.wave.as_str() };
        writeln!(f, "wave: {wave}")?;
        writeln!(f, "updated: {}", self.updated_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "run state: {}", self.run_state)?;
        writeln!(f)?;

        let id_width = self
            .rows
            .iter()
            .map(|r| r.id.len())
            .max()
            .unwrap_or(2)
            .max(2);
        writeln!(
            f,
            "{:<id_width$}  {:<9}  {:>8}  {:>8}  evidence",
            "id", "status", "attempts", "failures"
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<id_width$}  {:<9}  {:>8}  {:>8}  {}",
                row.id,
                row.status.as_str(),
                row.attempts,
                row.failures,
                row.evidence
            )?;
        }
        writeln!(f)?;

        let counts = self
            .counts
            .iter()
            .map(|(s, n)| format!("{s}={n}"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(f, "counts: {counts}")?;

        if !self.blocked.is_empty() {
            writeln!(f)?;
            writeln!(f, "blocked tasks:")?;
            for (id, reason) in &self.blocked {
                writeln!(f, "  {id}: {reason}")?;
            }
        }

        if !self.cooling_down.is_empty() {
            writeln!(f)?;
            writeln!(f, "cooling down:")?;
            for (id, until) in &self.cooling_down {
                writeln!(f, "  {id}: until {}", until.format("%Y-%m-%d %H:%M:%S UTC"))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::compact_text;

    #[test]
    fn compact_text_collapses_and_truncates() {
        assert_eq!(compact_text("  a\n\n b  c ", 60), "a b c");
        assert_eq!(compact_text("abcdefghij", 8), "abcde...");
        assert_eq!(compact_text("", 8), "");
    }
}
