// src/exec/status.rs

//! Status block emitted by the code-generation agent on stdout.
//!
//! ```text
//! [TASK] WB03
//! [STATE] completed
//! [FILES] src/parser.rs, tests/parser.rs
//! [VALIDATION] ran: cargo test -p parser
//! [EVIDENCE] 14 passed
//! [BLOCKERS] none
//! ```
//!
//! Tags may appear anywhere in the output; the last occurrence of each wins.

use crate::errors::ExecutionError;
use crate::exec::backend::TerminalState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBlock {
    pub task: Option<String>,
    pub state: TerminalState,
    pub files: Vec<String>,
    pub validation: Option<String>,
    pub evidence: Option<String>,
    pub blockers: Option<String>,
}

impl StatusBlock {
    /// One-paragraph evidence for the ledger.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(v) = self.validation.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("validation: {v}"));
        }
        if let Some(e) = self.evidence.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("evidence: {e}"));
        }
        if let Some(b) = self.blockers.as_deref().filter(|s| !is_none_marker(s)) {
            parts.push(format!("blockers: {b}"));
        }
        if parts.is_empty() {
            format!("agent reported {}", self.state)
        } else {
            parts.join("; ")
        }
    }
}

/// Parse the status block for `task_id` out of the agent's stdout.
pub fn parse_status_block(task_id: &str, stdout: &str) -> Result<StatusBlock, ExecutionError> {
    let mut task = None;
    let mut state = None;
    let mut files = None;
    let mut validation = None;
    let mut evidence = None;
    let mut blockers = None;

    for line in stdout.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('[') else {
            continue;
        };
        let Some((tag, value)) = rest.split_once(']') else {
            continue;
        };
        let value = value.trim().to_string();
        match tag {
            "TASK" => task = Some(value),
            "STATE" => state = Some(value),
            "FILES" => files = Some(value),
            "VALIDATION" => validation = Some(value),
            "EVIDENCE" => evidence = Some(value),
            "BLOCKERS" => blockers = Some(value),
            _ => {}
        }
    }

    if let Some(reported) = task.as_deref().filter(|t| *t != task_id) {
        return Err(ExecutionError::MalformedOutput(format!(
            "status block names task '{reported}', expected '{task_id}'"
        )));
    }

    let state = match state.as_deref().map(|s| s.to_ascii_lowercase()) {
        Some(s) if s == "completed" => TerminalState::Completed,
        Some(s) if s == "blocked" => TerminalState::Blocked,
        Some(other) => {
            return Err(ExecutionError::MalformedOutput(format!(
                "unknown [STATE] '{other}' (expected completed or blocked)"
            )));
        }
        None => {
            return Err(ExecutionError::MalformedOutput(
                "no [STATE] line in agent output".to_string(),
            ));
        }
    };

    Ok(StatusBlock {
        task,
        state,
        files: files.as_deref().map(split_files).unwrap_or_default(),
        validation,
        evidence,
        blockers,
    })
}

fn split_files(value: &str) -> Vec<String> {
    if is_none_marker(value) {
        return Vec::new();
    }
    value
        .split(',')
        .map(|f| f.trim().trim_matches('`').trim())
        .map(|f| f.strip_prefix("./").unwrap_or(f))
        .filter(|f| !f.is_empty() && !is_none_marker(f))
        .map(str::to_string)
        .collect()
}

fn is_none_marker(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.eq_ignore_ascii_case("none") || v.eq_ignore_ascii_case("n/a")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_tag_wins_and_files_are_split() {
        let out = "thinking...\n[STATE] blocked\nmore work\n[TASK] WB01\n[STATE] completed\n[FILES] `./src/a.rs`, src/b.rs\n[BLOCKERS] none\n";
        let block = parse_status_block("WB01", out).unwrap();
        assert_eq!(block.state, TerminalState::Completed);
        assert_eq!(block.files, vec!["src/a.rs".to_string(), "src/b.rs".to_string()]);
        assert_eq!(block.summary(), "agent reported completed");
    }

    #[test]
    fn missing_state_is_malformed() {
        let err = parse_status_block("WB01", "[TASK] WB01\n[FILES] none\n").unwrap_err();
        assert!(matches!(err, ExecutionError::MalformedOutput(_)));
    }

    #[test]
    fn foreign_task_id_is_malformed() {
        let err = parse_status_block("WB01", "[TASK] WB02\n[STATE] completed\n").unwrap_err();
        assert!(err.to_string().contains("WB02"));
    }
}
