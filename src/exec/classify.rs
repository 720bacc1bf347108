// src/exec/classify.rs

//! Failure classification from attempt evidence.
//!
//! The kind is recorded on the attempt, shown by the reporter and drives
//! model-profile escalation. The quota policy treats every `error` outcome
//! the same way.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ExecutionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Quota,
    Compile,
    Runtime,
    Test,
    Infra,
    Unknown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Quota => "quota",
            FailureKind::Compile => "compile",
            FailureKind::Runtime => "runtime",
            FailureKind::Test => "test",
            FailureKind::Infra => "infra",
            FailureKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

const QUOTA_MARKERS: &[&str] = &[
    "insufficient_quota",
    "quota exceeded",
    "exceeded your current quota",
    "billing hard limit has been reached",
    "usage limit reached",
    "you have reached your usage limit",
    "you've reached your usage limit",
    "rate limit reached",
    "too many requests",
    "status code 429",
    "monthly limit reached",
    "daily limit reached",
    "request was rejected due to rate limiting",
];

const COMPILE_MARKERS: &[&str] = &[
    "failed to compile",
    "compilation failed",
    "could not compile",
    "error[e",
    "no such module",
];

const RUNTIME_MARKERS: &[&str] = &[
    "panicked",
    "segmentation fault",
    "fatal error",
    "traceback",
    "runtime error",
];

const TEST_MARKERS: &[&str] = &["test failed", "failures:", "assertion", "0 passed; 1 failed"];

const INFRA_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "permission denied",
    "network is unreachable",
    "temporary failure",
    "killed",
];

/// Classify free-form failure text. Quota markers take precedence.
pub fn classify_text(text: &str) -> FailureKind {
    let lower = text.to_lowercase();
    let hit = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if hit(QUOTA_MARKERS) {
        FailureKind::Quota
    } else if hit(COMPILE_MARKERS) {
        FailureKind::Compile
    } else if hit(RUNTIME_MARKERS) {
        FailureKind::Runtime
    } else if hit(TEST_MARKERS) {
        FailureKind::Test
    } else if hit(INFRA_MARKERS) {
        FailureKind::Infra
    } else {
        FailureKind::Unknown
    }
}

/// Classify an execution error, using its evidence text when the variant
/// alone does not decide it.
pub fn classify_error(err: &ExecutionError) -> FailureKind {
    match err {
        ExecutionError::Launch { .. }
        | ExecutionError::Timeout { .. }
        | ExecutionError::ValidationTimeout { .. } => FailureKind::Infra,
        ExecutionError::NonZeroExit { .. } | ExecutionError::ValidationFailed { .. } => {
            classify_text(&err.evidence())
        }
        ExecutionError::MalformedOutput(_)
        | ExecutionError::ScopeViolation { .. }
        | ExecutionError::Packet(_) => FailureKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_markers_win_over_compile_markers() {
        let text = "error[E0308]: mismatched types\nHTTP status code 429: too many requests";
        assert_eq!(classify_text(text), FailureKind::Quota);
    }

    #[test]
    fn compile_and_test_failures_are_told_apart() {
        assert_eq!(
            classify_text("error: could not compile `wavesched`"),
            FailureKind::Compile
        );
        assert_eq!(
            classify_text("test result: FAILED. 0 passed; 1 failed"),
            FailureKind::Test
        );
        assert_eq!(classify_text("all good"), FailureKind::Unknown);
    }

    #[test]
    fn timeouts_are_infra() {
        let err = ExecutionError::Timeout {
            what: "agent".to_string(),
            seconds: 5,
        };
        assert_eq!(classify_error(&err), FailureKind::Infra);
    }
}
