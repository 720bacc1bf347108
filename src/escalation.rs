// src/escalation.rs

//! Model-profile escalation.
//!
//! Profiles form a ladder from cheapest to strongest. A task starts on the
//! first rung and moves up one rung after `after_compile_failures`
//! consecutive compile failures or `after_runtime_failures` consecutive
//! runtime failures on its current rung. Any other failure kind resets both
//! streaks. Escalation never changes admission; it only changes which
//! profile the next attempt is rendered with.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::WaveError;
use crate::exec::FailureKind;
use crate::ledger::LedgerState;
use crate::manifest::TaskId;

const REASONING_EFFORTS: &[&str] = &["none", "minimal", "low", "medium", "high", "xhigh"];

/// One rung of the ladder, exposed to the agent command as `{model}` and
/// `{reasoning}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub model: String,
    #[serde(default)]
    pub reasoning: String,
}

impl fmt::Display for ModelProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reasoning.is_empty() {
            f.write_str(&self.model)
        } else {
            write!(f, "{}/{}", self.model, self.reasoning)
        }
    }
}

/// Normalise a reasoning effort, accepting the `extrahigh` spellings.
pub fn normalize_reasoning(value: &str) -> Result<String, WaveError> {
    let raw = value.trim().to_ascii_lowercase();
    let normalized = match raw.as_str() {
        "extrahigh" | "extra_high" | "extra-high" => "xhigh".to_string(),
        _ => raw,
    };
    if REASONING_EFFORTS.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        Err(WaveError::ConfigError(format!(
            "invalid reasoning effort '{value}' (expected one of: {})",
            REASONING_EFFORTS.join(", ")
        )))
    }
}

/// A ladder written as `model:reasoning;model:reasoning`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileLadder(pub Vec<ModelProfile>);

impl FromStr for ProfileLadder {
    type Err = WaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut profiles = Vec::new();
        for token in s.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            let (model, reasoning) = token.split_once(':').ok_or_else(|| {
                WaveError::ConfigError(format!(
                    "invalid profile entry '{token}', expected '<model>:<reasoning>'"
                ))
            })?;
            profiles.push(ModelProfile {
                model: model.trim().to_string(),
                reasoning: normalize_reasoning(reasoning)?,
            });
        }
        if profiles.is_empty() {
            return Err(WaveError::ConfigError("no profiles parsed".to_string()));
        }
        Ok(Self(profiles))
    }
}

/// `[escalation]` section of the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationSettings {
    /// Empty leaves `{model}` / `{reasoning}` blank and disables escalation.
    #[serde(default)]
    pub profiles: Vec<ModelProfile>,

    #[serde(default = "default_after_failures")]
    pub after_compile_failures: u32,

    #[serde(default = "default_after_failures")]
    pub after_runtime_failures: u32,
}

fn default_after_failures() -> u32 {
    2
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            profiles: Vec::new(),
            after_compile_failures: default_after_failures(),
            after_runtime_failures: default_after_failures(),
        }
    }
}

/// Persisted per-task ladder position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationState {
    pub profile_index: usize,
    #[serde(default)]
    pub compile_streak: u32,
    #[serde(default)]
    pub runtime_streak: u32,
}

/// A rung change, for logs and the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Escalation {
    pub kind: FailureKind,
    pub from: ModelProfile,
    pub to: ModelProfile,
}

#[derive(Debug, Clone, Default)]
pub struct EscalationPolicy {
    settings: EscalationSettings,
    states: HashMap<TaskId, EscalationState>,
}

impl EscalationPolicy {
    pub fn new(settings: EscalationSettings) -> Self {
        Self {
            settings,
            states: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &EscalationSettings {
        &self.settings
    }

    /// Load ladder positions from a ledger. Indices past the end of the
    /// configured ladder are clamped to its last rung.
    pub fn seed(&mut self, ledger: &LedgerState) {
        let top = self.settings.profiles.len().saturating_sub(1);
        self.states = ledger
            .tasks
            .iter()
            .map(|record| {
                let mut state = record.escalation.clone();
                state.profile_index = state.profile_index.min(top);
                (record.id.clone(), state)
            })
            .collect();
        debug!(tasks = self.states.len(), "escalation policy seeded from ledger");
    }

    /// Profile the next attempt of `task_id` runs with.
    pub fn profile_for(&self, task_id: &str) -> Option<&ModelProfile> {
        let index = self.states.get(task_id).map_or(0, |s| s.profile_index);
        self.settings
            .profiles
            .get(index)
            .or_else(|| self.settings.profiles.last())
    }

    pub fn record_failure(&mut self, task_id: &str, kind: FailureKind) -> Option<Escalation> {
        let state = self.states.entry(task_id.to_string()).or_default();
        let (streak, threshold) = match kind {
            FailureKind::Compile => {
                state.compile_streak += 1;
                (state.compile_streak, self.settings.after_compile_failures)
            }
            FailureKind::Runtime => {
                state.runtime_streak += 1;
                (state.runtime_streak, self.settings.after_runtime_failures)
            }
            _ => {
                state.compile_streak = 0;
                state.runtime_streak = 0;
                return None;
            }
        };

        if streak < threshold || state.profile_index + 1 >= self.settings.profiles.len() {
            return None;
        }

        let from = self.settings.profiles[state.profile_index].clone();
        state.profile_index += 1;
        state.compile_streak = 0;
        state.runtime_streak = 0;
        let to = self.settings.profiles[state.profile_index].clone();
        info!(task = %task_id, %kind, from = %from, to = %to, "escalating model profile");
        Some(Escalation { kind, from, to })
    }

    /// Success clears the streaks but keeps the rung.
    pub fn record_success(&mut self, task_id: &str) {
        if let Some(state) = self.states.get_mut(task_id) {
            state.compile_streak = 0;
            state.runtime_streak = 0;
        }
    }

    pub fn state_of(&self, task_id: &str) -> EscalationState {
        self.states.get(task_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder(spec: &str) -> Vec<ModelProfile> {
        spec.parse::<ProfileLadder>().unwrap().0
    }

    fn policy(profiles: &str, after: u32) -> EscalationPolicy {
        EscalationPolicy::new(EscalationSettings {
            profiles: ladder(profiles),
            after_compile_failures: after,
            after_runtime_failures: after,
        })
    }

    #[test]
    fn ladder_parses_and_normalises_reasoning() {
        let profiles = ladder("fast:low; big:Extra-High");
        assert_eq!(profiles[1].model, "big");
        assert_eq!(profiles[1].reasoning, "xhigh");
        assert_eq!(profiles[1].to_string(), "big/xhigh");

        assert!("fast".parse::<ProfileLadder>().is_err());
        assert!("fast:turbo".parse::<ProfileLadder>().is_err());
        assert!(" ; ".parse::<ProfileLadder>().is_err());
    }

    #[test]
    fn consecutive_failures_of_one_kind_climb_one_rung() {
        let mut p = policy("m:low;m:medium;m:high", 2);
        assert_eq!(p.profile_for("A").unwrap().reasoning, "low");

        assert!(p.record_failure("A", FailureKind::Compile).is_none());
        let up = p.record_failure("A", FailureKind::Compile).unwrap();
        assert_eq!((up.from.reasoning.as_str(), up.to.reasoning.as_str()), ("low", "medium"));
        assert_eq!(p.profile_for("A").unwrap().reasoning, "medium");
        assert_eq!(p.state_of("A").compile_streak, 0);
    }

    #[test]
    fn other_failure_kinds_reset_the_streaks() {
        let mut p = policy("m:low;m:high", 2);
        p.record_failure("A", FailureKind::Runtime);
        p.record_failure("A", FailureKind::Quota);
        assert!(p.record_failure("A", FailureKind::Runtime).is_none());
        assert_eq!(p.state_of("A").profile_index, 0);
    }

    #[test]
    fn top_rung_and_empty_ladder_never_escalate() {
        let mut p = policy("m:high", 1);
        assert!(p.record_failure("A", FailureKind::Compile).is_none());
        assert_eq!(p.profile_for("A").unwrap().reasoning, "high");

        let mut none = EscalationPolicy::new(EscalationSettings::default());
        assert!(none.record_failure("A", FailureKind::Compile).is_none());
        assert!(none.profile_for("A").is_none());
    }
}
