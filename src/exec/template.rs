// src/exec/template.rs

//! Shell command templates with `{name}` / `{name_q}` placeholders.
//!
//! `{name}` expands to the raw value, `{name_q}` to the value quoted for a
//! POSIX shell. Unknown placeholders are rejected when the template is
//! parsed, so a typo fails at startup instead of on the first dispatch.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::errors::{Result, WaveError};

/// Placeholders accepted by `[executor].worker_command`.
pub const WORKER_PLACEHOLDERS: &[&str] = &[
    "task_id",
    "attempt",
    "packet",
    "backlog",
    "workdir",
    "validation_mode",
    "model",
    "reasoning",
    "prompt_file",
    "log_file",
];

/// Placeholders accepted by `[executor].validation_bridge`.
pub const BRIDGE_PLACEHOLDERS: &[&str] = &["command", "task_id", "attempt"];

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z][a-z_]*)\}").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    source: String,
}

impl CommandTemplate {
    pub fn parse(source: &str, allowed: &[&str]) -> Result<Self> {
        if source.trim().is_empty() {
            return Err(WaveError::ConfigError("command template is empty".to_string()));
        }

        let mut unknown: Vec<String> = PLACEHOLDER_RE
            .captures_iter(source)
            .map(|c| c[1].to_string())
            .filter(|name| {
                let base = name.strip_suffix("_q").unwrap_or(name);
                !allowed.contains(&base)
            })
            .collect();
        unknown.dedup();

        if !unknown.is_empty() {
            return Err(WaveError::ConfigError(format!(
                "unknown placeholder(s) {} (allowed: {} and their _q variants)",
                unknown
                    .iter()
                    .map(|n| format!("{{{n}}}"))
                    .collect::<Vec<_>>()
                    .join(", "),
                allowed.join(", ")
            )));
        }

        Ok(Self {
            source: source.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Substitute placeholders. Names without a value expand to nothing.
    pub fn render(&self, values: &[(&str, &str)]) -> String {
        PLACEHOLDER_RE
            .replace_all(&self.source, |caps: &Captures<'_>| {
                let name = &caps[1];
                let lookup = |key: &str| values.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);
                match lookup(name) {
                    Some(value) => value.to_string(),
                    None => match name.strip_suffix("_q").and_then(lookup) {
                        Some(value) => shell_quote(value),
                        None => String::new(),
                    },
                }
            })
            .into_owned()
    }
}

/// Quote `value` for a POSIX shell, leaving plain words untouched.
pub fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r#"'"'"'"#))
    }
}
