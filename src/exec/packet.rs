// src/exec/packet.rs

//! Packet contract: the parts of a packet document the adapter enforces.
//!
//! ~~~markdown
//! ## Allowed Files
//! - `src/parser.rs`
//! - `tests/parser/*.rs` (new fixtures only)
//!
//! ## Validation Commands
//! ```bash
//! # unit tests
//! cargo test -p parser \
//!   --lib
//! ```
//! ~~~

use std::fs;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::errors::ExecutionError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketContract {
    /// Paths or globs the agent may touch.
    pub allowed_files: Vec<String>,
    /// Commands from the first fenced block of `## Validation Commands`.
    pub validation_commands: Vec<String>,
}

impl PacketContract {
    pub fn load(path: &Path) -> Result<Self, ExecutionError> {
        let text = fs::read_to_string(path).map_err(|e| {
            ExecutionError::Packet(format!("reading packet {}: {e}", path.display()))
        })?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let lines: Vec<&str> = text.lines().collect();
        Self {
            allowed_files: parse_allowed_files(section(&lines, "Allowed Files")),
            validation_commands: parse_validation_commands(section(&lines, "Validation Commands")),
        }
    }

    /// Build the scope matcher. An empty allowed set fails closed unless
    /// `allow_empty` is set, in which case any file is in scope.
    pub fn scope(&self, allow_empty: bool) -> Result<ScopeGate, ExecutionError> {
        if self.allowed_files.is_empty() {
            if allow_empty {
                return Ok(ScopeGate { set: None });
            }
            return Err(ExecutionError::Packet(
                "packet has no parsed 'Allowed Files' entries; refusing to run".to_string(),
            ));
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in &self.allowed_files {
            let glob = Glob::new(pattern).map_err(|e| {
                ExecutionError::Packet(format!("invalid allowed-file pattern '{pattern}': {e}"))
            })?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| ExecutionError::Packet(format!("building allowed-file set: {e}")))?;
        Ok(ScopeGate { set: Some(set) })
    }
}

/// Matches touched files against a packet's allowed set.
#[derive(Debug, Clone)]
pub struct ScopeGate {
    set: Option<GlobSet>,
}

impl ScopeGate {
    /// Files outside the allowed set, in input order.
    pub fn out_of_scope(&self, files: &[String]) -> Vec<String> {
        let Some(set) = &self.set else {
            return Vec::new();
        };
        files
            .iter()
            .filter(|f| !set.is_match(f.strip_prefix("./").unwrap_or(f)))
            .cloned()
            .collect()
    }
}

/// Lines between `## <title>` and the next `## ` heading.
fn section<'a>(lines: &[&'a str], title: &str) -> Vec<&'a str> {
    let header = format!("## {title}");
    lines
        .iter()
        .skip_while(|l| l.trim() != header)
        .skip(1)
        .take_while(|l| !l.starts_with("## "))
        .copied()
        .collect()
}

fn parse_allowed_files(section: Vec<&str>) -> Vec<String> {
    let mut allowed: Vec<String> = Vec::new();
    for line in section {
        let Some(item) = line.trim_start().strip_prefix("- ") else {
            continue;
        };
        let Some(rest) = item.trim_start().strip_prefix('`') else {
            continue;
        };
        let Some((path, _)) = rest.split_once('`') else {
            continue;
        };
        let path = path.split(" (").next().unwrap_or(path).trim();
        if !path.is_empty() && !allowed.iter().any(|p| p == path) {
            allowed.push(path.to_string());
        }
    }
    allowed
}

fn parse_validation_commands(section: Vec<&str>) -> Vec<String> {
    let block = section
        .iter()
        .skip_while(|l| !l.trim().starts_with("```"))
        .skip(1)
        .take_while(|l| !l.trim().starts_with("```"));

    let mut commands = Vec::new();
    let mut current = String::new();
    for line in block {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        match line.strip_suffix('\\') {
            Some(head) => current.push_str(head.trim_end()),
            None => {
                current.push_str(line);
                commands.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.is_empty() {
        commands.push(current);
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACKET: &str = "# WB03\n\n## Allowed Files\n- `src/parser.rs`\n- `tests/parser/*.rs` (fixtures only)\n- not a path\n\n## Validation Commands\n```bash\n# unit tests\ncargo test -p parser \\\n  --lib\n\ncargo fmt --check\n```\n```bash\nignored\n```\n\n## Notes\n- `src/other.rs`\n";

    #[test]
    fn parses_allowed_files_and_commands() {
        let contract = PacketContract::parse(PACKET);
        assert_eq!(
            contract.allowed_files,
            vec!["src/parser.rs".to_string(), "tests/parser/*.rs".to_string()]
        );
        assert_eq!(
            contract.validation_commands,
            vec!["cargo test -p parser --lib".to_string(), "cargo fmt --check".to_string()]
        );
    }

    #[test]
    fn scope_gate_matches_globs() {
        let gate = PacketContract::parse(PACKET).scope(false).unwrap();
        let touched = vec![
            "src/parser.rs".to_string(),
            "./tests/parser/cases.rs".to_string(),
            "src/other.rs".to_string(),
        ];
        assert_eq!(gate.out_of_scope(&touched), vec!["src/other.rs".to_string()]);
    }

    #[test]
    fn empty_allowed_set_fails_closed() {
        let contract = PacketContract::parse("## Allowed Files\n\n## Validation Commands\n");
        assert!(matches!(contract.scope(false), Err(ExecutionError::Packet(_))));
        assert!(contract.scope(true).unwrap().out_of_scope(&["x".to_string()]).is_empty());
    }
}
