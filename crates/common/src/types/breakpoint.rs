// Tether - Remote debug session orchestrator
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use std::{fmt::Display, path::PathBuf, str::FromStr};

use eyre::{bail, eyre, Error, Result};
use serde::{Deserialize, Serialize};

/// Stable identifier the host editor assigns to a breakpoint.
pub type BreakpointId = String;

/// A breakpoint as the host editor knows it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EditorBreakpoint {
    /// Stable editor-side identifier.
    pub id: BreakpointId,
    /// Where the breakpoint is set.
    pub location: BreakpointLocation,
}

impl EditorBreakpoint {
    /// Creates a breakpoint at a source line (1-based).
    pub fn at_line(id: impl Into<String>, file: impl Into<PathBuf>, line: usize) -> Self {
        Self { id: id.into(), location: BreakpointLocation::Source { file: file.into(), line } }
    }

    /// Creates a breakpoint on a function symbol.
    pub fn at_function(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), location: BreakpointLocation::Function { name: name.into() } }
    }
}

impl Display for EditorBreakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} @{}", self.id, self.location)
    }
}

/// Specifies the location of a breakpoint, either a source line or a function symbol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BreakpointLocation {
    /// A breakpoint in source code.
    Source {
        /// Path to the source file.
        file: PathBuf,
        /// Line number in the source file (1-based).
        line: usize,
    },
    /// A breakpoint on a function entry.
    Function {
        /// Function symbol name.
        name: String,
    },
}

impl Display for BreakpointLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source { file, line } => write!(f, "{}:{line}", file.display()),
            Self::Function { name } => write!(f, "{name}"),
        }
    }
}

impl FromStr for BreakpointLocation {
    type Err = Error;

    /// Parses a breakpoint location from a string in the format:
    /// - `<path>:<line>` for source breakpoints
    /// - `<function>` for function breakpoints
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            bail!("Empty breakpoint location");
        }

        // `global::initialize` is a symbol, `src/lib.rs:12` is a line.
        if let Some((path, line)) = trimmed.rsplit_once(':') {
            if line.chars().all(|c| c.is_ascii_digit()) {
                if path.is_empty() {
                    bail!("Missing file path in breakpoint location: {s}");
                }
                let line =
                    line.parse::<usize>().map_err(|e| eyre!("Invalid line number: {e}"))?;
                if line == 0 {
                    bail!("Line numbers are 1-based, got 0");
                }
                return Ok(Self::Source { file: PathBuf::from(path), line });
            }
        }

        if !trimmed.chars().all(|c| c.is_alphanumeric() || c == '_' || c == ':') {
            bail!("Invalid function name: {trimmed}");
        }
        Ok(Self::Function { name: trimmed.to_string() })
    }
}

impl BreakpointLocation {
    /// Returns the source file of a line breakpoint.
    pub fn file(&self) -> Option<&PathBuf> {
        match self {
            Self::Source { file, .. } => Some(file),
            Self::Function { .. } => None,
        }
    }
}

/// A command string sent to the remote debugger client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TargetCommand(String);

impl TargetCommand {
    /// `breakpoint set --file <file> --line <line>`
    pub fn set_at_line(file: &std::path::Path, line: usize) -> Self {
        Self(format!("breakpoint set --file {} --line {line}", file.display()))
    }

    /// `breakpoint set --name <name>`
    pub fn set_at_name(name: &str) -> Self {
        Self(format!("breakpoint set --name {name}"))
    }

    /// `breakpoint set --address <address>`
    pub fn set_at_address(address: &str) -> Self {
        Self(format!("breakpoint set --address {address}"))
    }

    /// `breakpoint delete <index>`
    pub fn delete(index: u32) -> Self {
        Self(format!("breakpoint delete {index}"))
    }

    /// Raw command text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TargetCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_location_from_str_source() {
        let loc = BreakpointLocation::from_str("programs/alpha/src/lib.rs:42").unwrap();
        assert_eq!(
            loc,
            BreakpointLocation::Source { file: PathBuf::from("programs/alpha/src/lib.rs"), line: 42 }
        );
    }

    #[test]
    fn test_location_from_str_function() {
        let loc = BreakpointLocation::from_str("process_instruction").unwrap();
        assert_eq!(loc, BreakpointLocation::Function { name: "process_instruction".to_string() });

        let loc = BreakpointLocation::from_str("global::initialize").unwrap();
        assert_eq!(loc, BreakpointLocation::Function { name: "global::initialize".to_string() });
    }

    #[test]
    fn test_location_from_str_invalid() {
        assert!(BreakpointLocation::from_str("").is_err());
        assert!(BreakpointLocation::from_str("src/lib.rs:abc").is_err());
        assert!(BreakpointLocation::from_str("src/lib.rs:0").is_err());
        assert!(BreakpointLocation::from_str(":12").is_err());
        assert!(BreakpointLocation::from_str("not a function").is_err());
    }

    #[test]
    fn test_location_display() {
        let bp = EditorBreakpoint::at_line("7", "src/lib.rs", 12);
        assert_eq!(bp.to_string(), "#7 @src/lib.rs:12");
        let bp = EditorBreakpoint::at_function("8", "initialize");
        assert_eq!(bp.to_string(), "#8 @initialize");
    }

    #[test]
    fn test_target_commands() {
        assert_eq!(
            TargetCommand::set_at_line(Path::new("/ws/src/lib.rs"), 3).as_str(),
            "breakpoint set --file /ws/src/lib.rs --line 3"
        );
        assert_eq!(TargetCommand::set_at_name("entry").as_str(), "breakpoint set --name entry");
        assert_eq!(
            TargetCommand::set_at_address("0000000000001a40").as_str(),
            "breakpoint set --address 0000000000001a40"
        );
        assert_eq!(TargetCommand::delete(4).to_string(), "breakpoint delete 4");
    }

    #[test]
    fn test_breakpoint_serde_shape() {
        let bp = EditorBreakpoint::at_line("1", "src/lib.rs", 10);
        let json = serde_json::to_string(&bp).unwrap();
        assert!(json.contains("\"kind\":\"source\""));
        let back: EditorBreakpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bp);
    }
}
