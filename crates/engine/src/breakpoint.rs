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

//! Breakpoint translation.
//!
//! Editor breakpoints are turned into debugger commands by a
//! [`BreakpointTranslator`]; the [`BreakpointTracker`] remembers which
//! debugger breakpoint index each editor breakpoint received so that it can
//! be deleted again.
//!
//! # Strategies
//!
//! - [`TranslationStrategy::LineBased`] emits `breakpoint set --file --line`
//!   and relies on the VM mapping lines to program counters.
//! - [`TranslationStrategy::SymbolBased`] finds the function enclosing the
//!   line with a brace-counting scan, looks it up in the
//!   [`FunctionAddressMap`] and breaks on its address or name.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::Regex;
use tether_common::{BreakpointId, BreakpointLocation, EditorBreakpoint, TargetCommand};
use tracing::{debug, error, warn};

use crate::{FunctionAddressMap, SessionError, SessionResult, SymbolTarget, TranslationStrategy};

static FN_DEFINITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"fn\s+(\w+)").expect("function definition pattern is valid"));

/// Name of the function whose body contains 1-based `line` of `source`.
///
/// Scans from the top, remembering the last `fn <name>` seen and resetting
/// the brace depth there; the line is inside that function when the depth is
/// positive after counting its own braces. Nested closures and braces inside
/// string literals are not understood.
pub fn function_name_at_line(source: &str, line: usize) -> Option<String> {
    let mut depth: i64 = 0;
    let mut name: Option<&str> = None;

    for (index, text) in source.lines().enumerate() {
        if let Some(captures) = FN_DEFINITION.captures(text) {
            name = captures.get(1).map(|m| m.as_str());
            depth = 0;
        }

        depth += text.matches('{').count() as i64;
        depth -= text.matches('}').count() as i64;

        if index + 1 == line {
            return if depth > 0 { name.map(str::to_string) } else { None };
        }
    }
    None
}

/// Whether a breakpoint lives in test code, which has no counterpart in the VM.
pub fn is_test_location(location: &BreakpointLocation) -> bool {
    let Some(file) = location.file() else {
        return false;
    };
    let path = file.to_string_lossy();
    path.contains("/tests/")
        || path.contains("\\tests\\")
        || path.contains(".test.")
        || path.ends_with(".spec.js")
        || path.ends_with(".test.js")
}

/// Turns editor breakpoints into debugger commands.
#[derive(Debug, Clone)]
pub struct BreakpointTranslator {
    strategy: TranslationStrategy,
    symbols: Option<FunctionAddressMap>,
    managed: bool,
    workspace_root: PathBuf,
}

impl BreakpointTranslator {
    /// Line-based translator; relative paths are resolved against `workspace_root`.
    pub fn line_based(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            strategy: TranslationStrategy::LineBased,
            symbols: None,
            managed: false,
            workspace_root: workspace_root.into(),
        }
    }

    /// Symbol-based translator backed by `symbols`.
    pub fn symbol_based(
        workspace_root: impl Into<PathBuf>,
        symbols: FunctionAddressMap,
        managed: bool,
    ) -> Self {
        Self {
            strategy: TranslationStrategy::SymbolBased,
            symbols: Some(symbols),
            managed,
            workspace_root: workspace_root.into(),
        }
    }

    /// The strategy in use.
    pub fn strategy(&self) -> TranslationStrategy {
        self.strategy
    }

    /// Translates one breakpoint.
    pub fn translate(&self, breakpoint: &EditorBreakpoint) -> SessionResult<TargetCommand> {
        match (&breakpoint.location, self.strategy) {
            (BreakpointLocation::Source { file, line }, TranslationStrategy::LineBased) => {
                Ok(TargetCommand::set_at_line(&self.absolute(file), *line))
            }
            (BreakpointLocation::Function { name }, TranslationStrategy::LineBased) => {
                Ok(TargetCommand::set_at_name(name))
            }
            (BreakpointLocation::Source { file, line }, TranslationStrategy::SymbolBased) => {
                let path = self.absolute(file);
                let source = std::fs::read_to_string(&path)?;
                let function = function_name_at_line(&source, *line)
                    .ok_or_else(|| SessionError::FunctionNotFound { file: path.clone(), line: *line })?;
                self.command_for_function(&function)
            }
            (BreakpointLocation::Function { name }, TranslationStrategy::SymbolBased) => {
                self.command_for_function(name)
            }
        }
    }

    fn command_for_function(&self, function: &str) -> SessionResult<TargetCommand> {
        let target = self
            .symbols
            .as_ref()
            .and_then(|map| map.resolve(function, self.managed))
            .ok_or_else(|| SessionError::AddressNotResolved(function.to_string()))?;
        Ok(match target {
            SymbolTarget::Address(address) => TargetCommand::set_at_address(&address),
            SymbolTarget::Name(name) => TargetCommand::set_at_name(&name),
        })
    }

    fn absolute(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.workspace_root.join(file)
        }
    }
}

/// A breakpoint that could not be translated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointWarning {
    /// Editor id of the skipped breakpoint.
    pub breakpoint: BreakpointId,
    /// Why it was skipped.
    pub message: String,
}

/// Outcome of translating a batch of breakpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationReport {
    /// Commands to send, in order.
    pub commands: Vec<TargetCommand>,
    /// Breakpoints that received a debugger index.
    pub applied: Vec<BreakpointId>,
    /// Breakpoints that were skipped.
    pub warnings: Vec<BreakpointWarning>,
}

/// Editor breakpoint id to debugger breakpoint index.
///
/// Indices start at 1 and are never reused within a session, matching the
/// numbering the debugger itself assigns to successful `breakpoint set`
/// commands. The set command of every live index is kept so that debuggers
/// attaching later in a CPI chain receive the current breakpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointTracker {
    mapping: HashMap<BreakpointId, u32>,
    commands: BTreeMap<u32, TargetCommand>,
    next_index: u32,
}

impl Default for BreakpointTracker {
    fn default() -> Self {
        Self { mapping: HashMap::new(), commands: BTreeMap::new(), next_index: 1 }
    }
}

impl BreakpointTracker {
    /// Translates every breakpoint, independently.
    ///
    /// A failure skips only that breakpoint and is reported as a warning.
    pub fn restore_all(
        &mut self,
        translator: &BreakpointTranslator,
        breakpoints: &[EditorBreakpoint],
    ) -> TranslationReport {
        let mut report = TranslationReport::default();
        for breakpoint in breakpoints {
            self.apply(translator, breakpoint, &mut report);
        }
        report
    }

    /// Translates breakpoints the editor just added, ignoring test code.
    pub fn on_added(
        &mut self,
        translator: &BreakpointTranslator,
        breakpoints: &[EditorBreakpoint],
    ) -> TranslationReport {
        let mut report = TranslationReport::default();
        for breakpoint in breakpoints.iter().filter(|bp| !is_test_location(&bp.location)) {
            if self.mapping.contains_key(&breakpoint.id) {
                debug!("Breakpoint {breakpoint} is already set");
                continue;
            }
            self.apply(translator, breakpoint, &mut report);
        }
        report
    }

    /// Delete commands for breakpoints the editor just removed.
    pub fn on_removed(&mut self, breakpoints: &[EditorBreakpoint]) -> Vec<TargetCommand> {
        breakpoints
            .iter()
            .filter(|bp| !is_test_location(&bp.location))
            .filter_map(|bp| self.mapping.remove(&bp.id))
            .map(|index| {
                self.commands.remove(&index);
                TargetCommand::delete(index)
            })
            .collect()
    }

    /// Set commands of every live breakpoint, in index order.
    pub fn active_commands(&self) -> Vec<TargetCommand> {
        self.commands.values().cloned().collect()
    }

    /// Debugger index of an editor breakpoint.
    pub fn index_of(&self, id: &str) -> Option<u32> {
        self.mapping.get(id).copied()
    }

    /// Number of tracked breakpoints.
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    fn apply(
        &mut self,
        translator: &BreakpointTranslator,
        breakpoint: &EditorBreakpoint,
        report: &mut TranslationReport,
    ) {
        match translator.translate(breakpoint) {
            Ok(command) => {
                debug!("Breakpoint {breakpoint} -> `{command}` (#{})", self.next_index);
                self.mapping.insert(breakpoint.id.clone(), self.next_index);
                self.commands.insert(self.next_index, command.clone());
                self.next_index += 1;
                report.commands.push(command);
                report.applied.push(breakpoint.id.clone());
            }
            Err(e) => {
                if e.is_fatal() {
                    error!("Could not translate breakpoint {breakpoint}: {e}");
                } else {
                    warn!("Skipping breakpoint {breakpoint}: {e}");
                }
                report
                    .warnings
                    .push(BreakpointWarning { breakpoint: breakpoint.id.clone(), message: e.to_string() });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_common::test_utils::FakeWorkspace;

    const PROGRAM: &str = r#"use anchor_lang::prelude::*;

pub fn initialize(ctx: Context<Initialize>) -> Result<()> {
    let counter = &mut ctx.accounts.counter;
    counter.count = 0;
    Ok(())
}

pub fn increment(ctx: Context<Increment>) -> Result<()> {
    ctx.accounts.counter.count += 1;
    Ok(())
}
"#;

    const SYMBOLS: &str = "\
0000000000000120 entrypoint
0000000000001a40 program::instruction::global::initialize
0000000000001c80 program::instruction::global::increment::h1234
";

    #[test]
    fn test_function_name_at_line() {
        assert_eq!(function_name_at_line(PROGRAM, 4).as_deref(), Some("initialize"));
        assert_eq!(function_name_at_line(PROGRAM, 10).as_deref(), Some("increment"));
        // `use` line, blank line between functions, closing brace
        assert_eq!(function_name_at_line(PROGRAM, 1), None);
        assert_eq!(function_name_at_line(PROGRAM, 8), None);
        assert_eq!(function_name_at_line(PROGRAM, 7), None);
        assert_eq!(function_name_at_line(PROGRAM, 100), None);
    }

    #[test]
    fn test_is_test_location() {
        let at = |p: &str| BreakpointLocation::Source { file: p.into(), line: 1 };
        assert!(is_test_location(&at("/ws/programs/a/tests/test_cpi.rs")));
        assert!(is_test_location(&at("C:\\ws\\tests\\cpi.rs")));
        assert!(is_test_location(&at("/ws/app/counter.test.ts")));
        assert!(is_test_location(&at("/ws/app/counter.spec.js")));
        assert!(!is_test_location(&at("/ws/programs/a/src/lib.rs")));
        assert!(!is_test_location(&BreakpointLocation::Function { name: "tests".into() }));
    }

    #[test]
    fn test_line_based_uses_absolute_path() {
        let translator = BreakpointTranslator::line_based("/ws");
        let cmd = translator.translate(&EditorBreakpoint::at_line("1", "programs/a/src/lib.rs", 9)).unwrap();
        assert_eq!(cmd.as_str(), "breakpoint set --file /ws/programs/a/src/lib.rs --line 9");
    }

    #[test]
    fn test_symbol_based_managed_uses_address() {
        let ws = FakeWorkspace::anchor(&["program"]).unwrap();
        ws.write_file("programs/program/src/lib.rs", PROGRAM).unwrap();
        let translator =
            BreakpointTranslator::symbol_based(ws.root(), FunctionAddressMap::parse(SYMBOLS), true);

        let cmd = translator
            .translate(&EditorBreakpoint::at_line("1", "programs/program/src/lib.rs", 4))
            .unwrap();
        assert_eq!(cmd.as_str(), "breakpoint set --address 0000000000001a40");
    }

    #[test]
    fn test_symbol_based_native_uses_name() {
        let ws = FakeWorkspace::native("program").unwrap();
        ws.write_file("src/lib.rs", PROGRAM).unwrap();
        let translator =
            BreakpointTranslator::symbol_based(ws.root(), FunctionAddressMap::parse(SYMBOLS), false);

        let cmd = translator.translate(&EditorBreakpoint::at_line("1", "src/lib.rs", 10)).unwrap();
        assert_eq!(cmd.as_str(), "breakpoint set --name increment");
    }

    #[test]
    fn test_restore_all_counts_successes_and_warnings() {
        let ws = FakeWorkspace::native("program").unwrap();
        ws.write_file("src/lib.rs", PROGRAM).unwrap();
        let translator =
            BreakpointTranslator::symbol_based(ws.root(), FunctionAddressMap::parse(SYMBOLS), false);

        let breakpoints = vec![
            EditorBreakpoint::at_line("a", "src/lib.rs", 4),
            EditorBreakpoint::at_line("b", "src/lib.rs", 1),
            EditorBreakpoint::at_line("c", "src/lib.rs", 11),
            EditorBreakpoint::at_line("d", "src/missing.rs", 3),
        ];
        let mut tracker = BreakpointTracker::default();
        let report = tracker.restore_all(&translator, &breakpoints);

        assert_eq!(report.applied, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(report.commands.len(), 2);
        assert_eq!(report.warnings.len(), 2);
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.index_of("a"), Some(1));
        assert_eq!(tracker.index_of("c"), Some(2));
    }

    #[test]
    fn test_add_then_remove_round_trip() {
        let translator = BreakpointTranslator::line_based("/ws");
        let mut tracker = BreakpointTracker::default();
        tracker.restore_all(&translator, &[EditorBreakpoint::at_line("keep", "src/lib.rs", 2)]);
        let before = tracker.mapping.clone();

        let bp = EditorBreakpoint::at_line("tmp", "src/lib.rs", 5);
        let added = tracker.on_added(&translator, std::slice::from_ref(&bp));
        assert_eq!(added.commands.len(), 1);

        let removed = tracker.on_removed(std::slice::from_ref(&bp));
        assert_eq!(removed, vec![TargetCommand::delete(2)]);
        assert_eq!(tracker.mapping, before);

        // a second removal emits nothing
        assert!(tracker.on_removed(&[bp]).is_empty());
    }

    #[test]
    fn test_active_commands_follow_edits() {
        let translator = BreakpointTranslator::line_based("/ws");
        let mut tracker = BreakpointTracker::default();
        let file = Path::new("/ws/src/lib.rs");
        let first = EditorBreakpoint::at_line("1", "src/lib.rs", 2);
        tracker.restore_all(&translator, std::slice::from_ref(&first));
        assert_eq!(tracker.active_commands(), vec![TargetCommand::set_at_line(file, 2)]);

        tracker.on_removed(&[first]);
        tracker.on_added(&translator, &[EditorBreakpoint::at_line("2", "src/lib.rs", 7)]);
        assert_eq!(tracker.index_of("2"), Some(2));
        assert_eq!(tracker.active_commands(), vec![TargetCommand::set_at_line(file, 7)]);
    }

    #[test]
    fn test_incremental_updates_skip_test_files() {
        let translator = BreakpointTranslator::line_based("/ws");
        let mut tracker = BreakpointTracker::default();
        let bp = EditorBreakpoint::at_line("t", "/ws/tests/cpi.rs", 5);

        assert!(tracker.on_added(&translator, std::slice::from_ref(&bp)).commands.is_empty());
        assert!(tracker.on_removed(&[bp]).is_empty());
        assert!(tracker.is_empty());
    }
}
