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

//! Workspace discovery: program names, project flavour and test tooling.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use toml::Table;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::{SessionError, SessionResult};

/// Marker file of a managed (Anchor) workspace.
pub const ANCHOR_TOML: &str = "Anchor.toml";

static SCRIPT_RUNNER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:yarn run |npx )?(\S+)(.*)$").expect("script runner pattern is valid")
});

/// Whether the workspace follows the managed-program (Anchor) convention.
pub fn is_managed_program(workspace_root: &Path) -> bool {
    workspace_root.join(ANCHOR_TOML).is_file()
}

/// Program names in the workspace.
///
/// Anchor workspaces list one crate per directory under `programs/`; the
/// package name is read from each crate's `Cargo.toml`. Otherwise the root
/// package is the only program.
pub fn discover_program_names(workspace_root: &Path) -> SessionResult<Vec<String>> {
    let programs_dir = workspace_root.join("programs");
    if programs_dir.is_dir() {
        let mut dirs: Vec<_> = std::fs::read_dir(&programs_dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();

        if !dirs.is_empty() {
            let mut names = Vec::with_capacity(dirs.len());
            for dir in dirs {
                let manifest = dir.join("Cargo.toml");
                let name = package_name(&manifest)?.ok_or_else(|| {
                    SessionError::Config(format!("no package name in {}", manifest.display()))
                })?;
                names.push(name);
            }
            debug!("Discovered programs {names:?}");
            return Ok(names);
        }
    }

    let manifest = workspace_root.join("Cargo.toml");
    match package_name(&manifest)? {
        Some(name) => Ok(vec![name]),
        None => Err(SessionError::Config(format!(
            "no programs found in {}",
            workspace_root.display()
        ))),
    }
}

fn package_name(manifest: &Path) -> SessionResult<Option<String>> {
    if !manifest.is_file() {
        return Ok(None);
    }
    let table = read_toml(manifest)?;
    Ok(table
        .get("package")
        .and_then(|package| package.get("name"))
        .and_then(|name| name.as_str())
        .map(str::to_string))
}

fn read_toml(path: &Path) -> SessionResult<Table> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str::<Table>(&content)
        .map_err(|e| SessionError::Config(format!("{}: {e}", path.display())))
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name == "target" || name == "node_modules" || name.starts_with('.')
}

/// Whether any `Cargo.toml` in the workspace depends on an in-process VM
/// backend (`litesvm` or `mollusk*`) that can serve debug endpoints.
pub fn has_supported_backend(workspace_root: &Path) -> bool {
    let manifests = WalkDir::new(workspace_root)
        .into_iter()
        .filter_entry(|entry| !is_skipped_dir(entry))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == "Cargo.toml");

    for manifest in manifests {
        let table = match read_toml(manifest.path()) {
            Ok(table) => table,
            Err(e) => {
                warn!("Skipping unreadable manifest: {e}");
                continue;
            }
        };
        let found = table.values().filter_map(|section| section.as_table()).any(|section| {
            section.keys().any(|key| key == "litesvm" || key.starts_with("mollusk"))
        });
        if found {
            debug!("Supported VM backend declared in {}", manifest.path().display());
            return true;
        }
    }
    false
}

/// An external test runner command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRunner {
    /// Runner executable, e.g. `ts-mocha`.
    pub runner: String,
    /// Arguments after the runner.
    pub args: Vec<String>,
}

/// Parses `[scripts].test` of `Anchor.toml`.
///
/// `yarn run ` and `npx ` prefixes are dropped, so
/// `yarn run ts-mocha -p ./tsconfig.json tests/**/*.ts` yields the runner
/// `ts-mocha` and the remaining arguments.
pub fn test_runner_from_anchor_toml(workspace_root: &Path) -> Option<TestRunner> {
    let path = workspace_root.join(ANCHOR_TOML);
    if !path.is_file() {
        return None;
    }
    let table = match read_toml(&path) {
        Ok(table) => table,
        Err(e) => {
            warn!("Could not read {ANCHOR_TOML}: {e}");
            return None;
        }
    };
    let script = table.get("scripts")?.get("test")?.as_str()?;
    let captures = SCRIPT_RUNNER.captures(script)?;
    Some(TestRunner {
        runner: captures.get(1)?.as_str().to_string(),
        args: captures
            .get(2)
            .map(|m| m.as_str().split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_common::test_utils::{package_manifest, FakeWorkspace};

    #[test]
    fn test_anchor_program_names_come_from_manifests() {
        let ws = FakeWorkspace::anchor(&["program-a", "program-b"]).unwrap();
        assert!(is_managed_program(ws.root()));
        assert_eq!(discover_program_names(ws.root()).unwrap(), vec!["program-a", "program-b"]);
    }

    #[test]
    fn test_missing_program_manifest_is_an_error() {
        let ws = FakeWorkspace::anchor(&["program-a"]).unwrap();
        std::fs::create_dir_all(ws.path("programs/stray")).unwrap();
        assert!(matches!(discover_program_names(ws.root()), Err(SessionError::Config(_))));
    }

    #[test]
    fn test_native_program_name() {
        let ws = FakeWorkspace::native("counter").unwrap();
        assert!(!is_managed_program(ws.root()));
        assert_eq!(discover_program_names(ws.root()).unwrap(), vec!["counter"]);

        let empty = FakeWorkspace::new().unwrap();
        assert!(discover_program_names(empty.root()).is_err());
    }

    #[test]
    fn test_backend_detection() {
        let ws = FakeWorkspace::anchor(&["program-a"]).unwrap();
        assert!(!has_supported_backend(ws.root()));

        ws.write_file("target/debug/Cargo.toml", &package_manifest("x", &["litesvm"])).unwrap();
        ws.write_file(".cache/Cargo.toml", &package_manifest("y", &["mollusk-svm"])).unwrap();
        assert!(!has_supported_backend(ws.root()));

        ws.write_file(
            "programs/program-a/Cargo.toml",
            &package_manifest("program-a", &["mollusk-svm"]),
        )
        .unwrap();
        assert!(has_supported_backend(ws.root()));
    }

    #[test]
    fn test_runner_from_scripts() {
        let ws = FakeWorkspace::anchor(&[]).unwrap();
        assert_eq!(test_runner_from_anchor_toml(ws.root()), None);

        ws.write_file(
            "Anchor.toml",
            "[scripts]\ntest = \"yarn run ts-mocha -p ./tsconfig.json -t 1000000 tests/**/*.ts\"\n",
        )
        .unwrap();
        let runner = test_runner_from_anchor_toml(ws.root()).unwrap();
        assert_eq!(runner.runner, "ts-mocha");
        assert_eq!(runner.args, vec!["-p", "./tsconfig.json", "-t", "1000000", "tests/**/*.ts"]);
    }
}
