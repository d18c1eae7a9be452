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

//! Flat `address name` map scraped from a binary's symbol table.
//!
//! This is a best-effort text adapter over `llvm-objdump -t --demangle`. It
//! does not read DWARF, so functions that were inlined or optimized out are
//! missing or may resolve to the wrong symbol.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info};

use crate::{BuildInvocation, BuildRunner, SessionError, SessionResult};

/// What a function resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolTarget {
    /// Entry address, as printed in the symbol table.
    Address(String),
    /// Symbol name to break on.
    Name(String),
}

/// Function entry addresses by symbol name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionAddressMap {
    entries: Vec<(String, String)>,
}

impl FunctionAddressMap {
    /// Parses `address name` lines; blank and malformed lines are skipped.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let address = parts.next()?;
                let name = parts.next()?;
                Some((address.to_string(), name.to_string()))
            })
            .collect();
        Self { entries }
    }

    /// Extracts function rows from `llvm-objdump -t` output.
    ///
    /// Keeps rows flagged ` F ` and takes the first and sixth columns.
    pub fn from_objdump(output: &str) -> Self {
        let entries = output
            .lines()
            .filter(|line| line.contains(" F "))
            .filter_map(|line| {
                let columns: Vec<&str> = line.split_whitespace().collect();
                Some((columns.first()?.to_string(), columns.get(5)?.to_string()))
            })
            .collect();
        Self { entries }
    }

    /// Dumps the symbol tables of `debug_binaries` and merges their functions.
    pub async fn generate<R: BuildRunner>(
        runner: &R,
        workspace_root: &Path,
        debug_binaries: &[PathBuf],
    ) -> SessionResult<Self> {
        let mut map = Self::default();
        for binary in debug_binaries {
            let binary_arg = binary.to_string_lossy();
            let invocation = BuildInvocation::new(
                "llvm-objdump",
                &["-t", binary_arg.as_ref(), "--demangle"],
                workspace_root,
            );
            let output = runner.run(&invocation).await?;
            if !output.success {
                return Err(SessionError::BuildFailure(format!(
                    "could not generate function address map for {}: {}",
                    binary.display(),
                    output.stderr.trim()
                )));
            }
            let part = Self::from_objdump(&output.stdout);
            debug!("{} function symbols in {}", part.len(), binary.display());
            map.entries.extend(part.entries);
        }
        info!("Function address map has {} entries", map.len());
        Ok(map)
    }

    /// Looks up `function`.
    ///
    /// Managed programs wrap instruction handlers as `...global::<name>`, so
    /// the wrapped form is matched and the entry address returned. Otherwise
    /// any symbol containing `function` confirms it exists and the bare name
    /// is returned, since raw addresses are sometimes remapped by the debugger.
    pub fn resolve(&self, function: &str, managed: bool) -> Option<SymbolTarget> {
        if managed {
            let pattern = Regex::new(&format!(r"global::{}(::|$)", regex::escape(function))).ok()?;
            self.entries
                .iter()
                .find(|(_, name)| pattern.is_match(name))
                .map(|(address, _)| SymbolTarget::Address(address.clone()))
        } else {
            self.entries
                .iter()
                .any(|(_, name)| name.contains(function))
                .then(|| SymbolTarget::Name(function.to_string()))
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
