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

//! Editor settings overridden for the lifetime of a session.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, info};

use crate::HostIde;

/// Editor setting naming the debugger library.
pub const LLDB_LIBRARY_SETTING: &str = "lldb.library";

static TOOLS_VERSION_DIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v(\d+)\.(\d+)$").expect("tools version pattern is valid"));

#[cfg(target_os = "macos")]
const LLDB_LIBRARY_FILE: &str = "liblldb.dylib";
#[cfg(not(target_os = "macos"))]
const LLDB_LIBRARY_FILE: &str = "liblldb.so";

/// Remembers the original value of every overridden setting.
///
/// Only the first override of a key records its original value, so repeated
/// overrides still restore what the user had.
#[derive(Debug, Default)]
pub struct SettingsGuard {
    originals: Mutex<HashMap<String, Option<String>>>,
}

impl SettingsGuard {
    /// Empty guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides `key` on the host.
    pub async fn override_setting<H: HostIde>(&self, host: &H, key: &str, value: &str) {
        let previous = host.override_setting(key, value).await;
        debug!("Overrode setting {key} (was {previous:?})");
        self.originals.lock().entry(key.to_string()).or_insert(previous);
    }

    /// Restores every overridden setting. A second call is a no-op.
    pub async fn restore_all<H: HostIde>(&self, host: &H) {
        let originals: Vec<_> = self.originals.lock().drain().collect();
        for (key, value) in originals {
            debug!("Restoring setting {key} to {value:?}");
            host.restore_setting(&key, value).await;
        }
    }

    /// Keys currently overridden.
    pub fn overridden(&self) -> Vec<String> {
        self.originals.lock().keys().cloned().sorted().collect()
    }
}

/// Debugger library shipped with the platform tools.
///
/// Looks in `~/.cache/solana/v<version>` first, then in the newest installed
/// tools version that has the library.
pub fn find_lldb_library(version: &str) -> Option<PathBuf> {
    let cache = dirs::home_dir()?.join(".cache").join("solana");
    find_lldb_library_in(&cache, version)
}

/// [`find_lldb_library`] under an explicit tools cache directory.
pub fn find_lldb_library_in(cache_dir: &Path, version: &str) -> Option<PathBuf> {
    let version = version.trim_start_matches('v');
    let preferred = library_path(&cache_dir.join(format!("v{version}")));
    if preferred.is_file() {
        return Some(preferred);
    }

    let entries = std::fs::read_dir(cache_dir).ok()?;
    let fallback = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let captures = TOOLS_VERSION_DIR.captures(&name)?;
            let major: u32 = captures[1].parse().ok()?;
            let minor: u32 = captures[2].parse().ok()?;
            Some(((major, minor), entry.path()))
        })
        .sorted_by(|a, b| b.0.cmp(&a.0))
        .map(|(_, dir)| library_path(&dir))
        .find(|path| path.is_file());

    if let Some(path) = &fallback {
        info!("Platform tools v{version} not found, using {}", path.display());
    }
    fallback
}

fn library_path(tools_dir: &Path) -> PathBuf {
    tools_dir.join("platform-tools").join("llvm").join("lib").join(LLDB_LIBRARY_FILE)
}
