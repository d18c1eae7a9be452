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

//! Test utilities for building throwaway program workspaces.
//!
//! A [`FakeWorkspace`] is a temporary directory laid out the way a real
//! program workspace is after a build: `Cargo.toml`, optionally `Anchor.toml`
//! and `programs/*`, and `target/deploy` holding one debug and one deployable
//! binary per program.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use tracing::debug;

/// Directory, relative to the workspace root, that builds write binaries to.
pub const DEPLOY_DIR: &str = "target/deploy";

/// A temporary program workspace, deleted on drop.
#[derive(Debug)]
pub struct FakeWorkspace {
    dir: TempDir,
}

impl FakeWorkspace {
    /// Creates an empty workspace.
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("tether-ws-").tempdir()?;
        debug!("Created fake workspace at {}", dir.path().display());
        Ok(Self { dir })
    }

    /// Creates a single-program workspace with a root `Cargo.toml`.
    pub fn native(program: &str) -> io::Result<Self> {
        let ws = Self::new()?;
        ws.write_file("Cargo.toml", &package_manifest(program, &[]))?;
        Ok(ws)
    }

    /// Creates an Anchor-style workspace with one crate per program under `programs/`.
    pub fn anchor(programs: &[&str]) -> io::Result<Self> {
        let ws = Self::new()?;
        ws.write_file("Anchor.toml", "[provider]\ncluster = \"localnet\"\n")?;
        ws.write_file("Cargo.toml", "[workspace]\nmembers = [\"programs/*\"]\n")?;
        for program in programs {
            ws.write_file(
                format!("programs/{program}/Cargo.toml"),
                &package_manifest(program, &[]),
            )?;
        }
        Ok(ws)
    }

    /// Workspace root.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of `relative` inside the workspace.
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Writes `contents` to `relative`, creating parent directories.
    pub fn write_file(&self, relative: impl AsRef<Path>, contents: &str) -> io::Result<PathBuf> {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Writes the build outputs of `program` into `target/deploy`.
    ///
    /// The file stem is the program name with hyphens turned into
    /// underscores. `deploy_bytes` becomes the deployable binary, so distinct
    /// bytes give distinct fingerprints.
    pub fn write_binaries(&self, program: &str, deploy_bytes: &[u8]) -> io::Result<(PathBuf, PathBuf)> {
        let stem = program.replace('-', "_");
        let deploy_dir = self.path(DEPLOY_DIR);
        fs::create_dir_all(&deploy_dir)?;

        let debug = deploy_dir.join(format!("{stem}.debug"));
        let deploy = deploy_dir.join(format!("{stem}.so"));
        fs::write(&debug, b"\x7fELF debug")?;
        fs::write(&deploy, deploy_bytes)?;
        Ok((debug, deploy))
    }

    /// Writes only the debug binary of `program`, leaving the deployable one missing.
    pub fn write_debug_only(&self, program: &str) -> io::Result<PathBuf> {
        let stem = program.replace('-', "_");
        let deploy_dir = self.path(DEPLOY_DIR);
        fs::create_dir_all(&deploy_dir)?;
        let debug = deploy_dir.join(format!("{stem}.debug"));
        fs::write(&debug, b"\x7fELF debug")?;
        Ok(debug)
    }
}

/// A minimal `Cargo.toml` for a package named `name`.
pub fn package_manifest(name: &str, dependencies: &[&str]) -> String {
    let mut manifest = format!("[package]\nname = \"{name}\"\nversion = \"0.1.0\"\n\n[dependencies]\n");
    for dep in dependencies {
        manifest.push_str(&format!("{dep} = \"*\"\n"));
    }
    manifest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_layout() {
        let ws = FakeWorkspace::anchor(&["alpha", "beta-prog"]).unwrap();
        assert!(ws.path("Anchor.toml").exists());
        assert!(ws.path("programs/beta-prog/Cargo.toml").exists());
    }

    #[test]
    fn test_binaries_use_normalized_stem() {
        let ws = FakeWorkspace::native("my-program").unwrap();
        let (debug, deploy) = ws.write_binaries("my-program", b"bytes").unwrap();
        assert!(debug.ends_with("target/deploy/my_program.debug"));
        assert!(deploy.ends_with("target/deploy/my_program.so"));
        assert_eq!(fs::read(deploy).unwrap(), b"bytes");
    }
}
