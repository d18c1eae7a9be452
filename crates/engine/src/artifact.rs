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

//! Artifact resolution.
//!
//! After a build, every requested program must have a debug binary and a
//! deployable binary in the output directory. The deployable binary is
//! hashed so that a running VM instance can later be mapped back to the
//! program it executes.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use tether_common::{Fingerprint, ProgramArtifact};
use tracing::{debug, info};

use crate::{
    BuildRunner, BuildStrategy, SessionError, SessionHandle, SessionResult, DEBUG_EXTENSION,
    DEPLOY_EXTENSION,
};

/// Build output file stem for a program name: hyphens become underscores.
pub fn normalize_program_name(name: &str) -> String {
    name.replace('-', "_")
}

/// First file in `files` that starts with the normalized program name and
/// ends with `extension`.
///
/// `files` are bare file names; the input order is not significant, the
/// lexicographically smallest match wins.
pub fn find_artifact_file<'a>(
    files: &'a [String],
    program_name: &str,
    extension: &str,
) -> Option<&'a str> {
    let stem = normalize_program_name(program_name);
    files
        .iter()
        .filter(|f| f.starts_with(&stem) && f.ends_with(extension))
        .map(String::as_str)
        .sorted()
        .next()
}

/// Builds the workspace and locates, hashes and records program binaries.
#[derive(Debug)]
pub struct ArtifactResolver<'a, R> {
    strategy: &'a BuildStrategy,
    runner: &'a R,
}

impl<'a, R: BuildRunner> ArtifactResolver<'a, R> {
    /// Resolver that builds with `strategy` through `runner`.
    pub fn new(strategy: &'a BuildStrategy, runner: &'a R) -> Self {
        Self { strategy, runner }
    }

    /// Builds the workspace once and resolves every program in `program_names`.
    ///
    /// All-or-nothing: a single missing binary fails the whole call and the
    /// session is left untouched. On success the session's executables are
    /// replaced and the fingerprint table is extended.
    pub async fn resolve(
        &self,
        session: &SessionHandle,
        workspace_root: &Path,
        program_names: &[String],
        managed: bool,
    ) -> SessionResult<HashMap<String, ProgramArtifact>> {
        self.strategy.build(workspace_root, managed, self.runner).await?;

        let artifacts = locate_artifacts(&self.strategy.output_dir(workspace_root), program_names)?;
        session.record_artifacts(artifacts.values());
        info!(
            "Resolved {} program(s): {}",
            artifacts.len(),
            artifacts.keys().sorted().join(", ")
        );
        Ok(artifacts)
    }
}

/// Locates and fingerprints the binaries of `program_names` in `output_dir`
/// without building.
pub fn locate_artifacts(
    output_dir: &Path,
    program_names: &[String],
) -> SessionResult<HashMap<String, ProgramArtifact>> {
    let files = list_files(output_dir)?;
    let mut artifacts = HashMap::with_capacity(program_names.len());

    for name in program_names {
        let deploy = find_artifact_file(&files, name, DEPLOY_EXTENSION).ok_or_else(|| {
            SessionError::ArtifactNotFound {
                program: name.clone(),
                kind: "deployable",
                dir: output_dir.to_path_buf(),
            }
        })?;
        let debug = find_artifact_file(&files, name, DEBUG_EXTENSION).ok_or_else(|| {
            SessionError::ArtifactNotFound {
                program: name.clone(),
                kind: "debug",
                dir: output_dir.to_path_buf(),
            }
        })?;

        let deploy_binary = output_dir.join(deploy);
        let fingerprint = Fingerprint::from_file(&deploy_binary)?;
        debug!(program = %name, %fingerprint, "Hashed deployable binary");

        artifacts.insert(
            name.clone(),
            ProgramArtifact {
                program_name: name.clone(),
                debug_binary: output_dir.join(debug),
                deploy_binary,
                fingerprint,
            },
        );
    }
    Ok(artifacts)
}

fn list_files(dir: &Path) -> SessionResult<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SessionError::BuildFailure(format!("build output directory {} is missing", dir.display()))
        } else {
            e.into()
        }
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                files.push(name.to_string());
            }
        }
    }
    Ok(files)
}

/// Debug binary of `program`, if it was resolved in this session.
pub fn debug_binary_for(session: &SessionHandle, program: &str) -> Option<PathBuf> {
    session.lock().executables_by_program.get(program).map(|e| e.debug_binary.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BuildInvocation, BuildStrategyKind, CommandOutput};
    use tether_common::test_utils::FakeWorkspace;

    struct NoopRunner;

    impl BuildRunner for NoopRunner {
        async fn run(&self, _: &BuildInvocation) -> SessionResult<CommandOutput> {
            Ok(CommandOutput { success: true, ..Default::default() })
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_program_name() {
        assert_eq!(normalize_program_name("my-Program-x"), "my_Program_x");
    }

    #[test]
    fn test_find_artifact_file_prefix_and_extension() {
        let files = names(&["my_prog.so", "my_prog.debug", "my_prog-keypair.json", "other.so"]);
        assert_eq!(find_artifact_file(&files, "my-prog", ".so"), Some("my_prog.so"));
        assert_eq!(find_artifact_file(&files, "my-prog", ".debug"), Some("my_prog.debug"));
        assert_eq!(find_artifact_file(&files, "missing", ".so"), None);
    }

    #[tokio::test]
    async fn test_resolve_records_session_state() {
        tether_common::logging::ensure_test_logging(None);
        let ws = FakeWorkspace::anchor(&["alpha", "beta"]).unwrap();
        ws.write_binaries("alpha", b"alpha bytes").unwrap();
        ws.write_binaries("beta", b"beta bytes").unwrap();

        let session = SessionHandle::new(6612);
        let strategy = BuildStrategy::new(BuildStrategyKind::SbpfV0, "1.51");
        let artifacts = ArtifactResolver::new(&strategy, &NoopRunner)
            .resolve(&session, ws.root(), &names(&["alpha", "beta"]), true)
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 2);
        assert_ne!(artifacts["alpha"].fingerprint, artifacts["beta"].fingerprint);

        let state = session.lock();
        assert_eq!(state.executables_by_program.len(), 2);
        for exe in state.executables_by_program.values() {
            assert!(exe.debug_binary.exists());
            assert!(exe.deploy_binary.exists());
        }
        assert_eq!(
            state.fingerprint_to_program.get(&Fingerprint::from_bytes(b"beta bytes")),
            Some(&"beta".to_string())
        );
    }

    #[tokio::test]
    async fn test_resolve_is_all_or_nothing() {
        tether_common::logging::ensure_test_logging(None);
        let ws = FakeWorkspace::anchor(&["alpha", "beta"]).unwrap();
        ws.write_binaries("alpha", b"alpha bytes").unwrap();
        ws.write_debug_only("beta").unwrap();

        let session = SessionHandle::new(6612);
        let strategy = BuildStrategy::new(BuildStrategyKind::SbpfV0, "1.51");
        let err = ArtifactResolver::new(&strategy, &NoopRunner)
            .resolve(&session, ws.root(), &names(&["alpha", "beta"]), true)
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::ArtifactNotFound { ref program, .. } if program == "beta"));
        assert!(session.lock().executables_by_program.is_empty());
        assert!(session.lock().fingerprint_to_program.is_empty());
    }

    #[test]
    fn test_missing_output_dir_is_build_failure() {
        let ws = FakeWorkspace::new().unwrap();
        let err = locate_artifacts(&ws.path("target/deploy"), &names(&["alpha"])).unwrap_err();
        assert!(matches!(err, SessionError::BuildFailure(_)));
    }
}
