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

//! Build strategies and the external build collaborator.
//!
//! A [`BuildStrategy`] knows which commands compile the workspace for one VM
//! architecture, where the binaries end up and how breakpoints have to be
//! expressed for that architecture. Commands are executed through a
//! [`BuildRunner`], which is a real process runner in production and a fake
//! in tests.

use std::{
    fmt,
    future::Future,
    path::{Path, PathBuf},
    process::Stdio,
};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{SessionError, SessionResult};

/// Directory, relative to the workspace root, that holds build outputs.
pub const DEPLOY_DIR: &str = "target/deploy";

/// Extension of the binary carrying debug info.
pub const DEBUG_EXTENSION: &str = ".debug";

/// Extension of the binary the VM executes.
pub const DEPLOY_EXTENSION: &str = ".so";

/// Target VM architecture the workspace is compiled for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStrategyKind {
    /// Legacy SBF v0. The VM cannot map lines, so breakpoints go through symbols.
    #[default]
    SbpfV0,
    /// SBF v1 with dynamic stack frames. Line breakpoints work natively.
    SbpfV1,
}

impl fmt::Display for BuildStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SbpfV0 => f.write_str("sbpf-v0"),
            Self::SbpfV1 => f.write_str("sbpf-v1"),
        }
    }
}

/// How editor breakpoints become debugger commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationStrategy {
    /// `breakpoint set --file <abs path> --line <n>`
    LineBased,
    /// Enclosing function, then its address or name from the symbol map.
    SymbolBased,
}

/// One external command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInvocation {
    /// Executable name or path.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
}

impl BuildInvocation {
    /// Creates an invocation of `program` in `cwd`.
    pub fn new(program: &str, args: &[&str], cwd: &Path) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: cwd.to_path_buf(),
        }
    }
}

impl fmt::Display for BuildInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the command exited with status 0.
    pub success: bool,
    /// Exit code, if the command was not killed by a signal.
    pub code: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

/// Runs build-time commands to completion.
pub trait BuildRunner: Send + Sync {
    /// Runs `invocation` and captures its output.
    ///
    /// Only a failure to start the command is an error; a non-zero exit is
    /// reported through [`CommandOutput::success`].
    fn run(&self, invocation: &BuildInvocation) -> impl Future<Output = SessionResult<CommandOutput>> + Send;
}

/// [`BuildRunner`] backed by real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl BuildRunner for ProcessRunner {
    async fn run(&self, invocation: &BuildInvocation) -> SessionResult<CommandOutput> {
        debug!("Running `{invocation}` in {}", invocation.cwd.display());
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| SessionError::SpawnFailure {
                command: invocation.program.clone(),
                source,
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// A build strategy selected at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStrategy {
    kind: BuildStrategyKind,
    tools_version: String,
}

impl BuildStrategy {
    /// Strategy for `kind` using platform-tools `tools_version`.
    pub fn new(kind: BuildStrategyKind, tools_version: impl Into<String>) -> Self {
        Self { kind, tools_version: tools_version.into() }
    }

    /// The discriminant this strategy was built from.
    pub fn kind(&self) -> BuildStrategyKind {
        self.kind
    }

    /// Where binaries land after a build.
    pub fn output_dir(&self, workspace_root: &Path) -> PathBuf {
        workspace_root.join(DEPLOY_DIR)
    }

    /// How breakpoints must be expressed for binaries built this way.
    pub fn translation_strategy(&self) -> TranslationStrategy {
        match self.kind {
            BuildStrategyKind::SbpfV0 => TranslationStrategy::SymbolBased,
            BuildStrategyKind::SbpfV1 => TranslationStrategy::LineBased,
        }
    }

    /// Commands that compile the workspace, in order.
    pub fn invocations(&self, workspace_root: &Path, managed: bool) -> Vec<BuildInvocation> {
        match self.kind {
            BuildStrategyKind::SbpfV0 => {
                vec![BuildInvocation::new("cargo", &["build-sbf", "--debug"], workspace_root)]
            }
            BuildStrategyKind::SbpfV1 => {
                let version = format!("v{}", self.tools_version.trim_start_matches('v'));
                let mut commands = Vec::with_capacity(2);
                if managed {
                    commands.push(BuildInvocation::new("anchor", &["build"], workspace_root));
                }
                commands.push(BuildInvocation::new(
                    "cargo-build-sbf",
                    &["--tools-version", &version, "--debug", "--arch", "v1"],
                    workspace_root,
                ));
                commands
            }
        }
    }

    /// Compiles the workspace.
    ///
    /// The v1 strategy first removes stale binaries so that a v0 build left
    /// in the output directory cannot be picked up afterwards.
    pub async fn build<R: BuildRunner>(
        &self,
        workspace_root: &Path,
        managed: bool,
        runner: &R,
    ) -> SessionResult<()> {
        if self.kind == BuildStrategyKind::SbpfV1 {
            remove_stale_binaries(&self.output_dir(workspace_root))?;
        }

        for invocation in self.invocations(workspace_root, managed) {
            info!("Building with `{invocation}`");
            let output = runner.run(&invocation).await?;
            if !output.success {
                let detail = if output.stderr.trim().is_empty() {
                    format!("`{invocation}` exited with {:?}", output.code)
                } else {
                    format!("`{invocation}`: {}", output.stderr.trim())
                };
                return Err(SessionError::BuildFailure(detail));
            }
        }
        Ok(())
    }
}

fn remove_stale_binaries(dir: &Path) -> SessionResult<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let path = entry?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.ends_with(DEBUG_EXTENSION) || name.ends_with(DEPLOY_EXTENSION) {
            debug!("Removing stale binary {}", path.display());
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Could not remove {}: {e}", path.display());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tether_common::test_utils::FakeWorkspace;

    #[derive(Default)]
    struct RecordingRunner {
        seen: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl BuildRunner for RecordingRunner {
        async fn run(&self, invocation: &BuildInvocation) -> SessionResult<CommandOutput> {
            self.seen.lock().push(invocation.to_string());
            let failed = self.fail_on.is_some_and(|p| invocation.program == p);
            Ok(CommandOutput {
                success: !failed,
                code: Some(i32::from(failed)),
                stdout: String::new(),
                stderr: if failed { "error: linker failed".into() } else { String::new() },
            })
        }
    }

    #[test]
    fn test_v0_invocations() {
        let strategy = BuildStrategy::new(BuildStrategyKind::SbpfV0, "1.51");
        let cmds = strategy.invocations(Path::new("/ws"), true);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].to_string(), "cargo build-sbf --debug");
        assert_eq!(strategy.translation_strategy(), TranslationStrategy::SymbolBased);
    }

    #[test]
    fn test_v1_invocations() {
        let strategy = BuildStrategy::new(BuildStrategyKind::SbpfV1, "1.51");
        let cmds: Vec<_> =
            strategy.invocations(Path::new("/ws"), true).iter().map(ToString::to_string).collect();
        assert_eq!(
            cmds,
            vec!["anchor build", "cargo-build-sbf --tools-version v1.51 --debug --arch v1"]
        );

        let native = strategy.invocations(Path::new("/ws"), false);
        assert_eq!(native.len(), 1);
        assert_eq!(strategy.translation_strategy(), TranslationStrategy::LineBased);
    }

    #[tokio::test]
    async fn test_v1_build_removes_stale_binaries() {
        tether_common::logging::ensure_test_logging(None);
        let ws = FakeWorkspace::native("alpha").unwrap();
        let (debug, deploy) = ws.write_binaries("alpha", b"old").unwrap();

        let runner = RecordingRunner::default();
        BuildStrategy::new(BuildStrategyKind::SbpfV1, "1.51")
            .build(ws.root(), false, &runner)
            .await
            .unwrap();

        assert!(!debug.exists());
        assert!(!deploy.exists());
        assert_eq!(runner.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_build_failure_stops_sequence() {
        tether_common::logging::ensure_test_logging(None);
        let ws = FakeWorkspace::anchor(&["alpha"]).unwrap();
        let runner = RecordingRunner { fail_on: Some("anchor"), ..Default::default() };

        let err = BuildStrategy::new(BuildStrategyKind::SbpfV1, "1.51")
            .build(ws.root(), true, &runner)
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::BuildFailure(ref msg) if msg.contains("linker failed")));
        assert_eq!(*runner.seen.lock(), vec!["anchor build".to_string()]);
    }
}
