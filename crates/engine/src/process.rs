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

//! The run process: the test binary or test runner that hosts the VM.
//!
//! It is started with the first debug port in its environment. Its output is
//! appended to `<workspace>/.tether.log` with timestamps and, when the log
//! fingerprint channel is in use, scanned for program fingerprints.

use std::{
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use chrono::{SecondsFormat, Utc};
use tether_common::env::{SBPF_DEBUG_PORT, VM_DEBUG_EXEC_INFO_FILE, VM_DEBUG_PORT};
use tokio::{
    fs::OpenOptions,
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::{Child, Command},
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{scan_fingerprint, test_runner_from_anchor_toml, SessionError, SessionHandle, SessionResult};

/// File, relative to the workspace root, that receives run-process output.
pub const RUN_LOG_FILE: &str = ".tether.log";

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTarget {
    /// A Rust test function, run through `cargo test`.
    NativeTest {
        /// Exact test name.
        test_name: String,
    },
    /// An external runner such as `ts-mocha` or `anchor test`.
    Script {
        /// Executable.
        program: String,
        /// Arguments.
        args: Vec<String>,
    },
}

impl RunTarget {
    /// `cargo test <name> -- --exact --nocapture`.
    pub fn native_test(test_name: impl Into<String>) -> Self {
        Self::NativeTest { test_name: test_name.into() }
    }

    /// The runner from `Anchor.toml` `[scripts].test`, or `anchor test`.
    ///
    /// A runner installed under `node_modules` is invoked through its bin
    /// script.
    pub fn workspace_script(workspace_root: &Path) -> Self {
        match test_runner_from_anchor_toml(workspace_root) {
            Some(runner) => {
                let local = workspace_root
                    .join("node_modules")
                    .join(&runner.runner)
                    .join("bin")
                    .join(&runner.runner);
                let program = if local.is_file() {
                    local.to_string_lossy().into_owned()
                } else {
                    runner.runner
                };
                Self::Script { program, args: runner.args }
            }
            None => Self::Script { program: "anchor".into(), args: vec!["test".into()] },
        }
    }

    /// A user-supplied command line; `{test}` is replaced by `test_name`.
    ///
    /// Returns `None` for an empty command.
    pub fn custom(command: &[String], test_name: &str) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::Script {
            program: program.clone(),
            args: args.iter().map(|arg| arg.replace("{test}", test_name)).collect(),
        })
    }

    /// Executable and arguments.
    pub fn command_line(&self) -> (String, Vec<String>) {
        match self {
            Self::NativeTest { test_name } => (
                "cargo".into(),
                vec!["test".into(), test_name.clone(), "--".into(), "--exact".into(), "--nocapture".into()],
            ),
            Self::Script { program, args } => (program.clone(), args.clone()),
        }
    }
}

/// Options for [`RunProcess::spawn`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Working directory; also where the log file goes.
    pub workspace_root: PathBuf,
    /// First debug port for the VM.
    pub first_port: u16,
    /// Marker file handed to the VM, for the marker-file channel.
    pub marker_file: Option<PathBuf>,
    /// Whether output lines are scanned for fingerprints.
    pub scan_output: bool,
}

/// Handle to a running run process.
///
/// Dropping the handle kills the process.
#[derive(Debug)]
pub struct RunProcess {
    pid: Option<u32>,
    log_file: PathBuf,
    kill: Option<oneshot::Sender<()>>,
    supervisor: JoinHandle<Option<ExitStatus>>,
}

impl RunProcess {
    /// Starts `target` with the debug port (and marker file) in its environment.
    pub async fn spawn(
        target: &RunTarget,
        options: RunOptions,
        session: SessionHandle,
    ) -> SessionResult<Self> {
        let (program, args) = target.command_line();
        let log_file = options.workspace_root.join(RUN_LOG_FILE);

        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(&options.workspace_root)
            .env(VM_DEBUG_PORT, options.first_port.to_string())
            .env(SBPF_DEBUG_PORT, options.first_port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(marker) = &options.marker_file {
            command.env(VM_DEBUG_EXEC_INFO_FILE, marker);
        }

        let mut child = command
            .spawn()
            .map_err(|source| SessionError::SpawnFailure { command: program.clone(), source })?;
        let pid = child.id();
        info!("Started `{program} {}` (pid {pid:?}) with {VM_DEBUG_PORT}={}", args.join(" "), options.first_port);

        let log = OpenOptions::new().create(true).write(true).truncate(true).open(&log_file).await?;
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, "stdout", lines_tx.clone(), session.clone(), options.scan_output));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, "stderr", lines_tx, session, options.scan_output));
        }
        tokio::spawn(write_log(log, lines_rx));

        let (kill_tx, kill_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(child, program, kill_rx));

        Ok(Self { pid, log_file, kill: Some(kill_tx), supervisor })
    }

    /// OS process id, if the process was still running at spawn time.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Path of the output log.
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Waits for the process to exit on its own.
    pub async fn wait(mut self) -> Option<ExitStatus> {
        let _keep_alive = self.kill.take();
        (&mut self.supervisor).await.ok().flatten()
    }

    /// Kills the process and waits for it to be reaped.
    pub async fn kill(mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        let _ = (&mut self.supervisor).await;
    }
}

async fn supervise(mut child: Child, program: String, kill: oneshot::Receiver<()>) -> Option<ExitStatus> {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => {
                info!("`{program}` exited successfully");
                Some(status)
            }
            Ok(status) => {
                warn!("`{program}` exited with {status}");
                Some(status)
            }
            Err(e) => {
                error!("Failed to wait for `{program}`: {e}");
                None
            }
        },
        _ = kill => {
            debug!("Killing `{program}`");
            if let Err(e) = child.kill().await {
                warn!("Failed to kill `{program}`: {e}");
            }
            None
        }
    }
}

async fn forward_lines<R>(
    stream: R,
    tag: &'static str,
    lines_tx: mpsc::UnboundedSender<String>,
    session: SessionHandle,
    scan: bool,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if scan {
                    if let Some(fingerprint) = scan_fingerprint(&line) {
                        session.set_current_fingerprint(fingerprint);
                    }
                }
                let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
                if lines_tx.send(format!("[{stamp}] [{tag}] {line}\n")).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading {tag}: {e}");
                break;
            }
        }
    }
}

async fn write_log(mut file: tokio::fs::File, mut lines: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        let written = match file.write_all(line.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!("Could not write run log: {e}");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BuildStrategyKind;
    use tether_common::{test_utils::FakeWorkspace, Fingerprint, ProgramArtifact};

    #[test]
    fn test_native_command_line() {
        let (program, args) = RunTarget::native_test("test_cross").command_line();
        assert_eq!(program, "cargo");
        assert_eq!(args, vec!["test", "test_cross", "--", "--exact", "--nocapture"]);
    }

    #[test]
    fn test_workspace_script_falls_back_to_anchor_test() {
        let ws = FakeWorkspace::anchor(&["alpha"]).unwrap();
        assert_eq!(
            RunTarget::workspace_script(ws.root()),
            RunTarget::Script { program: "anchor".into(), args: vec!["test".into()] }
        );

        ws.write_file("Anchor.toml", "[scripts]\ntest = \"npx ts-mocha tests/**/*.ts\"\n").unwrap();
        ws.write_file("node_modules/ts-mocha/bin/ts-mocha", "#!/usr/bin/env node\n").unwrap();
        let RunTarget::Script { program, args } = RunTarget::workspace_script(ws.root()) else {
            panic!("expected a script target");
        };
        assert!(program.ends_with("node_modules/ts-mocha/bin/ts-mocha"));
        assert_eq!(args, vec!["tests/**/*.ts"]);
    }

    #[test]
    fn test_custom_command_substitutes_test_name() {
        let command = vec!["./run.sh".to_string(), "--filter".to_string(), "{test}".to_string()];
        assert_eq!(
            RunTarget::custom(&command, "test_cross"),
            Some(RunTarget::Script { program: "./run.sh".into(), args: vec!["--filter".into(), "test_cross".into()] })
        );
        assert_eq!(RunTarget::custom(&[], "test_cross"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_is_logged_and_scanned() {
        tether_common::logging::ensure_test_logging(None);
        let ws = FakeWorkspace::native("alpha").unwrap();
        let digest = Fingerprint::from_bytes(b"alpha");

        let session = SessionHandle::new(6612);
        session.begin(6612, BuildStrategyKind::SbpfV1, vec![]).unwrap();
        session.record_artifacts([&ProgramArtifact {
            program_name: "alpha".into(),
            debug_binary: "/d/alpha.debug".into(),
            deploy_binary: "/d/alpha.so".into(),
            fingerprint: digest.clone(),
        }]);

        let target = RunTarget::Script {
            program: "sh".into(),
            args: vec!["-c".into(), format!("echo \"port $VM_DEBUG_PORT\"; echo \"exec {digest}\" >&2")],
        };
        let options = RunOptions {
            workspace_root: ws.root().to_path_buf(),
            first_port: 7100,
            marker_file: None,
            scan_output: true,
        };
        let process = RunProcess::spawn(&target, options, session.clone()).await.unwrap();
        let log_file = process.log_file().to_path_buf();
        let status = process.wait().await.unwrap();
        assert!(status.success());

        // the log writer drains asynchronously
        for _ in 0..50 {
            if session.lock().current_fingerprint.is_some()
                && std::fs::read_to_string(&log_file).unwrap_or_default().contains("[stderr]")
            {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        assert_eq!(session.take_fingerprint_match().as_deref(), Some("alpha"));
        let log = std::fs::read_to_string(&log_file).unwrap();
        assert!(log.contains("[stdout] port 7100"));
        assert!(log.contains(&format!("[stderr] exec {digest}")));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let ws = FakeWorkspace::new().unwrap();
        let target = RunTarget::Script { program: "definitely-not-a-real-binary-xyz".into(), args: vec![] };
        let options =
            RunOptions { workspace_root: ws.root().to_path_buf(), first_port: 1, marker_file: None, scan_output: false };
        let err = RunProcess::spawn(&target, options, SessionHandle::new(1)).await.unwrap_err();
        assert!(matches!(err, SessionError::SpawnFailure { .. }));
    }
}
