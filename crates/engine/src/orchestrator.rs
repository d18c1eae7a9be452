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

//! Debug launch orchestration.
//!
//! The [`Orchestrator`] drives one debug session from request to teardown.
//!
//! # Workflow Overview
//!
//! 1. **Admission**: reject the request if a session is live, then check that
//!    every debug port the test needs is free
//! 2. **Compiling**: build the workspace, locate and fingerprint every program
//!    binary, prepare the breakpoint translator
//! 3. **AwaitingProcess**: override the debugger library setting, allocate one
//!    port per program of the matching CPI flow (or a single port) and start
//!    the run process
//! 4. **AwaitingFingerprint / Attaching**: fan out over the ports; each port
//!    that starts listening waits for the VM to announce which program it runs
//!    and asks the editor to attach to it
//! 5. **Attached**: the first confirmed debugger session id is recorded and
//!    the editor's breakpoints are restored into it
//! 6. **Terminated**: when the recorded session ends, or on a fatal error, the
//!    session is reset, loops are cancelled, settings are restored and the run
//!    process is killed

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tether_common::{find_flow, EditorBreakpoint, LaunchDescription, TargetCommand};
use tokio::{sync::mpsc, task::AbortHandle};
use tracing::{debug, error, info, warn};

use crate::{
    debug_binary_for, discover_program_names, find_lldb_library, find_lldb_library_in,
    has_supported_backend,
    is_managed_program, ArtifactResolver, BreakpointTranslator, BreakpointWarning, BuildRunner,
    BuildStrategy, EngineConfig, FanOutHandle, FingerprintChannel, FingerprintResolver,
    FunctionAddressMap, HostEvent, HostIde, MessageLevel, PortProbe, PortWatcher, RunOptions,
    RunProcess, RunTarget, SessionError, SessionHandle, SessionPhase, SessionResult,
    SettingsGuard, TranslationStrategy, LLDB_DEBUGGER_TYPE, LLDB_LIBRARY_SETTING,
};

/// Language the test to debug is written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestLanguage {
    /// A Rust test run with `cargo test`.
    #[default]
    Rust,
    /// A TypeScript test run by the workspace's test script.
    TypeScript,
}

/// A request to debug one test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugRequest {
    /// Test name, also used to pick a CPI flow.
    pub test_name: String,
    /// How the test is run.
    #[serde(default)]
    pub language: TestLanguage,
}

impl DebugRequest {
    /// Debug a Rust test.
    pub fn rust(test_name: impl Into<String>) -> Self {
        Self { test_name: test_name.into(), language: TestLanguage::Rust }
    }

    /// Debug a TypeScript test.
    pub fn typescript(test_name: impl Into<String>) -> Self {
        Self { test_name: test_name.into(), language: TestLanguage::TypeScript }
    }

    fn run_target(&self, workspace_root: &Path, command: Option<&[String]>) -> RunTarget {
        if let Some(target) = command.and_then(|command| RunTarget::custom(command, &self.test_name)) {
            return target;
        }
        match self.language {
            TestLanguage::Rust => RunTarget::native_test(&self.test_name),
            TestLanguage::TypeScript => RunTarget::workspace_script(workspace_root),
        }
    }
}

/// What a successful [`Orchestrator::start_debug`] set in motion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugLaunch {
    /// Programs built for this session.
    pub programs: Vec<String>,
    /// Debug ports being watched, in CPI order.
    pub ports: Vec<u16>,
}

/// Per-session resources that are not part of [`SessionHandle`] state.
#[derive(Debug, Default)]
struct SessionResources {
    translator: Option<BreakpointTranslator>,
    process: Option<RunProcess>,
    fan_out: Option<AbortHandle>,
}

struct Inner<R, P, H> {
    config: EngineConfig,
    workspace_root: PathBuf,
    runner: R,
    host: Arc<H>,
    session: SessionHandle,
    watcher: PortWatcher<P>,
    settings: SettingsGuard,
    resources: Mutex<SessionResources>,
}

/// Drives debug sessions for one workspace.
pub struct Orchestrator<R, P, H> {
    inner: Arc<Inner<R, P, H>>,
}

impl<R, P, H> Clone for Orchestrator<R, P, H> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<R, P, H> Orchestrator<R, P, H>
where
    R: BuildRunner + 'static,
    P: PortProbe,
    H: HostIde,
{
    /// Orchestrator for `workspace_root`.
    pub fn new(config: EngineConfig, workspace_root: impl Into<PathBuf>, runner: R, probe: P, host: H) -> Self {
        let session = SessionHandle::new(config.tcp_port);
        let watcher = PortWatcher::new(Arc::new(probe), session.clone(), config.port_poll_interval());
        Self {
            inner: Arc::new(Inner {
                config,
                workspace_root: workspace_root.into(),
                runner,
                host: Arc::new(host),
                session,
                watcher,
                settings: SettingsGuard::new(),
                resources: Mutex::new(SessionResources::default()),
            }),
        }
    }

    /// The session handle.
    pub fn session(&self) -> &SessionHandle {
        &self.inner.session
    }

    /// The port watcher.
    pub fn watcher(&self) -> &PortWatcher<P> {
        &self.inner.watcher
    }

    /// The host editor.
    pub fn host(&self) -> &H {
        &self.inner.host
    }

    /// The configuration in use.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Settings overridden for the current session.
    pub fn overridden_settings(&self) -> Vec<String> {
        self.inner.settings.overridden()
    }

    /// Starts debugging `request`.
    ///
    /// Returns once the run process is started and the port fan-out is
    /// running; attaches happen in the background. A request while a session
    /// is live fails with [`SessionError::SessionAlreadyActive`] and changes
    /// nothing. Any other failure tears the new session down before returning;
    /// when [`cleanup`](Self::cleanup) ends the session mid-launch this fails
    /// with [`SessionError::Cancelled`] and releases what the launch acquired.
    pub async fn start_debug(&self, request: DebugRequest) -> SessionResult<DebugLaunch> {
        let session = &self.inner.session;
        if session.is_active() {
            return Err(SessionError::SessionAlreadyActive);
        }

        let first_port = session.lock().tcp_port_cursor.max(self.inner.config.tcp_port);
        let port_count = self.port_count(&request);
        let candidates = (usize::from(first_port)..usize::from(first_port) + port_count)
            .filter_map(|port| u16::try_from(port).ok());
        self.inner.watcher.ensure_all_available(candidates).await?;

        let token = session.begin(
            self.inner.config.tcp_port,
            self.inner.config.build_strategy,
            self.inner.config.cpi_flows.clone(),
        )?;
        info!(test = %request.test_name, "Starting debug session");

        match self.launch(token, &request).await {
            Ok(launch) => Ok(launch),
            Err(e) if session.is_current(token) => {
                error!("Debug session failed: {e}");
                self.inner.host.show_message(MessageLevel::Error, &e.to_string()).await;
                self.cleanup().await;
                Err(e)
            }
            Err(e) => {
                info!("Debug session ended during launch: {e}");
                self.release_stale_launch().await;
                Err(e)
            }
        }
    }

    async fn launch(&self, token: u64, request: &DebugRequest) -> SessionResult<DebugLaunch> {
        let inner = &self.inner;
        let config = &inner.config;
        let workspace_root = inner.workspace_root.as_path();
        let managed = config.is_managed_program.unwrap_or_else(|| is_managed_program(workspace_root));

        let programs = discover_program_names(workspace_root)?;
        if !has_supported_backend(workspace_root) {
            warn!("No litesvm or mollusk dependency found, the VM may never open a debug port");
        }
        let strategy = BuildStrategy::new(config.build_strategy, config.platform_tools_version.clone());
        let artifacts = ArtifactResolver::new(&strategy, &inner.runner)
            .resolve(&inner.session, workspace_root, &programs, managed)
            .await?;
        self.ensure_current(token)?;

        let translator = match strategy.translation_strategy() {
            TranslationStrategy::LineBased => BreakpointTranslator::line_based(workspace_root),
            TranslationStrategy::SymbolBased => {
                let mut binaries: Vec<_> = artifacts.values().map(|a| a.debug_binary.clone()).collect();
                binaries.sort();
                let symbols = FunctionAddressMap::generate(&inner.runner, workspace_root, &binaries).await?;
                BreakpointTranslator::symbol_based(workspace_root, symbols, managed)
            }
        };
        {
            let mut resources = inner.resources.lock();
            self.ensure_current(token)?;
            resources.translator = Some(translator);
        }

        let library = match &config.platform_tools_dir {
            Some(dir) => find_lldb_library_in(dir, &config.platform_tools_version),
            None => find_lldb_library(&config.platform_tools_version),
        };
        match library {
            Some(library) => {
                let library = library.to_string_lossy();
                inner.settings.override_setting(inner.host.as_ref(), LLDB_LIBRARY_SETTING, &library).await;
            }
            None => warn!(
                "No debugger library found for platform tools v{}, keeping the editor default",
                config.platform_tools_version
            ),
        }
        self.ensure_current(token)?;

        let ports = inner.session.allocate_ports(self.port_count(request))?;
        debug!("Allocated debug ports {ports:?}");

        self.enter_phase(token, SessionPhase::AwaitingProcess)?;
        let options = RunOptions {
            workspace_root: workspace_root.to_path_buf(),
            first_port: ports[0],
            marker_file: (config.fingerprint_channel == FingerprintChannel::MarkerFile)
                .then(|| config.marker_file.clone()),
            scan_output: config.fingerprint_channel == FingerprintChannel::Log,
        };
        let target = request.run_target(workspace_root, config.test_command.as_deref());
        let process = RunProcess::spawn(&target, options, inner.session.clone()).await?;
        let orphan = {
            let mut resources = inner.resources.lock();
            if inner.session.is_current(token) {
                resources.process = Some(process);
                None
            } else {
                Some(process)
            }
        };
        if let Some(process) = orphan {
            debug!("Session reset while the run process was starting");
            process.kill().await;
            return Err(SessionError::Cancelled);
        }

        self.enter_phase(token, SessionPhase::AwaitingFingerprint(ports[0]))?;
        let fan_out = {
            let mut resources = inner.resources.lock();
            self.ensure_current(token)?;
            let on_open = self.attach_callback(token);
            let fan_out = inner.watcher.poll_until_open_for(token, ports.clone(), on_open);
            resources.fan_out = fan_out.as_ref().map(|handle| handle.abort_handle());
            fan_out
        };
        if let Some(fan_out) = fan_out {
            let orchestrator = self.clone();
            tokio::spawn(async move { orchestrator.supervise_fan_out(token, fan_out).await });
        }

        let mut programs: Vec<_> = artifacts.into_keys().collect();
        programs.sort();
        Ok(DebugLaunch { programs, ports })
    }

    /// Ports the VM needs for `request`: one per program of its CPI flow.
    fn port_count(&self, request: &DebugRequest) -> usize {
        find_flow(&self.inner.config.cpi_flows, &request.test_name)
            .map(|flow| flow.program_sequence.len())
            .unwrap_or(1)
            .max(1)
    }

    fn ensure_current(&self, token: u64) -> SessionResult<()> {
        if self.inner.session.is_current(token) {
            Ok(())
        } else {
            Err(SessionError::Cancelled)
        }
    }

    fn enter_phase(&self, token: u64, phase: SessionPhase) -> SessionResult<()> {
        if self.inner.session.set_phase_if_current(token, phase) {
            Ok(())
        } else {
            Err(SessionError::Cancelled)
        }
    }

    /// Releases what a launch acquired after [`cleanup`](Self::cleanup) already
    /// ran for its session.
    async fn release_stale_launch(&self) {
        if self.inner.session.is_active() {
            // the overrides belong to the newer session now
            return;
        }
        self.inner.settings.restore_all(self.inner.host.as_ref()).await;
    }

    /// Callback the fan-out runs for every port that starts listening.
    fn attach_callback(
        &self,
        token: u64,
    ) -> impl Fn(u16) -> BoxFuture<'static, SessionResult<()>> + Send + Sync + 'static {
        let host = self.inner.host.clone();
        let session = self.inner.session.clone();
        let resolver = FingerprintResolver::from_config(session.clone(), &self.inner.config);
        let timeout = self.inner.config.program_hash_timeout();
        let remote_host = self.inner.config.remote_host.clone();

        move |port| {
            let host = host.clone();
            let session = session.clone();
            let resolver = resolver.clone();
            let remote_host = remote_host.clone();
            async move {
                advance_phase(&session, SessionPhase::AwaitingFingerprint(port));
                let program = resolver.wait_for_program_name(timeout).await;
                if !session.is_current(token) {
                    return Ok(());
                }
                let program = program.ok_or(SessionError::ProgramHashTimeout {
                    port,
                    timeout_ms: timeout.as_millis() as u64,
                })?;
                let binary = debug_binary_for(&session, &program).ok_or_else(|| {
                    SessionError::AttachFailure(format!("no debug binary recorded for `{program}`"))
                })?;

                advance_phase(&session, SessionPhase::Attaching(port));
                info!(port, program = %program, "Attaching debugger");
                let launch = LaunchDescription::for_port(binary, remote_host, port);
                host.start_debugging(launch).await.map_err(|e| match e {
                    SessionError::AttachFailure(_) => e,
                    other => SessionError::AttachFailure(other.to_string()),
                })
            }
            .boxed()
        }
    }

    async fn supervise_fan_out(&self, token: u64, fan_out: FanOutHandle) {
        let result = match fan_out.await {
            Ok(result) => result,
            Err(e) => {
                debug!("Port fan-out stopped: {e}");
                return;
            }
        };
        let Err(e) = result else {
            return;
        };

        error!("Attach failed: {e}");
        self.inner.host.show_message(MessageLevel::Error, &e.to_string()).await;
        if !self.inner.session.is_current(token) {
            return;
        }
        // a timeout only ends its own port set while another debugger is attached
        let attached = self.inner.session.lock().id.is_some();
        if !matches!(e, SessionError::ProgramHashTimeout { .. }) || !attached {
            self.cleanup().await;
        }
    }

    /// Reacts to an editor event.
    pub async fn handle_event(&self, event: HostEvent) {
        match event {
            HostEvent::SessionStarted { id, debugger_type } => {
                if debugger_type != LLDB_DEBUGGER_TYPE {
                    debug!("Ignoring {debugger_type} session {id}");
                    return;
                }
                self.on_session_started(&id).await;
            }
            HostEvent::SessionTerminated { id } => {
                if self.inner.session.is_session(&id) {
                    info!("Debugger session {id} terminated");
                    self.cleanup().await;
                } else {
                    debug!("Ignoring termination of session {id}");
                }
            }
            HostEvent::BreakpointsChanged { added, removed } => {
                self.on_breakpoints_changed(&added, &removed).await;
            }
        }
    }

    /// Handles events until the channel closes.
    pub async fn run_events(&self, mut events: mpsc::UnboundedReceiver<HostEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("Host event channel closed");
    }

    async fn on_session_started(&self, id: &str) {
        let session = &self.inner.session;
        if !session.is_active() {
            debug!("Ignoring debugger session {id}: no debug session");
            return;
        }

        if !session.record_session_id(id) {
            // later CPI attaches get the breakpoints live at this moment
            let commands = session.lock().breakpoints.active_commands();
            self.send_commands(commands).await;
            return;
        }

        let breakpoints = self.inner.host.breakpoints().await;
        let translator = self.inner.resources.lock().translator.clone();
        let Some(translator) = translator else {
            warn!("Debugger attached before breakpoints could be translated");
            return;
        };
        let report = session.lock().breakpoints.restore_all(&translator, &breakpoints);
        info!("Restored {}/{} breakpoints", report.applied.len(), breakpoints.len());

        self.send_commands(report.commands).await;
        self.show_warnings(&report.warnings).await;
    }

    async fn on_breakpoints_changed(&self, added: &[EditorBreakpoint], removed: &[EditorBreakpoint]) {
        let session = &self.inner.session;
        if session.lock().id.is_none() {
            return;
        }
        let translator = self.inner.resources.lock().translator.clone();
        let Some(translator) = translator else {
            return;
        };

        let (report, deletes) = {
            let mut state = session.lock();
            let report = state.breakpoints.on_added(&translator, added);
            let deletes = state.breakpoints.on_removed(removed);
            (report, deletes)
        };

        self.send_commands(report.commands).await;
        self.send_commands(deletes).await;
        self.show_warnings(&report.warnings).await;
    }

    async fn send_commands(&self, commands: Vec<TargetCommand>) {
        for command in commands {
            debug!("Sending `{command}`");
            self.inner.host.send_command(command).await;
        }
    }

    async fn show_warnings(&self, warnings: &[BreakpointWarning]) {
        for warning in warnings {
            warn!(breakpoint = %warning.breakpoint, "{}", warning.message);
            self.inner.host.show_message(MessageLevel::Warning, &warning.message).await;
        }
    }

    /// Ends the current session.
    ///
    /// Cancels every loop of the session, kills the run process and restores
    /// overridden settings. Safe to call when no session is live.
    pub async fn cleanup(&self) {
        self.inner.session.reset();

        let (process, fan_out) = {
            let mut resources = self.inner.resources.lock();
            let resources = std::mem::take(&mut *resources);
            (resources.process, resources.fan_out)
        };
        if let Some(fan_out) = fan_out {
            fan_out.abort();
        }
        if let Some(process) = process {
            process.kill().await;
        }
        self.inner.settings.restore_all(self.inner.host.as_ref()).await;
        info!("Debug session cleaned up");
    }
}

/// Moves to `phase` unless a debugger is already attached.
fn advance_phase(session: &SessionHandle, phase: SessionPhase) {
    let mut state = session.lock();
    if state.id.is_none() && state.phase != SessionPhase::Terminated {
        debug!("Session phase {} -> {phase}", state.phase);
        state.phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_request_wire_format() {
        let request: DebugRequest = serde_json::from_str(r#"{"testName":"test_cross"}"#).unwrap();
        assert_eq!(request, DebugRequest::rust("test_cross"));

        let request: DebugRequest =
            serde_json::from_str(r#"{"testName":"swaps","language":"typescript"}"#).unwrap();
        assert_eq!(request, DebugRequest::typescript("swaps"));
    }

    #[test]
    fn test_run_target_follows_language() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            DebugRequest::rust("test_cross").run_target(dir.path(), None),
            RunTarget::native_test("test_cross")
        );
        assert_eq!(
            DebugRequest::typescript("anything").run_target(dir.path(), None),
            RunTarget::Script { program: "anchor".into(), args: vec!["test".into()] }
        );

        let command = vec!["sh".to_string(), "-c".to_string(), "run {test}".to_string()];
        assert_eq!(
            DebugRequest::typescript("swaps").run_target(dir.path(), Some(&command)),
            RunTarget::Script { program: "sh".into(), args: vec!["-c".into(), "run swaps".into()] }
        );
    }

    #[test]
    fn test_advance_phase_stops_once_attached() {
        let session = SessionHandle::new(6612);
        session.begin(6612, crate::BuildStrategyKind::SbpfV1, vec![]).unwrap();
        advance_phase(&session, SessionPhase::Attaching(6612));
        assert_eq!(session.phase(), SessionPhase::Attaching(6612));

        session.record_session_id("s1");
        advance_phase(&session, SessionPhase::AwaitingFingerprint(6613));
        assert_eq!(session.phase(), SessionPhase::Attached);
    }
}
