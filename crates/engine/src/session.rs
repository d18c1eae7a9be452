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

//! Session state.
//!
//! [`DebuggerSession`] is the single record describing the live debug session.
//! It is shared through a [`SessionHandle`], which also owns the cancellation
//! generation that every polling loop captures when it starts.
//!
//! The lock is a short critical section around plain data and is never held
//! across an `.await`.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::{Mutex, MutexGuard};
use tether_common::{CpiFlow, Fingerprint, ProgramArtifact, ProgramExecutables};
use tracing::{debug, info};

use crate::{BreakpointTracker, BuildStrategyKind, SessionError, SessionResult};

/// Where the orchestrator is in the life of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session.
    #[default]
    Idle,
    /// The workspace is being built.
    Compiling,
    /// The run process is being started.
    AwaitingProcess,
    /// A port opened and its program fingerprint is awaited.
    AwaitingFingerprint(u16),
    /// The host was asked to attach to this port.
    Attaching(u16),
    /// The host confirmed a debugger session.
    Attached,
    /// The session ended.
    Terminated,
}

impl SessionPhase {
    /// Whether a new debug request may start from this phase.
    pub fn accepts_new_session(&self) -> bool {
        matches!(self, Self::Idle | Self::Terminated)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Compiling => f.write_str("compiling"),
            Self::AwaitingProcess => f.write_str("awaiting-process"),
            Self::AwaitingFingerprint(port) => write!(f, "awaiting-fingerprint({port})"),
            Self::Attaching(port) => write!(f, "attaching({port})"),
            Self::Attached => f.write_str("attached"),
            Self::Terminated => f.write_str("terminated"),
        }
    }
}

/// The one live debug session.
#[derive(Debug, Default)]
pub struct DebuggerSession {
    /// Host-assigned id of the first debugger session; `None` until confirmed.
    pub id: Option<String>,
    /// Current phase.
    pub phase: SessionPhase,
    /// Build strategy in use.
    pub build_strategy: Option<BuildStrategyKind>,
    /// Next TCP port to hand out. Never decreases.
    pub tcp_port_cursor: u16,
    /// Binaries per program, replaced on every build.
    pub executables_by_program: HashMap<String, ProgramExecutables>,
    /// Program name per deployable-binary fingerprint, append-only per build.
    pub fingerprint_to_program: HashMap<Fingerprint, String>,
    /// Configured CPI flows.
    pub cpi_flows: Vec<CpiFlow>,
    /// Last fingerprint announced by the VM, cleared when consumed.
    pub current_fingerprint: Option<Fingerprint>,
    /// Editor breakpoint id to debugger breakpoint index.
    pub breakpoints: BreakpointTracker,
}

impl DebuggerSession {
    fn new(tcp_port_cursor: u16) -> Self {
        Self { tcp_port_cursor, ..Default::default() }
    }

    /// Clears everything except the port cursor.
    fn reset(&mut self) {
        let cursor = self.tcp_port_cursor;
        *self = Self::new(cursor);
        self.phase = SessionPhase::Terminated;
    }
}

/// Shared handle to the session and its cancellation generation.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    state: Arc<Mutex<DebuggerSession>>,
    generation: Arc<AtomicU64>,
}

impl SessionHandle {
    /// Idle session whose port cursor starts at `first_port`.
    pub fn new(first_port: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(DebuggerSession::new(first_port))),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Locks the session state.
    pub fn lock(&self) -> MutexGuard<'_, DebuggerSession> {
        self.state.lock()
    }

    /// Current cancellation generation; loops capture it at start.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Whether a loop started under `token` may keep running.
    pub fn is_current(&self, token: u64) -> bool {
        self.generation() == token
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    /// Moves to `phase` only while `token` is the current generation.
    ///
    /// Returns whether the phase changed. The check happens under the state
    /// lock, so a concurrent [`reset`](Self::reset) always wins.
    pub fn set_phase_if_current(&self, token: u64, phase: SessionPhase) -> bool {
        let mut state = self.lock();
        if !self.is_current(token) {
            debug!("Not moving to {phase}: generation {token} was reset");
            return false;
        }
        debug!("Session phase {} -> {phase}", state.phase);
        state.phase = phase;
        true
    }

    /// Starts a fresh session or rejects the request.
    ///
    /// Rejection leaves the existing session untouched. On success returns the
    /// cancellation generation the new session's loops run under.
    pub fn begin(
        &self,
        first_port: u16,
        strategy: BuildStrategyKind,
        cpi_flows: Vec<CpiFlow>,
    ) -> SessionResult<u64> {
        let mut state = self.lock();
        if state.id.is_some() || !state.phase.accepts_new_session() {
            return Err(SessionError::SessionAlreadyActive);
        }

        let cursor = state.tcp_port_cursor.max(first_port);
        *state = DebuggerSession::new(cursor);
        state.phase = SessionPhase::Compiling;
        state.build_strategy = Some(strategy);
        state.cpi_flows = cpi_flows;
        info!("Debug session started, port cursor at {cursor}");
        Ok(self.generation())
    }

    /// Hands out `count` consecutive ports and advances the cursor past them.
    pub fn allocate_ports(&self, count: usize) -> SessionResult<Vec<u16>> {
        let mut state = self.lock();
        let first = state.tcp_port_cursor;
        let end = usize::from(first) + count;
        if end > usize::from(u16::MAX) {
            return Err(SessionError::Config(format!("no {count} free ports after {first}")));
        }
        // `end` fits in u16 per the check above
        state.tcp_port_cursor = end as u16;
        Ok((first..state.tcp_port_cursor).collect())
    }

    /// Replaces the executables map and extends the fingerprint table.
    pub fn record_artifacts<'a>(&self, artifacts: impl IntoIterator<Item = &'a ProgramArtifact>) {
        let mut state = self.lock();
        state.executables_by_program.clear();
        for artifact in artifacts {
            state.executables_by_program.insert(artifact.program_name.clone(), artifact.executables());
            state
                .fingerprint_to_program
                .insert(artifact.fingerprint.clone(), artifact.program_name.clone());
        }
    }

    /// Records the fingerprint the VM just announced.
    pub fn set_current_fingerprint(&self, fingerprint: Fingerprint) {
        debug!(%fingerprint, "VM announced program fingerprint");
        self.lock().current_fingerprint = Some(fingerprint);
    }

    /// Consumes the current fingerprint if it maps to a known program.
    ///
    /// Check and clear happen under one lock, so two waiters can never both
    /// receive the same announcement.
    pub fn take_fingerprint_match(&self) -> Option<String> {
        let mut state = self.lock();
        let program = state
            .current_fingerprint
            .as_ref()
            .and_then(|fp| state.fingerprint_to_program.get(fp))
            .cloned()?;
        state.current_fingerprint = None;
        Some(program)
    }

    /// Clears an unconsumed fingerprint.
    pub fn clear_current_fingerprint(&self) {
        self.lock().current_fingerprint = None;
    }

    /// Records the host's session id; only the first confirmation sticks.
    pub fn record_session_id(&self, id: &str) -> bool {
        let mut state = self.lock();
        if state.id.is_some() {
            return false;
        }
        info!("Debugger session {id} attached");
        state.id = Some(id.to_string());
        state.phase = SessionPhase::Attached;
        true
    }

    /// Whether `id` is the recorded session id.
    pub fn is_session(&self, id: &str) -> bool {
        self.lock().id.as_deref() == Some(id)
    }

    /// Whether a session is live.
    pub fn is_active(&self) -> bool {
        let state = self.lock();
        state.id.is_some() || !state.phase.accepts_new_session()
    }

    /// Ends the session: cancels every loop started so far and clears state.
    ///
    /// This is the only place the cancellation generation advances.
    pub fn reset(&self) {
        let previous = self.generation.fetch_add(1, Ordering::SeqCst);
        self.lock().reset();
        debug!("Session reset, generation {previous} -> {}", previous + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(name: &str, bytes: &[u8]) -> ProgramArtifact {
        ProgramArtifact {
            program_name: name.to_string(),
            debug_binary: format!("/d/{name}.debug").into(),
            deploy_binary: format!("/d/{name}.so").into(),
            fingerprint: Fingerprint::from_bytes(bytes),
        }
    }

    #[test]
    fn test_ports_are_never_reused() {
        let session = SessionHandle::new(6612);
        session.begin(6612, BuildStrategyKind::SbpfV1, vec![]).unwrap();
        assert_eq!(session.allocate_ports(2).unwrap(), vec![6612, 6613]);
        session.reset();

        session.begin(6612, BuildStrategyKind::SbpfV1, vec![]).unwrap();
        assert_eq!(session.allocate_ports(1).unwrap(), vec![6614]);
    }

    #[test]
    fn test_begin_rejects_while_active() {
        let session = SessionHandle::new(6612);
        session.begin(6612, BuildStrategyKind::SbpfV0, vec![]).unwrap();
        session.record_session_id("dbg-1");
        let generation = session.generation();

        let err = session.begin(7000, BuildStrategyKind::SbpfV1, vec![]).unwrap_err();
        assert!(matches!(err, SessionError::SessionAlreadyActive));

        let state = session.lock();
        assert_eq!(state.id.as_deref(), Some("dbg-1"));
        assert_eq!(state.build_strategy, Some(BuildStrategyKind::SbpfV0));
        assert_eq!(state.tcp_port_cursor, 6612);
        drop(state);
        assert_eq!(session.generation(), generation);
    }

    #[test]
    fn test_fingerprint_consumed_once() {
        let session = SessionHandle::new(6612);
        let alpha = artifact("alpha", b"a");
        session.record_artifacts([&alpha]);

        session.set_current_fingerprint(Fingerprint::from_bytes(b"unknown"));
        assert_eq!(session.take_fingerprint_match(), None);
        assert!(session.lock().current_fingerprint.is_some());

        session.set_current_fingerprint(alpha.fingerprint.clone());
        assert_eq!(session.take_fingerprint_match().as_deref(), Some("alpha"));
        assert_eq!(session.take_fingerprint_match(), None);
    }

    #[test]
    fn test_fingerprints_are_additive_executables_replaced() {
        let session = SessionHandle::new(6612);
        session.record_artifacts([&artifact("alpha", b"v1")]);
        session.record_artifacts([&artifact("beta", b"b")]);

        let state = session.lock();
        assert_eq!(state.executables_by_program.keys().collect::<Vec<_>>(), vec!["beta"]);
        assert_eq!(state.fingerprint_to_program.len(), 2);
    }

    #[test]
    fn test_first_session_id_wins() {
        let session = SessionHandle::new(6612);
        assert!(session.record_session_id("first"));
        assert!(!session.record_session_id("second"));
        assert!(session.is_session("first"));
    }

    #[test]
    fn test_reset_bumps_generation() {
        let session = SessionHandle::new(6612);
        let token = session.begin(6612, BuildStrategyKind::SbpfV0, vec![]).unwrap();
        assert!(session.is_current(token));
        session.reset();
        assert!(!session.is_current(token));
        assert_eq!(session.phase(), SessionPhase::Terminated);
        assert!(!session.is_active());
    }

    #[test]
    fn test_stale_token_cannot_move_phase() {
        let session = SessionHandle::new(6612);
        let token = session.begin(6612, BuildStrategyKind::SbpfV1, vec![]).unwrap();
        assert!(session.set_phase_if_current(token, SessionPhase::AwaitingProcess));
        assert_eq!(session.phase(), SessionPhase::AwaitingProcess);

        session.reset();
        assert!(!session.set_phase_if_current(token, SessionPhase::AwaitingFingerprint(6612)));
        assert_eq!(session.phase(), SessionPhase::Terminated);
        assert!(!session.is_active());
    }
}
