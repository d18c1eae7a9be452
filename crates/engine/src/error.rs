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

//! Error taxonomy for debug sessions.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the engine.
pub type SessionResult<T> = Result<T, SessionError>;

/// Everything that can go wrong while preparing or running a debug session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The build collaborator exited unsuccessfully.
    #[error("build failed: {0}")]
    BuildFailure(String),

    /// An expected binary is missing from the build output directory.
    #[error("no {kind} binary for program `{program}` in {}", dir.display())]
    ArtifactNotFound {
        /// Program whose binary is missing.
        program: String,
        /// `debug` or `deployable`.
        kind: &'static str,
        /// Directory that was searched.
        dir: PathBuf,
    },

    /// A source line is not inside any function body.
    #[error("line {line} of {} is not inside a function", file.display())]
    FunctionNotFound {
        /// Source file.
        file: PathBuf,
        /// 1-based line.
        line: usize,
    },

    /// The function address map has no entry for a function.
    #[error("could not resolve an address for function `{0}`")]
    AddressNotResolved(String),

    /// The VM never announced a known program fingerprint.
    #[error("no known program fingerprint observed for port {port} within {timeout_ms}ms")]
    ProgramHashTimeout {
        /// Port whose attach was waiting.
        port: u16,
        /// How long we waited.
        timeout_ms: u64,
    },

    /// The configured port is already referenced by some socket.
    #[error("port {0} is already in use")]
    PortUnavailable(u16),

    /// A debug request arrived while another session is live.
    #[error("a debug session is already active")]
    SessionAlreadyActive,

    /// The host editor refused or failed to start the debug session.
    #[error("failed to attach debugger: {0}")]
    AttachFailure(String),

    /// An external process could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    SpawnFailure {
        /// Program that failed to start.
        command: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The session was reset while this step was in progress.
    #[error("debug session was cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether the error tears the session down.
    ///
    /// Breakpoint translation failures only skip the affected breakpoint.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::FunctionNotFound { .. } | Self::AddressNotResolved(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_errors_are_not_fatal() {
        assert!(!SessionError::AddressNotResolved("f".into()).is_fatal());
        assert!(!SessionError::FunctionNotFound { file: "a.rs".into(), line: 1 }.is_fatal());
        assert!(SessionError::SessionAlreadyActive.is_fatal());
        assert!(SessionError::ProgramHashTimeout { port: 1, timeout_ms: 1 }.is_fatal());
    }

    #[test]
    fn test_messages() {
        let err = SessionError::ArtifactNotFound {
            program: "alpha".into(),
            kind: "deployable",
            dir: "/ws/target/deploy".into(),
        };
        assert_eq!(err.to_string(), "no deployable binary for program `alpha` in /ws/target/deploy");
    }
}
