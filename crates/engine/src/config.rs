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

//! Workspace-scoped engine configuration.
//!
//! Values are layered: built-in defaults, then `tether.toml` at the workspace
//! root, then environment overrides. The binary applies CLI flags last.
//!
//! ```toml
//! tcp_port = 6612
//! platform_tools_version = "1.51"
//! build_strategy = "sbpf-v1"
//!
//! [[cpi_flows]]
//! test_name = "test_cross"
//! program_sequence = ["alpha", "beta"]
//! ```

use std::{env, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use tether_common::{
    env::{TETHER_PLATFORM_TOOLS_VERSION, TETHER_TCP_PORT},
    CpiFlow, DEFAULT_MAX_CPI_DEPTH,
};
use tracing::debug;

use crate::{BuildStrategyKind, FingerprintChannel, SessionError, SessionResult};

/// Name of the configuration file looked up at the workspace root.
pub const CONFIG_FILE_NAME: &str = "tether.toml";

/// First debug port handed to the VM when nothing else is configured.
pub const DEFAULT_TCP_PORT: u16 = 6612;

/// Platform-tools release used to locate the debugger library.
pub const DEFAULT_PLATFORM_TOOLS_VERSION: &str = "1.51";

/// Configuration for the debug session orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// First TCP port handed out to the VM.
    pub tcp_port: u16,
    /// Platform-tools version, e.g. `1.51`.
    pub platform_tools_version: String,
    /// Platform-tools cache holding `v<version>` directories; `~/.cache/solana`
    /// when unset.
    pub platform_tools_dir: Option<PathBuf>,
    /// Cross-program invocation chains, matched by exact test name.
    pub cpi_flows: Vec<CpiFlow>,
    /// Upper bound on the length of any CPI flow.
    pub max_cpi_depth: usize,
    /// How the workspace is compiled.
    pub build_strategy: BuildStrategyKind,
    /// How the VM announces program fingerprints.
    pub fingerprint_channel: FingerprintChannel,
    /// Hand-off file for the marker-file fingerprint channel.
    pub marker_file: PathBuf,
    /// How long to wait for a fingerprint after a port opens.
    pub program_hash_timeout_ms: u64,
    /// Interval between port fan-out polls.
    pub port_poll_interval_ms: u64,
    /// Interval between fingerprint table lookups.
    pub fingerprint_poll_interval_ms: u64,
    /// Interval between marker-file checks.
    pub marker_poll_interval_ms: u64,
    /// Host the VM's debug endpoints listen on.
    pub remote_host: String,
    /// Forces managed-program (Anchor) handling on or off; detected when unset.
    pub is_managed_program: Option<bool>,
    /// Replaces the command that runs the test. `{test}` in any argument is
    /// substituted with the test name.
    pub test_command: Option<Vec<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tcp_port: DEFAULT_TCP_PORT,
            platform_tools_version: DEFAULT_PLATFORM_TOOLS_VERSION.to_string(),
            platform_tools_dir: None,
            cpi_flows: Vec::new(),
            max_cpi_depth: DEFAULT_MAX_CPI_DEPTH,
            build_strategy: BuildStrategyKind::default(),
            fingerprint_channel: FingerprintChannel::default(),
            marker_file: env::temp_dir().join("tether_vm_exec_info"),
            program_hash_timeout_ms: 10_000,
            port_poll_interval_ms: 1_000,
            fingerprint_poll_interval_ms: 100,
            marker_poll_interval_ms: 1_000,
            remote_host: "127.0.0.1".to_string(),
            is_managed_program: None,
            test_command: None,
        }
    }
}

impl EngineConfig {
    /// Loads `tether.toml` from `workspace_root` (defaults when absent) and
    /// applies environment overrides.
    pub fn load(workspace_root: &Path) -> SessionResult<Self> {
        let path = workspace_root.join(CONFIG_FILE_NAME);
        let mut config = if path.is_file() {
            debug!("Loading configuration from {}", path.display());
            Self::from_toml_str(&std::fs::read_to_string(&path)?)?
        } else {
            debug!("No {CONFIG_FILE_NAME} in {}, using defaults", workspace_root.display());
            Self::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration document.
    pub fn from_toml_str(source: &str) -> SessionResult<Self> {
        toml::from_str(source).map_err(|e| SessionError::Config(e.to_string()))
    }

    /// Applies `TETHER_TCP_PORT` and `TETHER_PLATFORM_TOOLS_VERSION`.
    pub fn apply_env_overrides(&mut self) -> SessionResult<()> {
        if let Ok(port) = env::var(TETHER_TCP_PORT) {
            self.tcp_port = port.trim().parse().map_err(|_| {
                SessionError::Config(format!("{TETHER_TCP_PORT} is not a port: {port}"))
            })?;
        }
        if let Ok(version) = env::var(TETHER_PLATFORM_TOOLS_VERSION) {
            if !version.trim().is_empty() {
                self.platform_tools_version = version.trim().to_string();
            }
        }
        Ok(())
    }

    /// Checks invariants that the file format cannot express.
    pub fn validate(&self) -> SessionResult<()> {
        if self.max_cpi_depth == 0 {
            return Err(SessionError::Config("max_cpi_depth must be at least 1".into()));
        }
        if usize::from(self.tcp_port) + self.max_cpi_depth > usize::from(u16::MAX) {
            return Err(SessionError::Config(format!(
                "tcp_port {} leaves no room for {} nested endpoints",
                self.tcp_port, self.max_cpi_depth
            )));
        }
        if self.test_command.as_ref().is_some_and(|command| command.is_empty()) {
            return Err(SessionError::Config("test_command must name a program".into()));
        }
        for flow in &self.cpi_flows {
            if flow.test_name.is_empty() {
                return Err(SessionError::Config("CPI flow with empty test name".into()));
            }
            if flow.program_sequence.is_empty() {
                return Err(SessionError::Config(format!(
                    "CPI flow `{}` has no programs",
                    flow.test_name
                )));
            }
            if flow.depth() > self.max_cpi_depth {
                return Err(SessionError::Config(format!(
                    "CPI flow `{}` has {} programs, the maximum is {}",
                    flow.test_name,
                    flow.depth(),
                    self.max_cpi_depth
                )));
            }
        }
        Ok(())
    }

    /// Set the first TCP port
    pub fn with_tcp_port(mut self, port: u16) -> Self {
        self.tcp_port = port;
        self
    }

    /// Set the platform-tools version
    pub fn with_platform_tools_version(mut self, version: impl Into<String>) -> Self {
        self.platform_tools_version = version.into();
        self
    }

    /// Look for platform tools under `dir`
    pub fn with_platform_tools_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.platform_tools_dir = Some(dir.into());
        self
    }

    /// Set the build strategy
    pub fn with_build_strategy(mut self, kind: BuildStrategyKind) -> Self {
        self.build_strategy = kind;
        self
    }

    /// Set the fingerprint channel
    pub fn with_fingerprint_channel(mut self, channel: FingerprintChannel) -> Self {
        self.fingerprint_channel = channel;
        self
    }

    /// Replace the CPI flows
    pub fn with_cpi_flows(mut self, flows: Vec<CpiFlow>) -> Self {
        self.cpi_flows = flows;
        self
    }

    /// Run tests with `command` instead of the language default
    pub fn with_test_command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.test_command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    /// Set every polling interval and the fingerprint timeout at once
    pub fn with_timing(mut self, poll_ms: u64, fingerprint_poll_ms: u64, timeout_ms: u64) -> Self {
        self.port_poll_interval_ms = poll_ms;
        self.marker_poll_interval_ms = poll_ms;
        self.fingerprint_poll_interval_ms = fingerprint_poll_ms;
        self.program_hash_timeout_ms = timeout_ms;
        self
    }

    /// Fingerprint wait as a [`Duration`].
    pub fn program_hash_timeout(&self) -> Duration {
        Duration::from_millis(self.program_hash_timeout_ms)
    }

    /// Port poll interval as a [`Duration`].
    pub fn port_poll_interval(&self) -> Duration {
        Duration::from_millis(self.port_poll_interval_ms)
    }

    /// Fingerprint lookup interval as a [`Duration`].
    pub fn fingerprint_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fingerprint_poll_interval_ms)
    }

    /// Marker-file poll interval as a [`Duration`].
    pub fn marker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.marker_poll_interval_ms)
    }
}
