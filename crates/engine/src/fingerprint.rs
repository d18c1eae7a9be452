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

//! Fingerprint resolution.
//!
//! Right before opening a debug endpoint the VM announces the fingerprint of
//! the program it is about to run, either in its log output or by writing a
//! marker file. The resolver waits until the announced fingerprint is found
//! in the session's fingerprint table.

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tether_common::Fingerprint;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::{EngineConfig, SessionHandle};

// Unanchored: any 64-character lowercase hex run in a log line counts.
static FINGERPRINT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9a-f]{64}").expect("fingerprint pattern is valid"));

/// Channel the VM announces fingerprints on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FingerprintChannel {
    /// A log line of the run process contains the digest.
    #[default]
    Log,
    /// The VM writes the digest to a marker file.
    MarkerFile,
}

/// First fingerprint-shaped token in a log line.
pub fn scan_fingerprint(line: &str) -> Option<Fingerprint> {
    FINGERPRINT_PATTERN.find(line).and_then(|m| m.as_str().parse().ok())
}

/// Reads, validates and deletes the marker file.
///
/// Returns `Ok(None)` when the file does not exist. The file is removed even
/// when its content is not a valid fingerprint, so a corrupt write cannot
/// block later announcements.
pub fn consume_marker_file(path: &Path) -> io::Result<Option<Fingerprint>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    std::fs::remove_file(path)?;

    match content.trim().parse::<Fingerprint>() {
        Ok(fingerprint) => Ok(Some(fingerprint)),
        Err(e) => {
            warn!("Ignoring marker file {}: {e}", path.display());
            Ok(None)
        }
    }
}

/// Waits for the VM to announce a known program.
#[derive(Debug, Clone)]
pub struct FingerprintResolver {
    session: SessionHandle,
    channel: FingerprintChannel,
    marker_file: PathBuf,
    lookup_interval: Duration,
    marker_interval: Duration,
}

impl FingerprintResolver {
    /// Resolver using the channel and intervals from `config`.
    pub fn from_config(session: SessionHandle, config: &EngineConfig) -> Self {
        Self {
            session,
            channel: config.fingerprint_channel,
            marker_file: config.marker_file.clone(),
            lookup_interval: config.fingerprint_poll_interval(),
            marker_interval: config.marker_poll_interval(),
        }
    }

    /// Waits up to `timeout` for the announced fingerprint to match a program.
    ///
    /// The match consumes the fingerprint. With the marker-file channel the
    /// file is polled concurrently and polling stops once a program is found.
    /// Returns `None` on timeout or when the session is reset meanwhile. A
    /// timeout also discards an announcement that matched no program.
    pub async fn wait_for_program_name(&self, timeout: Duration) -> Option<String> {
        let token = self.session.generation();
        let lookup = self.lookup(token, timeout);

        match self.channel {
            FingerprintChannel::Log => lookup.await,
            FingerprintChannel::MarkerFile => {
                tokio::pin!(lookup);
                tokio::select! {
                    name = &mut lookup => name,
                    _ = self.poll_marker_file(token, timeout) => lookup.as_mut().await,
                }
            }
        }
    }

    /// Polls the marker file until it yields a fingerprint, then records it
    /// as the session's current fingerprint.
    pub async fn poll_marker_file(&self, token: u64, timeout: Duration) -> Option<Fingerprint> {
        let start = Instant::now();
        while self.session.is_current(token) && start.elapsed() < timeout {
            match consume_marker_file(&self.marker_file) {
                Ok(Some(fingerprint)) => {
                    info!(%fingerprint, "Found VM marker file");
                    self.session.set_current_fingerprint(fingerprint.clone());
                    return Some(fingerprint);
                }
                Ok(None) => {}
                Err(e) => warn!("Error reading marker file {}: {e}", self.marker_file.display()),
            }
            sleep(self.marker_interval).await;
        }
        None
    }

    async fn lookup(&self, token: u64, timeout: Duration) -> Option<String> {
        let start = Instant::now();
        while self.session.is_current(token) && start.elapsed() < timeout {
            if let Some(program) = self.session.take_fingerprint_match() {
                debug!(program = %program, "Fingerprint matched");
                return Some(program);
            }
            sleep(self.lookup_interval).await;
        }
        if self.session.is_current(token) {
            debug!("No program fingerprint within {timeout:?}");
            self.session.clear_current_fingerprint();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BuildStrategyKind;
    use tether_common::ProgramArtifact;

    fn session_with(name: &str, bytes: &[u8]) -> SessionHandle {
        let session = SessionHandle::new(6612);
        session.begin(6612, BuildStrategyKind::SbpfV1, vec![]).unwrap();
        session.record_artifacts([&ProgramArtifact {
            program_name: name.into(),
            debug_binary: "/d/a.debug".into(),
            deploy_binary: "/d/a.so".into(),
            fingerprint: Fingerprint::from_bytes(bytes),
        }]);
        session
    }

    #[test]
    fn test_scan_fingerprint() {
        let digest = Fingerprint::from_bytes(b"alpha");
        let line = format!("[2024-05-01T10:00:00Z] [stderr] Program {digest} invoke [1]");
        assert_eq!(scan_fingerprint(&line), Some(digest));
        assert_eq!(scan_fingerprint("Program log: hello"), None);
        assert_eq!(scan_fingerprint(&"A".repeat(64)), None);
    }

    #[test]
    fn test_consume_marker_file_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exec_info");
        assert_eq!(consume_marker_file(&path).unwrap(), None);

        let digest = Fingerprint::from_bytes(b"beta");
        std::fs::write(&path, format!("{digest}\n")).unwrap();
        assert_eq!(consume_marker_file(&path).unwrap(), Some(digest));
        assert!(!path.exists());

        std::fs::write(&path, "garbage").unwrap();
        assert_eq!(consume_marker_file(&path).unwrap(), None);
        assert!(!path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_program_name_from_log() {
        tether_common::logging::ensure_test_logging(None);
        let session = session_with("alpha", b"alpha");
        let resolver = FingerprintResolver::from_config(session.clone(), &EngineConfig::default());

        let announcer = session.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(350)).await;
            announcer.set_current_fingerprint(Fingerprint::from_bytes(b"alpha"));
        });

        let name = resolver.wait_for_program_name(Duration::from_secs(10)).await;
        assert_eq!(name.as_deref(), Some("alpha"));
        assert!(session.lock().current_fingerprint.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_program_name_times_out() {
        tether_common::logging::ensure_test_logging(None);
        let session = session_with("alpha", b"alpha");
        let resolver = FingerprintResolver::from_config(session.clone(), &EngineConfig::default());
        session.set_current_fingerprint(Fingerprint::from_bytes(b"not in this workspace"));

        assert_eq!(resolver.wait_for_program_name(Duration::from_secs(2)).await, None);
        assert!(session.lock().current_fingerprint.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_program_name_from_marker_file() {
        tether_common::logging::ensure_test_logging(None);
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("exec_info");
        let config = EngineConfig {
            fingerprint_channel: FingerprintChannel::MarkerFile,
            marker_file: marker.clone(),
            ..Default::default()
        };
        let session = session_with("beta", b"beta");
        let resolver = FingerprintResolver::from_config(session, &config);

        std::fs::write(&marker, Fingerprint::from_bytes(b"beta").to_string()).unwrap();
        let name = resolver.wait_for_program_name(Duration::from_secs(10)).await;
        assert_eq!(name.as_deref(), Some("beta"));
        assert!(!marker.exists());
    }
}
