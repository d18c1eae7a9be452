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

//! Port watching.
//!
//! The VM opens one GDB-remote endpoint per program in a call chain, on
//! consecutive ports. [`PortWatcher::poll_until_open`] polls a whole port set
//! and fires a callback the first time each port starts listening.
//!
//! Ports are inspected through the OS socket table rather than by connecting:
//! the VM's debug stub serves a single client, and a probe connection would
//! consume it.

use std::{
    collections::HashSet,
    future::Future,
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use itertools::Itertools;
use parking_lot::Mutex;
use regex::Regex;
use tokio::{
    process::Command,
    task::{JoinHandle, JoinSet},
    time::{sleep, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{SessionError, SessionHandle, SessionResult};

/// Point-in-time inspection of a TCP port.
pub trait PortProbe: Send + Sync + 'static {
    /// True iff exactly one socket on `port` is listening.
    fn is_open(&self, port: u16) -> impl Future<Output = bool> + Send;

    /// True iff no socket references `port` at all.
    fn is_available(&self, port: u16) -> impl Future<Output = bool> + Send;
}

/// [`PortProbe`] that reads `netstat -nat`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetstatProbe;

impl NetstatProbe {
    async fn socket_table() -> Option<String> {
        let output = Command::new("netstat")
            .arg("-nat")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await;
        match output {
            Ok(output) => Some(String::from_utf8_lossy(&output.stdout).into_owned()),
            Err(e) => {
                warn!("Could not run netstat: {e}");
                None
            }
        }
    }
}

impl PortProbe for NetstatProbe {
    async fn is_open(&self, port: u16) -> bool {
        match Self::socket_table().await {
            Some(table) => count_port_sockets(&table, port, true) == 1,
            None => false,
        }
    }

    async fn is_available(&self, port: u16) -> bool {
        match Self::socket_table().await {
            Some(table) => count_port_sockets(&table, port, false) == 0,
            None => false,
        }
    }
}

/// Counts socket table rows that mention `port` as a local or remote port.
///
/// Both `addr:port` (Linux) and `addr.port` (BSD) notations are recognized.
/// With `listening_only`, only rows in `LISTEN` state are counted.
pub fn count_port_sockets(table: &str, port: u16, listening_only: bool) -> usize {
    let Ok(pattern) = Regex::new(&format!(r"[:|.]{port}\b")) else {
        return 0;
    };
    table
        .lines()
        .filter(|line| pattern.is_match(line))
        .filter(|line| !listening_only || line.contains("LISTEN"))
        .count()
}

/// Result of a fan-out loop.
pub type FanOutHandle = JoinHandle<SessionResult<()>>;

/// Cancellable port polling, scoped to the current session generation.
#[derive(Debug)]
pub struct PortWatcher<P> {
    probe: Arc<P>,
    session: SessionHandle,
    interval: Duration,
    active: Arc<Mutex<HashSet<String>>>,
}

impl<P> Clone for PortWatcher<P> {
    fn clone(&self) -> Self {
        Self {
            probe: self.probe.clone(),
            session: self.session.clone(),
            interval: self.interval,
            active: self.active.clone(),
        }
    }
}

impl<P: PortProbe> PortWatcher<P> {
    /// Watcher polling every `interval`.
    pub fn new(probe: Arc<P>, session: SessionHandle, interval: Duration) -> Self {
        Self { probe, session, interval, active: Arc::new(Mutex::new(HashSet::new())) }
    }

    /// The probe in use.
    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Polls `port` until it listens, `timeout` elapses or the session is reset.
    pub async fn wait_for_open(&self, port: u16, timeout: Duration) -> bool {
        let token = self.session.generation();
        let start = Instant::now();
        while self.session.is_current(token) && start.elapsed() < timeout {
            if self.probe.is_open(port).await {
                return true;
            }
            sleep(self.interval).await;
        }
        false
    }

    /// Fails with [`SessionError::PortUnavailable`] when something already uses `port`.
    pub async fn ensure_available(&self, port: u16) -> SessionResult<()> {
        if self.probe.is_available(port).await {
            Ok(())
        } else {
            Err(SessionError::PortUnavailable(port))
        }
    }

    /// [`ensure_available`](Self::ensure_available) for every port in `ports`,
    /// failing on the first one in use.
    pub async fn ensure_all_available(&self, ports: impl IntoIterator<Item = u16>) -> SessionResult<()> {
        for port in ports {
            self.ensure_available(port).await?;
        }
        Ok(())
    }

    /// Starts a fan-out loop over `ports`.
    ///
    /// Every tick checks the not-yet-started ports in order; the first time a
    /// port is listening, `on_open(port)` is spawned for it and the port is
    /// never checked again. Callbacks run independently and may finish in any
    /// order. The loop ends when every port has been handled, when the session
    /// generation it captured is gone, or when a callback fails; a failure
    /// aborts the callbacks still running for this port set.
    ///
    /// Returns `None` if a loop for the same port set is already running.
    pub fn poll_until_open<F, Fut>(&self, ports: Vec<u16>, on_open: F) -> Option<FanOutHandle>
    where
        F: Fn(u16) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SessionResult<()>> + Send + 'static,
    {
        self.poll_until_open_for(self.session.generation(), ports, on_open)
    }

    /// [`poll_until_open`](Self::poll_until_open) for a session generation
    /// captured earlier. A stale `token` yields a loop that stops at once.
    pub fn poll_until_open_for<F, Fut>(&self, token: u64, ports: Vec<u16>, on_open: F) -> Option<FanOutHandle>
    where
        F: Fn(u16) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SessionResult<()>> + Send + 'static,
    {
        let key = ports.iter().join(",");
        if !self.active.lock().insert(key.clone()) {
            debug!("Fan-out for ports [{key}] is already running");
            return None;
        }

        let guard = ActiveLoop { key, active: self.active.clone() };
        let watcher = self.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            watcher.fan_out(token, ports, on_open).await
        }))
    }

    /// Number of fan-out loops currently running.
    pub fn active_loops(&self) -> usize {
        self.active.lock().len()
    }

    async fn fan_out<F, Fut>(&self, token: u64, ports: Vec<u16>, on_open: F) -> SessionResult<()>
    where
        F: Fn(u16) -> Fut,
        Fut: Future<Output = SessionResult<()>> + Send + 'static,
    {
        let mut started = vec![false; ports.len()];
        let mut attaches = JoinSet::new();
        info!("Watching debug ports {ports:?}");

        loop {
            for (slot, &port) in ports.iter().enumerate() {
                if !self.session.is_current(token) {
                    debug!("Session changed, stopping fan-out for {ports:?}");
                    return Ok(());
                }
                if started[slot] || !self.probe.is_open(port).await {
                    continue;
                }
                if !self.session.is_current(token) {
                    return Ok(());
                }
                info!(port, "Debug endpoint is listening");
                started[slot] = true;
                attaches.spawn(on_open(port));
            }

            while let Some(joined) = attaches.try_join_next() {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!("Stopping fan-out for {ports:?}: {e}");
                        return Err(e);
                    }
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => {
                        return Err(SessionError::AttachFailure(format!("attach task failed: {e}")))
                    }
                }
            }

            if attaches.is_empty() && started.iter().all(|s| *s) {
                debug!("All ports in {ports:?} handled");
                return Ok(());
            }
            if !self.session.is_current(token) {
                return Ok(());
            }
            sleep(self.interval).await;
        }
    }
}

struct ActiveLoop {
    key: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Drop for ActiveLoop {
    fn drop(&mut self) {
        self.active.lock().remove(&self.key);
    }
}
