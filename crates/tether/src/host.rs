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

//! [`HostIde`] over the stdio protocol

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use serde_json::Value;
use tether_common::{EditorBreakpoint, LaunchDescription, TargetCommand};
use tether_engine::{HostIde, MessageLevel, SessionError, SessionResult};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::protocol::OutgoingMessage;

type Reply = Result<Value, String>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// Routes editor responses to the request waiting for them
#[derive(Debug, Clone, Default)]
pub struct ResponseRouter {
    pending: Pending,
}

impl ResponseRouter {
    /// Completes request `id`; unknown ids are logged and dropped
    pub fn complete(&self, id: u64, reply: Reply) {
        match self.pending.lock().remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(reply);
            }
            None => warn!("Response for unknown request {id}"),
        }
    }

    /// Fails every outstanding request, e.g. when stdin closes
    pub fn fail_all(&self, reason: &str) {
        for (_, waiter) in self.pending.lock().drain() {
            let _ = waiter.send(Err(reason.to_string()));
        }
    }
}

/// Editor reached through line-delimited JSON on stdio
#[derive(Debug)]
pub struct StdioHost {
    out: mpsc::UnboundedSender<OutgoingMessage>,
    router: ResponseRouter,
    next_id: AtomicU64,
}

impl StdioHost {
    /// Host writing outgoing messages to `out`
    pub fn new(out: mpsc::UnboundedSender<OutgoingMessage>) -> Self {
        Self { out, router: ResponseRouter::default(), next_id: AtomicU64::new(1) }
    }

    /// Router for the responses this host waits on
    pub fn router(&self) -> ResponseRouter {
        self.router.clone()
    }

    fn notify(&self, message: OutgoingMessage) {
        if self.out.send(message).is_err() {
            debug!("Output closed, dropping message");
        }
    }

    async fn request(&self, build: impl FnOnce(u64) -> OutgoingMessage) -> Reply {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.router.pending.lock().insert(id, tx);

        if self.out.send(build(id)).is_err() {
            self.router.pending.lock().remove(&id);
            return Err("editor connection closed".to_string());
        }
        rx.await.unwrap_or_else(|_| Err("editor connection closed".to_string()))
    }
}

impl HostIde for StdioHost {
    async fn breakpoints(&self) -> Vec<EditorBreakpoint> {
        match self.request(|id| OutgoingMessage::GetBreakpoints { id }).await {
            Ok(Value::Null) => Vec::new(),
            Ok(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("Invalid breakpoint list from editor: {e}");
                Vec::new()
            }),
            Err(e) => {
                warn!("Could not fetch breakpoints: {e}");
                Vec::new()
            }
        }
    }

    async fn start_debugging(&self, launch: LaunchDescription) -> SessionResult<()> {
        self.request(|id| OutgoingMessage::StartDebugging { id, launch })
            .await
            .map(|_| ())
            .map_err(SessionError::AttachFailure)
    }

    async fn send_command(&self, command: TargetCommand) {
        self.notify(OutgoingMessage::SendCommand { command });
    }

    async fn override_setting(&self, key: &str, value: &str) -> Option<String> {
        let reply = self
            .request(|id| OutgoingMessage::OverrideSetting { id, key: key.to_string(), value: value.to_string() })
            .await;
        match reply {
            Ok(Value::String(previous)) => Some(previous),
            Ok(_) => None,
            Err(e) => {
                warn!("Could not override {key}: {e}");
                None
            }
        }
    }

    async fn restore_setting(&self, key: &str, value: Option<String>) {
        self.notify(OutgoingMessage::RestoreSetting { key: key.to_string(), value });
    }

    async fn show_message(&self, level: MessageLevel, message: &str) {
        self.notify(OutgoingMessage::ShowMessage { level, message: message.to_string() });
    }
}
