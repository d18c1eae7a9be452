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

//! The editor side of the conversation.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tether_common::{EditorBreakpoint, LaunchDescription, TargetCommand};

use crate::SessionResult;

/// Severity of a message shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    /// Informational.
    Info,
    /// Something was skipped.
    Warning,
    /// The session failed.
    Error,
}

/// Operations the orchestrator needs from the host editor.
pub trait HostIde: Send + Sync + 'static {
    /// Breakpoints currently set in the editor.
    fn breakpoints(&self) -> impl Future<Output = Vec<EditorBreakpoint>> + Send;

    /// Asks the editor to start a debugger session against `launch`.
    ///
    /// Success means the request was accepted; the session id arrives later as
    /// [`HostEvent::SessionStarted`].
    fn start_debugging(&self, launch: LaunchDescription) -> impl Future<Output = SessionResult<()>> + Send;

    /// Sends a raw command to the active debugger session.
    fn send_command(&self, command: TargetCommand) -> impl Future<Output = ()> + Send;

    /// Sets an editor setting and returns its previous value.
    fn override_setting(&self, key: &str, value: &str) -> impl Future<Output = Option<String>> + Send;

    /// Puts a setting back; `None` removes the override.
    fn restore_setting(&self, key: &str, value: Option<String>) -> impl Future<Output = ()> + Send;

    /// Shows a message to the user.
    fn show_message(&self, level: MessageLevel, message: &str) -> impl Future<Output = ()> + Send;
}

/// Events the editor pushes to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostEvent {
    /// A debugger session started.
    #[serde(rename_all = "camelCase")]
    SessionStarted {
        /// Editor-assigned id.
        id: String,
        /// Debugger type, e.g. `lldb`.
        debugger_type: String,
    },
    /// A debugger session ended.
    SessionTerminated {
        /// Editor-assigned id.
        id: String,
    },
    /// Breakpoints were added or removed in the editor.
    BreakpointsChanged {
        /// Newly added breakpoints.
        #[serde(default)]
        added: Vec<EditorBreakpoint>,
        /// Removed breakpoints.
        #[serde(default)]
        removed: Vec<EditorBreakpoint>,
    },
}

/// Debugger type whose sessions the orchestrator tracks.
pub const LLDB_DEBUGGER_TYPE: &str = "lldb";
