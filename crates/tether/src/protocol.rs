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

//! Stdio protocol between `tether debug` and the editor extension
//!
//! Every message is one JSON object per line. Tether writes
//! [`OutgoingMessage`]s to stdout; the editor writes [`IncomingMessage`]s to
//! stdin. Messages carrying an `id` are requests and expect a `response` with
//! the same id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_common::{LaunchDescription, TargetCommand};
use tether_engine::{DebugLaunch, HostEvent, MessageLevel};

/// Message sent from tether to the editor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutgoingMessage {
    /// Request for the editor's current breakpoints
    GetBreakpoints {
        /// Request id
        id: u64,
    },
    /// Request to start a debugger session
    StartDebugging {
        /// Request id
        id: u64,
        /// Where to attach
        launch: LaunchDescription,
    },
    /// Request to override a setting; the response carries the previous value
    OverrideSetting {
        /// Request id
        id: u64,
        /// Setting key
        key: String,
        /// New value
        value: String,
    },
    /// Command for the active debugger session
    SendCommand {
        /// Debugger command
        command: TargetCommand,
    },
    /// Restore a setting to its original value
    RestoreSetting {
        /// Setting key
        key: String,
        /// Original value; `null` removes the override
        value: Option<String>,
    },
    /// Message to show to the user
    ShowMessage {
        /// Severity
        level: MessageLevel,
        /// Text
        message: String,
    },
    /// The debug session is running
    Launched(DebugLaunch),
    /// The debug session is over
    Finished,
}

/// Message sent from the editor to tether
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IncomingMessage {
    /// Reply to a request
    Response {
        /// Id of the request being answered
        id: u64,
        /// Result payload
        #[serde(default)]
        result: Value,
        /// Set when the request failed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Something happened in the editor
    Event(HostEvent),
    /// Stop the session and exit
    Shutdown,
}

impl IncomingMessage {
    /// Parses one line
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

impl OutgoingMessage {
    /// Encodes as one line, without the trailing newline
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
