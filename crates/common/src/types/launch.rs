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

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Everything the host editor needs to start a remote-attach debug session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchDescription {
    /// Debug binary the client loads symbols from.
    pub target_binary_path: PathBuf,
    /// Host the VM's debug endpoint listens on.
    pub remote_host: String,
    /// Port the VM's debug endpoint listens on.
    pub remote_port: u16,
    /// Name shown in the editor's debug UI.
    pub display_name: String,
}

impl LaunchDescription {
    /// Launch description for the endpoint on `remote_host:port`.
    pub fn for_port(target_binary_path: PathBuf, remote_host: impl Into<String>, port: u16) -> Self {
        Self {
            target_binary_path,
            remote_host: remote_host.into(),
            remote_port: port,
            display_name: format!("Sbpf Debug Port: {port}"),
        }
    }

    /// `host:port`
    pub fn remote_endpoint(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }

    /// Debugger command that loads the target binary.
    pub fn target_create_command(&self) -> String {
        format!("target create {}", self.target_binary_path.display())
    }

    /// Debugger command that connects to the remote endpoint.
    pub fn process_connect_command(&self) -> String {
        format!("gdb-remote {}", self.remote_endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_description_commands() {
        let launch =
            LaunchDescription::for_port(PathBuf::from("/ws/target/deploy/alpha.debug"), "127.0.0.1", 6612);
        assert_eq!(launch.display_name, "Sbpf Debug Port: 6612");
        assert_eq!(launch.remote_endpoint(), "127.0.0.1:6612");
        assert_eq!(launch.target_create_command(), "target create /ws/target/deploy/alpha.debug");
        assert_eq!(launch.process_connect_command(), "gdb-remote 127.0.0.1:6612");
    }

    #[test]
    fn test_launch_description_wire_format() {
        let launch = LaunchDescription::for_port(PathBuf::from("/a.debug"), "127.0.0.1", 1);
        let json = serde_json::to_value(&launch).unwrap();
        assert_eq!(json["targetBinaryPath"], "/a.debug");
        assert_eq!(json["remoteHost"], "127.0.0.1");
        assert_eq!(json["remotePort"], 1);
        assert_eq!(json["displayName"], "Sbpf Debug Port: 1");
    }
}
