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

//! Check-port command

use eyre::Result;
use tether_engine::{NetstatProbe, PortProbe, SessionError};

use super::load_config;

/// Fails with [`SessionError::PortUnavailable`] if the port is referenced by any socket
pub async fn check_port(cli: &crate::Cli, port: Option<u16>) -> Result<()> {
    let port = match port {
        Some(port) => port,
        None => load_config(cli)?.tcp_port,
    };

    if NetstatProbe.is_available(port).await {
        println!("Port {port} is available");
        Ok(())
    } else {
        Err(SessionError::PortUnavailable(port).into())
    }
}
