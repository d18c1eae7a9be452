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

//! Command modules for the Tether CLI

pub mod check_port;
pub mod debug;
pub mod resolve;

pub use check_port::check_port;
pub use debug::debug_test;
pub use resolve::resolve_artifacts;

use std::path::PathBuf;

use eyre::{Result, WrapErr};
use tether_engine::EngineConfig;

use crate::Cli;

/// Workspace root as an absolute path
pub fn workspace_root(cli: &Cli) -> Result<PathBuf> {
    cli.workspace
        .canonicalize()
        .wrap_err_with(|| format!("workspace {} does not exist", cli.workspace.display()))
}

/// `tether.toml` and environment, then CLI flags
pub fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let root = workspace_root(cli)?;
    let mut config = EngineConfig::load(&root)?;

    if let Some(port) = cli.tcp_port {
        config = config.with_tcp_port(port);
    }
    if let Some(version) = &cli.platform_tools_version {
        config = config.with_platform_tools_version(version.clone());
    }
    if let Some(strategy) = cli.build_strategy {
        config = config.with_build_strategy(strategy.into());
    }
    if let Some(channel) = cli.fingerprint_channel {
        config = config.with_fingerprint_channel(channel.into());
    }
    config.validate()?;
    Ok(config)
}
