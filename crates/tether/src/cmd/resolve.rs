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

//! Resolve command - build and fingerprint every program

use eyre::Result;
use tether_common::ProgramArtifact;
use tether_engine::{
    discover_program_names, is_managed_program, locate_artifacts, ArtifactResolver, BuildStrategy,
    ProcessRunner, SessionHandle,
};

use super::{load_config, workspace_root};

/// Prints the resolved artifacts as a JSON array sorted by program name
pub async fn resolve_artifacts(cli: &crate::Cli, no_build: bool) -> Result<()> {
    let root = workspace_root(cli)?;
    let config = load_config(cli)?;
    let managed = config.is_managed_program.unwrap_or_else(|| is_managed_program(&root));
    let programs = discover_program_names(&root)?;
    let strategy = BuildStrategy::new(config.build_strategy, config.platform_tools_version.clone());

    let artifacts = if no_build {
        locate_artifacts(&strategy.output_dir(&root), &programs)?
    } else {
        let session = SessionHandle::new(config.tcp_port);
        ArtifactResolver::new(&strategy, &ProcessRunner)
            .resolve(&session, &root, &programs, managed)
            .await?
    };

    let mut artifacts: Vec<ProgramArtifact> = artifacts.into_values().collect();
    artifacts.sort_by(|a, b| a.program_name.cmp(&b.program_name));
    println!("{}", serde_json::to_string_pretty(&artifacts)?);
    Ok(())
}
