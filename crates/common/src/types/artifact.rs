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

use crate::Fingerprint;

/// The two binaries a build leaves behind for one program.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgramExecutables {
    /// Binary carrying debug info, loaded by the debugger client.
    pub debug_binary: PathBuf,
    /// Binary the VM actually executes; its bytes are fingerprinted.
    pub deploy_binary: PathBuf,
}

/// A compiled program together with its runtime identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgramArtifact {
    /// Program (package) name as configured in the workspace.
    pub program_name: String,
    /// Binary carrying debug info.
    pub debug_binary: PathBuf,
    /// Deployable binary.
    pub deploy_binary: PathBuf,
    /// SHA-256 of the deployable binary.
    pub fingerprint: Fingerprint,
}

impl ProgramArtifact {
    /// The executable pair without the fingerprint.
    pub fn executables(&self) -> ProgramExecutables {
        ProgramExecutables {
            debug_binary: self.debug_binary.clone(),
            deploy_binary: self.deploy_binary.clone(),
        }
    }
}
