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

//! Environment variable name constants.
//!
//! Two groups live here: the variables Tether hands to the VM run process
//! (the debug port and the fingerprint hand-off file), and the variables that
//! override Tether's own workspace configuration.
//!
//! # Environment Variables
//!
//! ## Run process
//! - [`VM_DEBUG_PORT`] - First TCP port the VM opens a debug endpoint on
//! - [`SBPF_DEBUG_PORT`] - Same as above, for older runners
//! - [`VM_DEBUG_EXEC_INFO_FILE`] - Marker file the VM writes program fingerprints to
//!
//! ## Configuration
//! - [`TETHER_TCP_PORT`] - Overrides the default TCP port
//! - [`TETHER_PLATFORM_TOOLS_VERSION`] - Overrides the platform-tools version

/// First TCP port the virtual machine should open its GDB-remote endpoint on.
///
/// Nested cross-program invocations open consecutive ports after this one.
/// Tether sets this on the spawned run process; it is never read from Tether's
/// own environment.
pub const VM_DEBUG_PORT: &str = "VM_DEBUG_PORT";

/// Older name of [`VM_DEBUG_PORT`], still read by some test runners.
pub const SBPF_DEBUG_PORT: &str = "SBPF_DEBUG_PORT";

/// Path of the marker file the virtual machine writes a program fingerprint to.
///
/// Only set on the run process when the marker-file fingerprint channel is
/// configured. The VM writes the 64-character hex digest of the program it is
/// about to execute; Tether reads, trims and deletes the file.
pub const VM_DEBUG_EXEC_INFO_FILE: &str = "VM_DEBUG_EXEC_INFO_FILE";

/// Overrides the default TCP port from `tether.toml`.
///
/// # Examples
///
/// ```bash
/// TETHER_TCP_PORT=7000 tether debug test_transfer
/// ```
pub const TETHER_TCP_PORT: &str = "TETHER_TCP_PORT";

/// Overrides the platform-tools version used to locate the debugger library.
///
/// # Examples
///
/// ```bash
/// TETHER_PLATFORM_TOOLS_VERSION=1.52 tether debug test_transfer
/// ```
pub const TETHER_PLATFORM_TOOLS_VERSION: &str = "TETHER_PLATFORM_TOOLS_VERSION";
