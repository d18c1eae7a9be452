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

//! Tether Common - Shared functionality for Tether components
//!
//! This crate provides the types exchanged between the orchestrator engine,
//! the `tether` binary and the host editor, together with logging setup and
//! helpers for tests.

/// Common types used throughout Tether: breakpoints, launch descriptions, fingerprints and CPI flows
pub mod types;

/// Environment variable names understood by Tether and by the VM run process
pub mod env;
/// Logging setup and utilities for consistent logging across Tether components
pub mod logging;
/// Helpers for building throwaway workspaces in tests
pub mod test_utils;

pub use logging::*;
pub use types::*;
