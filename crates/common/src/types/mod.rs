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

/// Compiled program artifacts and their per-build executable paths
pub mod artifact;
/// Editor breakpoints and the debugger commands they translate into
pub mod breakpoint;
/// Content fingerprints identifying a deployable binary at runtime
pub mod fingerprint;
/// Cross-program invocation flows
pub mod flow;
/// Launch descriptions handed to the host editor for remote attach
pub mod launch;

pub use artifact::*;
pub use breakpoint::*;
pub use fingerprint::*;
pub use flow::*;
pub use launch::*;
