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


//! Tether engine: the remote debug session orchestrator core.
//!
//! The engine builds a workspace of VM programs, starts the test process that
//! hosts the VM, watches the TCP ports the VM opens for remote debugging,
//! works out which program each port belongs to and asks the host editor to
//! attach a debugger to it. Editor breakpoints are translated into debugger
//! commands for the lifetime of the session.
//!
//! # Key Components
//!
//! - [`Orchestrator`] - drives a session from request to teardown
//! - [`SessionHandle`] - the shared session state and its cancellation generation
//! - [`ArtifactResolver`] - builds and fingerprints program binaries
//! - [`BreakpointTranslator`] and [`BreakpointTracker`] - editor breakpoints to debugger commands
//! - [`PortWatcher`] - cancellable port polling and fan-out
//! - [`FingerprintResolver`] - maps the VM's program announcements to programs
//! - [`HostIde`] - the editor collaborator

pub mod artifact;
pub use artifact::*;

pub mod breakpoint;
pub use breakpoint::*;

pub mod build;
pub use build::*;

pub mod config;
pub use config::*;

pub mod error;
pub use error::*;

pub mod fingerprint;
pub use fingerprint::*;

pub mod host;
pub use host::*;

pub mod orchestrator;
pub use orchestrator::*;

pub mod port;
pub use port::*;

pub mod process;
pub use process::*;

pub mod project;
pub use project::*;

pub mod session;
pub use session::*;

pub mod settings;
pub use settings::*;

pub mod symbols;
pub use symbols::*;
