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

//! Tether - Remote debug session orchestrator
//!
//! Builds SBPF programs, runs the test that hosts the VM and attaches the
//! editor's debugger to every program endpoint the VM opens.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use eyre::Result;
use tether_common::env::{TETHER_PLATFORM_TOOLS_VERSION, TETHER_TCP_PORT};
use tether_engine::{BuildStrategyKind, FingerprintChannel, TestLanguage};

mod cmd;
mod host;
mod protocol;

/// Command-line interface for Tether
#[derive(Debug, Parser)]
#[command(name = "tether")]
#[command(about = "Tether - Remote debug session orchestrator for SBPF programs")]
#[command(version)]
pub struct Cli {
    /// Workspace root
    #[arg(long, short = 'w', global = true, default_value = ".")]
    pub workspace: PathBuf,

    /// First TCP port handed to the VM
    #[arg(long, global = true, env = TETHER_TCP_PORT)]
    pub tcp_port: Option<u16>,

    /// Platform-tools version used to locate the debugger library
    #[arg(long, global = true, env = TETHER_PLATFORM_TOOLS_VERSION)]
    pub platform_tools_version: Option<String>,

    /// How programs are compiled
    #[arg(long, global = true, value_enum)]
    pub build_strategy: Option<StrategyArg>,

    /// How the VM announces which program it runs
    #[arg(long, global = true, value_enum)]
    pub fingerprint_channel: Option<ChannelArg>,

    /// Also write logs to a rolling file
    #[arg(long, global = true)]
    pub log_file: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Build strategies
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    /// `cargo build-sbf --debug`, symbol-based breakpoints
    SbpfV0,
    /// `cargo-build-sbf --arch v1`, line-based breakpoints
    SbpfV1,
}

impl From<StrategyArg> for BuildStrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::SbpfV0 => Self::SbpfV0,
            StrategyArg::SbpfV1 => Self::SbpfV1,
        }
    }
}

/// Fingerprint channels
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ChannelArg {
    /// Scan the run process output
    Log,
    /// Poll the marker file the VM writes
    MarkerFile,
}

impl From<ChannelArg> for FingerprintChannel {
    fn from(arg: ChannelArg) -> Self {
        match arg {
            ChannelArg::Log => Self::Log,
            ChannelArg::MarkerFile => Self::MarkerFile,
        }
    }
}

/// Test languages
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LanguageArg {
    /// Rust test run with `cargo test`
    Rust,
    /// TypeScript test run by the workspace test script
    Typescript,
}

impl From<LanguageArg> for TestLanguage {
    fn from(arg: LanguageArg) -> Self {
        match arg {
            LanguageArg::Rust => Self::Rust,
            LanguageArg::Typescript => Self::TypeScript,
        }
    }
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Debug a test, driven by an editor over stdio
    Debug {
        /// Test to debug
        test_name: String,
        /// Language the test is written in
        #[arg(long, value_enum, default_value = "rust")]
        language: LanguageArg,
    },
    /// Build the workspace and print each program's binaries and fingerprint
    Resolve {
        /// Use the binaries already in the output directory
        #[arg(long)]
        no_build: bool,
    },
    /// Check that a debug port is free
    CheckPort {
        /// Port to check (default: the configured first port)
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    tether_common::logging::init_logging("tether", cli.log_file)?;

    match &cli.command {
        Commands::Debug { test_name, language } => {
            tracing::info!("Debugging test: {test_name}");
            cmd::debug_test(&cli, test_name, (*language).into()).await
        }
        Commands::Resolve { no_build } => cmd::resolve_artifacts(&cli, *no_build).await,
        Commands::CheckPort { port } => cmd::check_port(&cli, *port).await,
    }
}
