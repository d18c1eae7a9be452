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

use serial_test::serial;
use tether_common::{
    env::{TETHER_PLATFORM_TOOLS_VERSION, TETHER_TCP_PORT},
    test_utils::FakeWorkspace,
    CpiFlow,
};
use tether_engine::{
    BuildStrategyKind, EngineConfig, FingerprintChannel, SessionError, CONFIG_FILE_NAME,
};
use tracing::info;

fn clear_env() {
    std::env::remove_var(TETHER_TCP_PORT);
    std::env::remove_var(TETHER_PLATFORM_TOOLS_VERSION);
}

#[test]
fn test_default_config() {
    tether_common::logging::ensure_test_logging(None);
    info!("Running test");
    let config = EngineConfig::default();

    assert_eq!(config.tcp_port, 6612);
    assert_eq!(config.platform_tools_version, "1.51");
    assert!(config.cpi_flows.is_empty());
    assert_eq!(config.max_cpi_depth, 4);
    assert_eq!(config.build_strategy, BuildStrategyKind::SbpfV0);
    assert_eq!(config.fingerprint_channel, FingerprintChannel::Log);
    assert_eq!(config.program_hash_timeout_ms, 10_000);
    assert_eq!(config.remote_host, "127.0.0.1");
    assert_eq!(config.test_command, None);
    assert_eq!(config.platform_tools_dir, None);
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_config_file() {
    tether_common::logging::ensure_test_logging(None);
    let config = EngineConfig::from_toml_str(
        r#"
        tcp_port = 7000
        build_strategy = "sbpf-v1"
        fingerprint_channel = "marker-file"
        platform_tools_dir = "/opt/solana-cache"

        [[cpi_flows]]
        testName = "test_cross"
        programSequence = ["alpha", "beta"]

        [[cpi_flows]]
        test_name = "test_deep"
        program_sequence = ["alpha", "beta", "gamma"]
        "#,
    )
    .unwrap();

    assert_eq!(config.tcp_port, 7000);
    assert_eq!(config.build_strategy, BuildStrategyKind::SbpfV1);
    assert_eq!(config.fingerprint_channel, FingerprintChannel::MarkerFile);
    assert_eq!(config.platform_tools_dir.as_deref(), Some(std::path::Path::new("/opt/solana-cache")));
    assert_eq!(
        config.cpi_flows,
        vec![
            CpiFlow::new("test_cross", ["alpha", "beta"]),
            CpiFlow::new("test_deep", ["alpha", "beta", "gamma"]),
        ]
    );
    // unspecified keys keep their defaults
    assert_eq!(config.platform_tools_version, "1.51");
}

#[test]
fn test_parse_rejects_unknown_strategy() {
    tether_common::logging::ensure_test_logging(None);
    let err = EngineConfig::from_toml_str("build_strategy = \"sbpf-v9\"").unwrap_err();
    assert!(matches!(err, SessionError::Config(_)));
}

#[test]
#[serial]
fn test_load_layers_file_and_env() {
    tether_common::logging::ensure_test_logging(None);
    clear_env();
    let ws = FakeWorkspace::native("counter").unwrap();

    assert_eq!(EngineConfig::load(ws.root()).unwrap(), EngineConfig::default());

    ws.write_file(CONFIG_FILE_NAME, "tcp_port = 7000\nplatform_tools_version = \"1.43\"\n").unwrap();
    let config = EngineConfig::load(ws.root()).unwrap();
    assert_eq!(config.tcp_port, 7000);
    assert_eq!(config.platform_tools_version, "1.43");

    std::env::set_var(TETHER_TCP_PORT, "7100");
    std::env::set_var(TETHER_PLATFORM_TOOLS_VERSION, "1.52");
    let config = EngineConfig::load(ws.root()).unwrap();
    assert_eq!(config.tcp_port, 7100);
    assert_eq!(config.platform_tools_version, "1.52");

    std::env::set_var(TETHER_TCP_PORT, "not-a-port");
    assert!(matches!(EngineConfig::load(ws.root()), Err(SessionError::Config(_))));
    clear_env();
}

#[test]
#[serial]
fn test_load_validates() {
    tether_common::logging::ensure_test_logging(None);
    clear_env();
    let ws = FakeWorkspace::native("counter").unwrap();
    ws.write_file(
        CONFIG_FILE_NAME,
        "max_cpi_depth = 2\n[[cpi_flows]]\ntest_name = \"t\"\nprogram_sequence = [\"a\", \"b\", \"c\"]\n",
    )
    .unwrap();
    assert!(matches!(EngineConfig::load(ws.root()), Err(SessionError::Config(_))));
}

#[test]
fn test_validate() {
    tether_common::logging::ensure_test_logging(None);
    let empty_flow = EngineConfig::default().with_cpi_flows(vec![CpiFlow::new("t", Vec::<String>::new())]);
    assert!(empty_flow.validate().is_err());

    let no_depth = EngineConfig { max_cpi_depth: 0, ..Default::default() };
    assert!(no_depth.validate().is_err());

    let no_room = EngineConfig::default().with_tcp_port(u16::MAX - 1);
    assert!(no_room.validate().is_err());

    let empty_command = EngineConfig { test_command: Some(vec![]), ..Default::default() };
    assert!(empty_command.validate().is_err());

    let ok = EngineConfig::default()
        .with_cpi_flows(vec![CpiFlow::new("test_cross", ["alpha", "beta"])])
        .with_test_command(["sh", "-c", "cargo test {test}"]);
    assert!(ok.validate().is_ok());
}

#[test]
fn test_builders() {
    tether_common::logging::ensure_test_logging(None);
    let config = EngineConfig::default()
        .with_tcp_port(7000)
        .with_platform_tools_version("1.43")
        .with_build_strategy(BuildStrategyKind::SbpfV1)
        .with_fingerprint_channel(FingerprintChannel::MarkerFile)
        .with_timing(10, 5, 200);

    assert_eq!(config.tcp_port, 7000);
    assert_eq!(config.platform_tools_version, "1.43");
    assert_eq!(config.port_poll_interval().as_millis(), 10);
    assert_eq!(config.marker_poll_interval().as_millis(), 10);
    assert_eq!(config.fingerprint_poll_interval().as_millis(), 5);
    assert_eq!(config.program_hash_timeout().as_millis(), 200);
}
