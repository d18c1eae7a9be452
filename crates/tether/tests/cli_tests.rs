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

use assert_cmd::Command;
use predicates::prelude::*;
use tether_common::{test_utils::FakeWorkspace, Fingerprint};
use tracing::info;

fn tether() -> Command {
    let mut cmd = Command::cargo_bin("tether").unwrap();
    cmd.env_remove("TETHER_TCP_PORT").env_remove("TETHER_PLATFORM_TOOLS_VERSION");
    cmd
}

#[test]
fn test_cli_version() {
    tether_common::logging::ensure_test_logging(None);
    info!("Running test");
    tether().arg("--version").assert().success().stdout(predicate::str::contains("tether"));
}

#[test]
fn test_debug_subcommand_help() {
    tether_common::logging::ensure_test_logging(None);
    tether()
        .arg("debug")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Debug a test, driven by an editor over stdio"));
}

#[test]
fn test_resolve_subcommand_help() {
    tether_common::logging::ensure_test_logging(None);
    tether()
        .args(["resolve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--no-build"));
}

#[test]
fn test_missing_subcommand() {
    tether_common::logging::ensure_test_logging(None);
    tether().assert().failure().stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_invalid_build_strategy() {
    tether_common::logging::ensure_test_logging(None);
    tether().args(["resolve", "--build-strategy", "sbpf-v9"]).assert().failure();
}

#[test]
fn test_resolve_without_build() {
    tether_common::logging::ensure_test_logging(None);
    let ws = FakeWorkspace::anchor(&["alpha", "beta"]).unwrap();
    ws.write_binaries("alpha", b"alpha bytes").unwrap();
    ws.write_binaries("beta", b"beta bytes").unwrap();

    let output = tether()
        .args(["resolve", "--no-build", "--workspace"])
        .arg(ws.root())
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let artifacts: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let artifacts = artifacts.as_array().unwrap();
    assert_eq!(artifacts.len(), 2);
    assert_eq!(artifacts[0]["program_name"], "alpha");
    assert_eq!(artifacts[0]["fingerprint"], Fingerprint::from_bytes(b"alpha bytes").to_string());
    assert_eq!(artifacts[1]["program_name"], "beta");
    assert!(artifacts[1]["debug_binary"].as_str().unwrap().ends_with("beta.debug"));
}

#[test]
fn test_resolve_missing_binary_fails() {
    tether_common::logging::ensure_test_logging(None);
    let ws = FakeWorkspace::anchor(&["alpha", "beta"]).unwrap();
    ws.write_binaries("alpha", b"alpha bytes").unwrap();
    ws.write_debug_only("beta").unwrap();

    tether()
        .args(["resolve", "--no-build", "--workspace"])
        .arg(ws.root())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no deployable binary for program `beta`"));
}

#[test]
fn test_missing_workspace() {
    tether_common::logging::ensure_test_logging(None);
    tether()
        .args(["resolve", "--workspace", "/definitely/not/a/workspace"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}
