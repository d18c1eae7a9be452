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

//! Test utilities for integration tests

use std::{future::Future, time::Duration};

/// Initialization utilities for tests
pub mod init {
    /// Initialize logging for a test
    pub fn init_test_environment() {
        tether_common::logging::ensure_test_logging(None);
    }
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Awaits `future`, panicking if it takes longer than `timeout`
pub async fn within<T>(timeout: Duration, future: impl Future<Output = T>) -> T {
    match tokio::time::timeout(timeout, future).await {
        Ok(value) => value,
        Err(_) => panic!("timed out after {timeout:?}"),
    }
}

/// A fake build toolchain
pub mod build {
    use std::{path::Path, sync::Arc};

    use parking_lot::Mutex;
    use tether_engine::{
        normalize_program_name, BuildInvocation, BuildRunner, CommandOutput, SessionResult,
        DEBUG_EXTENSION, DEPLOY_DIR, DEPLOY_EXTENSION,
    };

    #[derive(Debug, Default)]
    struct State {
        programs: Vec<(String, Vec<u8>)>,
        symbols: String,
        fail_with: Option<String>,
        invocations: Vec<String>,
    }

    /// [`BuildRunner`] that writes canned binaries instead of compiling
    ///
    /// The compile step writes `<name>.debug` and `<name>.so` for every
    /// registered program; `llvm-objdump` prints the configured symbol table.
    #[derive(Debug, Clone, Default)]
    pub struct FakeBuildRunner {
        state: Arc<Mutex<State>>,
    }

    impl FakeBuildRunner {
        /// Runner producing `programs` with the given deployable bytes
        pub fn with_programs(programs: &[(&str, &[u8])]) -> Self {
            let runner = Self::default();
            runner.state.lock().programs =
                programs.iter().map(|(name, bytes)| (name.to_string(), bytes.to_vec())).collect();
            runner
        }

        /// Output of `llvm-objdump -t`
        pub fn with_symbols(self, symbols: &str) -> Self {
            self.state.lock().symbols = symbols.to_string();
            self
        }

        /// Makes the compile step fail with `stderr`
        pub fn failing(self, stderr: &str) -> Self {
            self.state.lock().fail_with = Some(stderr.to_string());
            self
        }

        /// Every command run so far
        pub fn invocations(&self) -> Vec<String> {
            self.state.lock().invocations.clone()
        }

        fn compile(&self, workspace_root: &Path) -> std::io::Result<()> {
            let dir = workspace_root.join(DEPLOY_DIR);
            std::fs::create_dir_all(&dir)?;
            for (name, bytes) in &self.state.lock().programs {
                let stem = normalize_program_name(name);
                std::fs::write(dir.join(format!("{stem}{DEBUG_EXTENSION}")), b"\x7fELF debug")?;
                std::fs::write(dir.join(format!("{stem}{DEPLOY_EXTENSION}")), bytes)?;
            }
            Ok(())
        }
    }

    impl BuildRunner for FakeBuildRunner {
        async fn run(&self, invocation: &BuildInvocation) -> SessionResult<CommandOutput> {
            self.state.lock().invocations.push(invocation.to_string());

            match invocation.program.as_str() {
                "llvm-objdump" => Ok(CommandOutput {
                    success: true,
                    code: Some(0),
                    stdout: self.state.lock().symbols.clone(),
                    stderr: String::new(),
                }),
                "cargo" | "cargo-build-sbf" => {
                    let failure = self.state.lock().fail_with.clone();
                    if let Some(stderr) = failure {
                        return Ok(CommandOutput { success: false, code: Some(101), stdout: String::new(), stderr });
                    }
                    self.compile(&invocation.cwd)?;
                    Ok(CommandOutput { success: true, code: Some(0), ..Default::default() })
                }
                _ => Ok(CommandOutput { success: true, code: Some(0), ..Default::default() }),
            }
        }
    }
}

/// A fake socket table
pub mod probe {
    use std::{collections::HashSet, sync::Arc};

    use parking_lot::Mutex;
    use tether_engine::PortProbe;

    #[derive(Debug, Default)]
    struct State {
        listening: HashSet<u16>,
        busy: HashSet<u16>,
    }

    /// [`PortProbe`] whose ports are opened by the test
    #[derive(Debug, Clone, Default)]
    pub struct FakeProbe {
        state: Arc<Mutex<State>>,
    }

    impl FakeProbe {
        /// Starts listening on `port`
        pub fn open(&self, port: u16) {
            self.state.lock().listening.insert(port);
        }

        /// Marks `port` as used by some unrelated socket
        pub fn occupy(&self, port: u16) {
            self.state.lock().busy.insert(port);
        }
    }

    impl PortProbe for FakeProbe {
        async fn is_open(&self, port: u16) -> bool {
            self.state.lock().listening.contains(&port)
        }

        async fn is_available(&self, port: u16) -> bool {
            let state = self.state.lock();
            !state.listening.contains(&port) && !state.busy.contains(&port)
        }
    }
}

/// A fake host editor
pub mod host {
    use std::{collections::HashMap, sync::Arc, time::Duration};

    use parking_lot::Mutex;
    use tether_common::{EditorBreakpoint, LaunchDescription, TargetCommand};
    use tether_engine::{HostIde, MessageLevel, SessionError, SessionResult};

    #[derive(Debug, Default)]
    struct State {
        breakpoints: Vec<EditorBreakpoint>,
        launches: Vec<LaunchDescription>,
        commands: Vec<TargetCommand>,
        settings: HashMap<String, String>,
        messages: Vec<(MessageLevel, String)>,
        refuse_attach: Option<String>,
        setting_delay: Option<Duration>,
    }

    /// [`HostIde`] that records everything it is asked to do
    #[derive(Debug, Clone, Default)]
    pub struct FakeHost {
        state: Arc<Mutex<State>>,
    }

    impl FakeHost {
        /// Host with `breakpoints` set in the editor
        pub fn with_breakpoints(breakpoints: Vec<EditorBreakpoint>) -> Self {
            let host = Self::default();
            host.state.lock().breakpoints = breakpoints;
            host
        }

        /// Presets a user setting
        pub fn with_setting(self, key: &str, value: &str) -> Self {
            self.state.lock().settings.insert(key.to_string(), value.to_string());
            self
        }

        /// Applies setting overrides at once but answers only after `delay`
        pub fn with_setting_delay(self, delay: Duration) -> Self {
            self.state.lock().setting_delay = Some(delay);
            self
        }

        /// Makes every attach request fail
        pub fn refusing_attach(self, reason: &str) -> Self {
            self.state.lock().refuse_attach = Some(reason.to_string());
            self
        }

        /// Attach requests received
        pub fn launches(&self) -> Vec<LaunchDescription> {
            self.state.lock().launches.clone()
        }

        /// Debugger commands received
        pub fn commands(&self) -> Vec<String> {
            self.state.lock().commands.iter().map(ToString::to_string).collect()
        }

        /// Current value of a setting
        pub fn setting(&self, key: &str) -> Option<String> {
            self.state.lock().settings.get(key).cloned()
        }

        /// Messages shown at `level`
        pub fn messages(&self, level: MessageLevel) -> Vec<String> {
            self.state
                .lock()
                .messages
                .iter()
                .filter(|(l, _)| *l == level)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    impl HostIde for FakeHost {
        async fn breakpoints(&self) -> Vec<EditorBreakpoint> {
            self.state.lock().breakpoints.clone()
        }

        async fn start_debugging(&self, launch: LaunchDescription) -> SessionResult<()> {
            let mut state = self.state.lock();
            if let Some(reason) = &state.refuse_attach {
                return Err(SessionError::AttachFailure(reason.clone()));
            }
            state.launches.push(launch);
            Ok(())
        }

        async fn send_command(&self, command: TargetCommand) {
            self.state.lock().commands.push(command);
        }

        async fn override_setting(&self, key: &str, value: &str) -> Option<String> {
            let (previous, delay) = {
                let mut state = self.state.lock();
                (state.settings.insert(key.to_string(), value.to_string()), state.setting_delay)
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            previous
        }

        async fn restore_setting(&self, key: &str, value: Option<String>) {
            let mut state = self.state.lock();
            match value {
                Some(value) => state.settings.insert(key.to_string(), value),
                None => state.settings.remove(key),
            };
        }

        async fn show_message(&self, level: MessageLevel, message: &str) {
            self.state.lock().messages.push((level, message.to_string()));
        }
    }
}

/// Workspace fixtures
pub mod workspace {
    use tether_common::test_utils::FakeWorkspace;

    /// Symbol table of an Anchor workspace with `alpha` and `beta`
    pub const ALPHA_BETA_SYMBOLS: &str = "
SYMBOL TABLE:
0000000000000120 g     F .text\t00000000000000a8 entrypoint
0000000000001a40 l     F .text\t0000000000000230 alpha::instruction::global::initialize
0000000000001c80 l     F .text\t0000000000000100 beta::instruction::global::transfer
";

    /// Source of `programs/alpha/src/lib.rs`
    pub const ALPHA_SOURCE: &str = "use anchor_lang::prelude::*;

pub fn initialize(ctx: Context<Initialize>) -> Result<()> {
    msg!(\"init\");
    Ok(())
}
";

    /// Anchor workspace with programs `alpha` and `beta` and alpha's source
    pub fn alpha_beta() -> FakeWorkspace {
        let ws = FakeWorkspace::anchor(&["alpha", "beta"]).unwrap();
        ws.write_file("programs/alpha/src/lib.rs", ALPHA_SOURCE).unwrap();
        ws
    }
}
