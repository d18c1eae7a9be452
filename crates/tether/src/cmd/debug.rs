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

//! Debug command - run one debug session over the stdio protocol

use std::time::Duration;

use eyre::Result;
use tether_engine::{
    DebugRequest, HostEvent, NetstatProbe, Orchestrator, ProcessRunner, SessionHandle, TestLanguage,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::mpsc,
};
use tracing::{debug, info, warn};

use super::{load_config, workspace_root};
use crate::{
    host::{ResponseRouter, StdioHost},
    protocol::{IncomingMessage, OutgoingMessage},
};

const TERMINATION_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Debugs `test_name` until the editor ends the session, stdin closes or
/// Ctrl+C is pressed
pub async fn debug_test(cli: &crate::Cli, test_name: &str, language: TestLanguage) -> Result<()> {
    let root = workspace_root(cli)?;
    let config = load_config(cli)?;

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_messages(out_rx));

    let host = StdioHost::new(out_tx.clone());
    let router = host.router();
    let orchestrator = Orchestrator::new(config, root, ProcessRunner, NetstatProbe, host);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let events = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_events(event_rx).await })
    };
    let mut reader = tokio::spawn(read_messages(router, event_tx));

    let request = DebugRequest { test_name: test_name.to_string(), language };
    let result = orchestrator.start_debug(request).await;
    match &result {
        Ok(launch) => {
            info!("Watching ports {:?} for programs {:?}", launch.ports, launch.programs);
            let _ = out_tx.send(OutgoingMessage::Launched(launch.clone()));

            tokio::select! {
                _ = wait_for_termination(orchestrator.session()) => {
                    info!("Debug session finished");
                }
                _ = &mut reader => {
                    info!("Editor disconnected, shutting down...");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down...");
                }
            }
            orchestrator.cleanup().await;
        }
        Err(e) => warn!("Could not start debugging {test_name}: {e}"),
    }

    let _ = out_tx.send(OutgoingMessage::Finished);
    reader.abort();
    events.abort();
    let _ = writer.await;

    result.map(|_| ()).map_err(Into::into)
}

async fn wait_for_termination(session: &SessionHandle) {
    while session.is_active() {
        tokio::time::sleep(TERMINATION_POLL_INTERVAL).await;
    }
}

async fn read_messages(router: ResponseRouter, events: mpsc::UnboundedSender<HostEvent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read from editor: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match IncomingMessage::parse(&line) {
            Ok(IncomingMessage::Response { id, result, error }) => {
                router.complete(id, error.map_or(Ok(result), Err));
            }
            Ok(IncomingMessage::Event(event)) => {
                if events.send(event).is_err() {
                    break;
                }
            }
            Ok(IncomingMessage::Shutdown) => {
                debug!("Editor requested shutdown");
                break;
            }
            Err(e) => warn!("Ignoring malformed message: {e}"),
        }
    }
    router.fail_all("editor connection closed");
}

/// Writes messages until [`OutgoingMessage::Finished`] is written
async fn write_messages(mut messages: mpsc::UnboundedReceiver<OutgoingMessage>) {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = messages.recv().await {
        let finished = message == OutgoingMessage::Finished;
        let line = match message.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!("Could not encode message: {e}");
                continue;
            }
        };
        if stdout.write_all(format!("{line}\n").as_bytes()).await.is_err() {
            break;
        }
        let _ = stdout.flush().await;
        if finished {
            break;
        }
    }
}
