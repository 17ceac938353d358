// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unix-socket listener for executor connections.
//!
//! Executors connect to `<work_dir>/agent.sock` and speak
//! newline-delimited JSON: inbound lines deserialize to
//! [`ExecutorMessage`], outbound [`ExecutorCommand`]s are written by a
//! per-connection writer task. The write half is wrapped in an
//! [`ExecutorConn`] and travels with every inbound event so the agent
//! can answer the right process.

use dray_core::{ExecutorCommand, ExecutorMessage};
use dray_engine::{AgentEvent, ExecutorConn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{unix::OwnedWriteHalf, UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outbound queue per executor connection.
const CONNECTION_BUFFER: usize = 64;

/// Accept loop for executor connections.
pub struct Listener {
    listener: UnixListener,
    event_tx: mpsc::Sender<AgentEvent>,
}

impl Listener {
    pub fn new(listener: UnixListener, event_tx: mpsc::Sender<AgentEvent>) -> Self {
        Self { listener, event_tx }
    }

    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    tokio::spawn(handle_connection(stream, self.event_tx.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "accept on executor socket failed");
                }
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, event_tx: mpsc::Sender<AgentEvent>) {
    let (read_half, write_half) = stream.into_split();
    let (cmd_tx, cmd_rx) = mpsc::channel(CONNECTION_BUFFER);
    let conn = ExecutorConn::new(cmd_tx);

    tokio::spawn(write_commands(write_half, cmd_rx));

    // Protocol: the first message must be a registration handshake
    // (Register, or Reregister when reconnecting after an agent restart).
    let mut registered = false;
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<ExecutorMessage>(line) {
                    Ok(message) => {
                        let is_handshake = matches!(
                            message,
                            ExecutorMessage::Register { .. } | ExecutorMessage::Reregister { .. }
                        );
                        if !registered && !is_handshake {
                            warn!("executor connection spoke before registering, closing");
                            return;
                        }
                        registered = registered || is_handshake;

                        let event = AgentEvent::Executor { conn: conn.clone(), message };
                        if event_tx.send(event).await.is_err() {
                            return; // agent is gone
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "unparseable executor message, dropping line");
                    }
                }
            }
            Ok(None) => {
                debug!("executor connection closed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "executor connection read failed");
                return;
            }
        }
    }
}

async fn write_commands(mut write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<ExecutorCommand>) {
    while let Some(command) = rx.recv().await {
        let mut line = match serde_json::to_vec(&command) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "unserializable executor command, dropping");
                continue;
            }
        };
        line.push(b'\n');
        if write_half.write_all(&line).await.is_err() {
            // Connection is gone; the reaper notices the executor itself.
            return;
        }
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
