// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP master link: JSON lines to and from the master endpoint.
//!
//! Maintains the connection in the background with reconnect backoff and
//! surfaces [`AgentEvent::MasterDetected`] / [`AgentEvent::MasterLost`]
//! so the agent can drive its registration state machine. Outbound
//! messages are best-effort while disconnected — protocol-level retries
//! (registration backoff, update retransmits) provide the reliability.

use dray_core::{MasterMessage, SlaveMessage};
use dray_engine::{AgentEvent, MasterLink};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Outbound queue toward the master.
const OUTBOUND_BUFFER: usize = 256;

/// Reconnect backoff bounds.
const RECONNECT_INITIAL: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(16);

/// Handle implementing [`MasterLink`] over a background TCP task.
#[derive(Clone)]
pub struct TcpMaster {
    tx: mpsc::Sender<SlaveMessage>,
}

impl MasterLink for TcpMaster {
    fn send(&self, message: SlaveMessage) {
        if let Err(e) = self.tx.try_send(message) {
            warn!(error = %e, "dropping message to master (link backed up or gone)");
        }
    }
}

impl TcpMaster {
    /// Spawn the connection task for `address` (host:port).
    pub fn spawn(address: String, event_tx: mpsc::Sender<AgentEvent>) -> Self {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        tokio::spawn(run(address, rx, event_tx));
        Self { tx }
    }
}

async fn run(
    address: String,
    mut rx: mpsc::Receiver<SlaveMessage>,
    event_tx: mpsc::Sender<AgentEvent>,
) {
    let mut backoff = RECONNECT_INITIAL;

    loop {
        let stream = match TcpStream::connect(&address).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(address, error = %e, "master connection failed, retrying");
                drain_while_disconnected(&mut rx);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RECONNECT_MAX);
                continue;
            }
        };
        backoff = RECONNECT_INITIAL;

        info!(address, "connected to master");
        if event_tx
            .send(AgentEvent::MasterDetected { master: address.clone() })
            .await
            .is_err()
        {
            return;
        }

        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    let Some(message) = outbound else { return };
                    let mut line = match serde_json::to_vec(&message) {
                        Ok(line) => line,
                        Err(e) => {
                            warn!(error = %e, "unserializable master message, dropping");
                            continue;
                        }
                    };
                    line.push(b'\n');
                    if write_half.write_all(&line).await.is_err() {
                        break;
                    }
                }
                inbound = lines.next_line() => {
                    match inbound {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<MasterMessage>(line) {
                                Ok(message) => {
                                    if event_tx.send(AgentEvent::Master(message)).await.is_err() {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    warn!(error = %e, "unparseable master message, dropping line");
                                }
                            }
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
            }
        }

        warn!(address, "lost connection to master");
        if event_tx.send(AgentEvent::MasterLost).await.is_err() {
            return;
        }
    }
}

/// While disconnected, outbound messages are dropped rather than queued
/// stale: the protocol layers re-send what still matters.
fn drain_while_disconnected(rx: &mut mpsc::Receiver<SlaveMessage>) {
    while let Ok(message) = rx.try_recv() {
        warn!(message = ?message_kind(&message), "no master connection, dropping message");
    }
}

fn message_kind(message: &SlaveMessage) -> &'static str {
    match message {
        SlaveMessage::Register { .. } => "register",
        SlaveMessage::Reregister { .. } => "reregister",
        SlaveMessage::Unregister { .. } => "unregister",
        SlaveMessage::StatusUpdate { .. } => "status_update",
        SlaveMessage::FrameworkMessage { .. } => "framework_message",
        SlaveMessage::Pong => "pong",
    }
}

#[cfg(test)]
#[path = "master_tests.rs"]
mod tests;
