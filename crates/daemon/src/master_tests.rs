// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dray_core::{Resources, SlaveId, SlaveInfo};
use tokio::net::TcpListener;

#[tokio::test]
async fn connects_detects_and_exchanges_messages() {
    let fake_master = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = fake_master.local_addr().unwrap().to_string();

    let (event_tx, mut event_rx) = mpsc::channel(16);
    let link = TcpMaster::spawn(address, event_tx);

    let (stream, _) = fake_master.accept().await.unwrap();
    assert!(matches!(
        event_rx.recv().await.unwrap(),
        AgentEvent::MasterDetected { .. }
    ));

    // Agent → master
    link.send(SlaveMessage::Register {
        slave: SlaveInfo::new("node-1", Resources::default()),
    });
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let line = lines.next_line().await.unwrap().unwrap();
    let inbound: SlaveMessage = serde_json::from_str(&line).unwrap();
    assert!(matches!(inbound, SlaveMessage::Register { .. }));

    // Master → agent
    let registered = serde_json::to_string(&MasterMessage::Registered {
        slave_id: SlaveId::new("s-1"),
    })
    .unwrap();
    write_half
        .write_all(format!("{registered}\n").as_bytes())
        .await
        .unwrap();

    let event = event_rx.recv().await.unwrap();
    assert!(matches!(
        event,
        AgentEvent::Master(MasterMessage::Registered { .. })
    ));

    // Dropping the master side surfaces MasterLost.
    drop(write_half);
    drop(lines);
    let event = event_rx.recv().await.unwrap();
    assert!(matches!(event, AgentEvent::MasterLost));
}
