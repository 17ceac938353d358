// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dray_core::{ExecutorId, FrameworkId, SlaveId};
use tempfile::tempdir;

async fn start_listener(
    socket: &std::path::Path,
) -> (mpsc::Receiver<AgentEvent>, tokio::task::JoinHandle<()>) {
    let (event_tx, event_rx) = mpsc::channel(16);
    let listener = Listener::new(UnixListener::bind(socket).unwrap(), event_tx);
    let handle = tokio::spawn(listener.run());
    (event_rx, handle)
}

#[tokio::test]
async fn registration_message_arrives_with_a_working_connection() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("agent.sock");
    let (mut event_rx, _listener) = start_listener(&socket).await;

    let mut client = UnixStream::connect(&socket).await.unwrap();
    client
        .write_all(b"{\"type\":\"executor:register\",\"framework_id\":\"fw-1\",\"executor_id\":\"e-1\"}\n")
        .await
        .unwrap();

    let event = event_rx.recv().await.unwrap();
    let AgentEvent::Executor { conn, message } = event else {
        panic!("unexpected event");
    };
    assert_eq!(
        message,
        ExecutorMessage::Register {
            framework_id: FrameworkId::new("fw-1"),
            executor_id: ExecutorId::new("e-1"),
        }
    );

    // The carried connection reaches the same client.
    conn.send(ExecutorCommand::Registered {
        slave_id: SlaveId::new("s-1"),
        framework_id: FrameworkId::new("fw-1"),
        executor_id: ExecutorId::new("e-1"),
    });

    let mut reply = String::new();
    BufReader::new(client).read_line(&mut reply).await.unwrap();
    let parsed: ExecutorCommand = serde_json::from_str(reply.trim()).unwrap();
    assert!(matches!(parsed, ExecutorCommand::Registered { .. }));
}

#[tokio::test]
async fn garbage_lines_are_dropped_and_the_stream_continues() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("agent.sock");
    let (mut event_rx, _listener) = start_listener(&socket).await;

    let mut client = UnixStream::connect(&socket).await.unwrap();
    client.write_all(b"this is not json\n").await.unwrap();
    client
        .write_all(b"{\"type\":\"executor:register\",\"framework_id\":\"fw-1\",\"executor_id\":\"e-1\"}\n")
        .await
        .unwrap();

    // The valid message still arrives.
    let event = event_rx.recv().await.unwrap();
    assert!(matches!(event, AgentEvent::Executor { .. }));
}

#[tokio::test]
async fn unknown_message_types_deserialize_to_custom_once_registered() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("agent.sock");
    let (mut event_rx, _listener) = start_listener(&socket).await;

    let mut client = UnixStream::connect(&socket).await.unwrap();
    client
        .write_all(b"{\"type\":\"executor:register\",\"framework_id\":\"fw-1\",\"executor_id\":\"e-1\"}\n")
        .await
        .unwrap();
    client
        .write_all(b"{\"type\":\"executor:future_thing\",\"x\":1}\n")
        .await
        .unwrap();

    let event = event_rx.recv().await.unwrap();
    assert!(matches!(
        event,
        AgentEvent::Executor { message: ExecutorMessage::Register { .. }, .. }
    ));
    let event = event_rx.recv().await.unwrap();
    let AgentEvent::Executor { message, .. } = event else {
        panic!("unexpected event");
    };
    assert_eq!(message, ExecutorMessage::Custom);
}

#[tokio::test]
async fn messages_before_registration_close_the_connection() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("agent.sock");
    let (mut event_rx, _listener) = start_listener(&socket).await;

    let mut client = UnixStream::connect(&socket).await.unwrap();
    client
        .write_all(
            b"{\"type\":\"executor:framework_message\",\"framework_id\":\"fw-1\",\"executor_id\":\"e-1\",\"data\":\"x\"}\n",
        )
        .await
        .unwrap();

    // Nothing reaches the agent, and the connection is closed on us.
    let mut reply = String::new();
    let read = BufReader::new(client).read_line(&mut reply).await.unwrap();
    assert_eq!(read, 0, "expected EOF from a closed connection");
    assert!(event_rx.try_recv().is_err());
}

#[tokio::test]
async fn reregister_opens_a_reconnecting_executor_connection() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("agent.sock");
    let (mut event_rx, _listener) = start_listener(&socket).await;

    let mut client = UnixStream::connect(&socket).await.unwrap();
    client
        .write_all(
            b"{\"type\":\"executor:reregister\",\"framework_id\":\"fw-1\",\"executor_id\":\"e-1\",\"tasks\":[],\"updates\":[]}\n",
        )
        .await
        .unwrap();

    let event = event_rx.recv().await.unwrap();
    assert!(matches!(
        event,
        AgentEvent::Executor { message: ExecutorMessage::Reregister { .. }, .. }
    ));
}
