// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::task::TaskState;

#[test]
fn master_messages_use_tagged_format() {
    let msg = MasterMessage::KillTask {
        framework_id: FrameworkId::new("fw-1"),
        task_id: TaskId::new("t-1"),
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "master:kill_task");
    assert_eq!(json["framework_id"], "fw-1");
}

#[test]
fn unknown_master_message_deserializes_to_custom() {
    let msg: MasterMessage =
        serde_json::from_str(r#"{"type": "master:quota_update", "amount": 3}"#).unwrap();
    assert_eq!(msg, MasterMessage::Custom);
}

#[test]
fn unknown_executor_message_deserializes_to_custom() {
    let msg: ExecutorMessage = serde_json::from_str(r#"{"type": "executor:heartbeat"}"#).unwrap();
    assert_eq!(msg, ExecutorMessage::Custom);
}

#[test]
fn reregister_carries_inventory() {
    let msg = SlaveMessage::Reregister {
        slave: SlaveInfo::new("node-1", Resources::default()),
        executors: vec![ExecutorSnapshot {
            executor_id: ExecutorId::new("e-1"),
            framework_id: FrameworkId::new("fw-1"),
            resources: Resources::new(1.0, 128, 0),
        }],
        tasks: vec![TaskSnapshot {
            task_id: TaskId::new("t-1"),
            framework_id: FrameworkId::new("fw-1"),
            executor_id: ExecutorId::new("e-1"),
            state: TaskState::Running,
            resources: Resources::new(1.0, 128, 0),
        }],
    };

    let json = serde_json::to_string(&msg).unwrap();
    let back: SlaveMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(msg, back);
}

#[test]
fn executor_command_round_trips() {
    let cmd = ExecutorCommand::StatusUpdateAck {
        task_id: TaskId::new("t-9"),
        uuid: UpdateId::generate(),
    };
    let json = serde_json::to_string(&cmd).unwrap();
    let back: ExecutorCommand = serde_json::from_str(&json).unwrap();
    assert_eq!(cmd, back);
}
