// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn update(state: TaskState) -> StatusUpdate {
    StatusUpdate::new(
        FrameworkId::new("fw-1"),
        ExecutorId::new("exec-1"),
        TaskId::new("t-1"),
        state,
        1_000_000,
    )
}

#[test]
fn fresh_updates_get_distinct_uuids() {
    let a = update(TaskState::Running);
    let b = update(TaskState::Running);
    assert_ne!(a.uuid, b.uuid);
}

#[test]
fn terminal_follows_task_state() {
    assert!(!update(TaskState::Running).is_terminal());
    assert!(update(TaskState::Finished).is_terminal());
}

#[test]
fn json_round_trip_preserves_identity() {
    let u = update(TaskState::Failed).with_message("exited with status 2");
    let json = serde_json::to_string(&u).unwrap();
    let back: StatusUpdate = serde_json::from_str(&json).unwrap();
    assert_eq!(u, back);
    assert_eq!(back.message.as_deref(), Some("exited with status 2"));
}
