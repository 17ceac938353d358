// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dray_core::{ExecutorId, FrameworkId, TaskId, TaskState};
use tempfile::tempdir;

fn update(state: TaskState) -> StatusUpdate {
    StatusUpdate::new(
        FrameworkId::new("fw-1"),
        ExecutorId::new("e-1"),
        TaskId::new("t-1"),
        state,
        1_000,
    )
}

#[test]
fn appended_records_replay_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("updates");

    let running = update(TaskState::Running);
    let finished = update(TaskState::Finished);

    let mut log = UpdateLog::open(&path).unwrap();
    log.append(&UpdateLogRecord::Update { update: running.clone() }).unwrap();
    log.append(&UpdateLogRecord::Ack { uuid: running.uuid.clone() }).unwrap();
    log.append(&UpdateLogRecord::Update { update: finished.clone() }).unwrap();

    let records = UpdateLog::replay(&path).unwrap();
    assert_eq!(
        records,
        vec![
            UpdateLogRecord::Update { update: running.clone() },
            UpdateLogRecord::Ack { uuid: running.uuid },
            UpdateLogRecord::Update { update: finished },
        ]
    );
}

#[test]
fn missing_log_replays_empty() {
    let dir = tempdir().unwrap();
    assert!(UpdateLog::replay(&dir.path().join("updates")).unwrap().is_empty());
}

#[test]
fn truncated_tail_keeps_durable_prefix() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("updates");

    let first = update(TaskState::Running);
    let mut log = UpdateLog::open(&path).unwrap();
    log.append(&UpdateLogRecord::Update { update: first.clone() }).unwrap();
    log.append(&UpdateLogRecord::Update { update: update(TaskState::Finished) }).unwrap();
    drop(log);

    // Chop into the middle of the second frame (crash mid-append).
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 7]).unwrap();

    let records = UpdateLog::replay(&path).unwrap();
    assert_eq!(records, vec![UpdateLogRecord::Update { update: first }]);
}

#[test]
fn corrupt_payload_stops_replay_at_damage() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("updates");

    let first = update(TaskState::Running);
    let mut log = UpdateLog::open(&path).unwrap();
    log.append(&UpdateLogRecord::Update { update: first.clone() }).unwrap();
    log.append(&UpdateLogRecord::Update { update: update(TaskState::Failed) }).unwrap();
    drop(log);

    // Flip a payload byte inside the second frame; its checksum no longer
    // matches so replay must stop before it.
    let mut bytes = std::fs::read(&path).unwrap();
    let second_frame_payload = {
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&bytes[..4]);
        let first_frame = 4 + u32::from_le_bytes(len_bytes) as usize + 8;
        first_frame + 10
    };
    bytes[second_frame_payload] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();

    let records = UpdateLog::replay(&path).unwrap();
    assert_eq!(records, vec![UpdateLogRecord::Update { update: first }]);
}

#[test]
fn appends_after_reopen_extend_the_log() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("updates");

    let first = update(TaskState::Running);
    {
        let mut log = UpdateLog::open(&path).unwrap();
        log.append(&UpdateLogRecord::Update { update: first.clone() }).unwrap();
    }

    let second = update(TaskState::Finished);
    {
        let mut log = UpdateLog::open(&path).unwrap();
        log.append(&UpdateLogRecord::Update { update: second.clone() }).unwrap();
    }

    let records = UpdateLog::replay(&path).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(
        records[1],
        UpdateLogRecord::Update { update: second }
    );
}
