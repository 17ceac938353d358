// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::checkpoint;
use dray_core::{CommandInfo, Resources, StatusUpdate, TaskState};
use tempfile::tempdir;

fn seed_slave(layout: &Layout) -> SlaveId {
    let slave_id = SlaveId::new("s-1");
    checkpoint(&layout.latest_slave_path(), &slave_id).unwrap();
    checkpoint(
        &layout.slave_info_path(&slave_id),
        &SlaveInfo::new("node-1", Resources::new(4.0, 8192, 0)),
    )
    .unwrap();
    slave_id
}

fn executor_info(framework_id: &FrameworkId, executor_id: &ExecutorId) -> ExecutorInfo {
    ExecutorInfo {
        executor_id: executor_id.clone(),
        framework_id: framework_id.clone(),
        name: "sleep 1000".to_string(),
        command: CommandInfo::shell("sleep 1000"),
        resources: Resources::new(0.1, 32, 0),
    }
}

#[test]
fn empty_work_dir_is_a_cold_start() {
    let dir = tempdir().unwrap();
    let layout = Layout::new(dir.path());
    assert_eq!(recover(&layout).unwrap(), None);
}

#[test]
fn recovers_full_tree_with_update_stream() {
    let dir = tempdir().unwrap();
    let layout = Layout::new(dir.path());
    let slave_id = seed_slave(&layout);

    let framework_id = FrameworkId::new("fw-1");
    let executor_id = ExecutorId::new("e-1");
    let run = ContainerId::new("run-1");
    let task_id = TaskId::new("t-1");

    checkpoint(
        &layout.framework_info_path(&slave_id, &framework_id),
        &FrameworkInfo {
            name: "etl".to_string(),
            user: "svc".to_string(),
            failover_timeout_ms: 60_000,
        },
    )
    .unwrap();
    checkpoint(&layout.latest_run_path(&slave_id, &framework_id, &executor_id), &run).unwrap();
    checkpoint(
        &layout.executor_info_path(&slave_id, &framework_id, &executor_id, &run),
        &executor_info(&framework_id, &executor_id),
    )
    .unwrap();
    checkpoint(
        &layout.forked_pid_path(&slave_id, &framework_id, &executor_id, &run),
        &4242i32,
    )
    .unwrap();

    let update = StatusUpdate::new(
        framework_id.clone(),
        executor_id.clone(),
        task_id.clone(),
        TaskState::Running,
        1_000,
    );
    let mut log = UpdateLog::open(&layout.updates_path(
        &slave_id,
        &framework_id,
        &executor_id,
        &run,
        &task_id,
    ))
    .unwrap();
    log.append(&UpdateLogRecord::Update { update: update.clone() }).unwrap();

    let recovered = recover(&layout).unwrap().unwrap();
    assert_eq!(recovered.slave_id, slave_id);
    assert!(recovered.info.is_some());
    assert_eq!(recovered.frameworks.len(), 1);

    let fw = &recovered.frameworks[0];
    assert_eq!(fw.framework_id, framework_id);
    assert_eq!(fw.info.as_ref().map(|i| i.name.as_str()), Some("etl"));
    assert_eq!(fw.executors.len(), 1);

    let exec = &fw.executors[0];
    assert_eq!(exec.latest_run, Some(run.clone()));
    let current = exec.current_run().unwrap();
    assert_eq!(current.forked_pid, Some(4242));
    assert_eq!(current.registered_pid, None);
    assert_eq!(current.tasks.len(), 1);
    assert_eq!(
        current.tasks[0].records,
        vec![UpdateLogRecord::Update { update }]
    );
}

#[test]
fn damaged_records_degrade_to_absent() {
    let dir = tempdir().unwrap();
    let layout = Layout::new(dir.path());
    let slave_id = seed_slave(&layout);

    let framework_id = FrameworkId::new("fw-1");
    // framework dir exists but framework.info is garbage
    let info_path = layout.framework_info_path(&slave_id, &framework_id);
    std::fs::create_dir_all(info_path.parent().unwrap()).unwrap();
    std::fs::write(&info_path, b"not json").unwrap();

    let recovered = recover(&layout).unwrap().unwrap();
    assert_eq!(recovered.frameworks.len(), 1);
    assert_eq!(recovered.frameworks[0].info, None);
}

#[test]
fn latest_marker_is_not_treated_as_a_run() {
    let dir = tempdir().unwrap();
    let layout = Layout::new(dir.path());
    let slave_id = seed_slave(&layout);

    let framework_id = FrameworkId::new("fw-1");
    let executor_id = ExecutorId::new("e-1");
    let run = ContainerId::new("run-1");

    checkpoint(&layout.latest_run_path(&slave_id, &framework_id, &executor_id), &run).unwrap();
    checkpoint(
        &layout.executor_info_path(&slave_id, &framework_id, &executor_id, &run),
        &executor_info(&framework_id, &executor_id),
    )
    .unwrap();

    let recovered = recover(&layout).unwrap().unwrap();
    let runs = &recovered.frameworks[0].executors[0].runs;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].container_id, run);
}
