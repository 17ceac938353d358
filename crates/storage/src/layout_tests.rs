// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn layout() -> Layout {
    Layout::new("/var/lib/dray")
}

#[test]
fn updates_path_nests_under_run_and_task() {
    let path = layout().updates_path(
        &SlaveId::new("s1"),
        &FrameworkId::new("fw1"),
        &ExecutorId::new("e1"),
        &ContainerId::new("run1"),
        &TaskId::new("t1"),
    );
    assert_eq!(
        path,
        PathBuf::from(
            "/var/lib/dray/meta/slaves/s1/frameworks/fw1/executors/e1/runs/run1/tasks/t1/updates"
        )
    );
}

#[test]
fn sandbox_mirrors_meta_without_the_meta_prefix() {
    let l = layout();
    let slave = SlaveId::new("s1");
    let fw = FrameworkId::new("fw1");
    let exec = ExecutorId::new("e1");
    let run = ContainerId::new("run1");

    let sandbox = l.sandbox_dir(&slave, &fw, &exec, &run);
    assert_eq!(
        sandbox,
        PathBuf::from("/var/lib/dray/slaves/s1/frameworks/fw1/executors/e1/runs/run1")
    );
    assert!(!sandbox.starts_with(l.meta_dir()));
}

#[test]
fn latest_markers_sit_beside_their_entries() {
    let l = layout();
    assert_eq!(
        l.latest_slave_path(),
        PathBuf::from("/var/lib/dray/meta/slaves/latest")
    );
    let latest_run = l.latest_run_path(
        &SlaveId::new("s1"),
        &FrameworkId::new("fw1"),
        &ExecutorId::new("e1"),
    );
    assert_eq!(
        latest_run,
        PathBuf::from("/var/lib/dray/meta/slaves/s1/frameworks/fw1/executors/e1/runs/latest")
    );
}
