// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recovery walk over the checkpoint tree.
//!
//! Rebuilds the durable view of frameworks, executors, runs, and task
//! update streams. Missing or damaged records degrade to absent fields;
//! only hard IO errors propagate (the caller decides whether those are
//! fatal via its `strict` policy).

use dray_core::{
    ContainerId, ExecutorId, ExecutorInfo, FrameworkId, FrameworkInfo, SlaveId, SlaveInfo, TaskId,
    TaskInfo,
};
use std::io;
use std::path::Path;
use tracing::{info, warn};

use crate::layout::Layout;
use crate::record::{read_record, StorageError};
use crate::update_log::{UpdateLog, UpdateLogRecord};

/// Durable state of one task stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredTask {
    pub task_id: TaskId,
    pub info: Option<TaskInfo>,
    /// Where the stream's updates log lives (for re-opening on append).
    pub log_path: std::path::PathBuf,
    /// Replayed update log, in append order.
    pub records: Vec<UpdateLogRecord>,
}

/// Durable state of one executor run.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredRun {
    pub container_id: ContainerId,
    pub info: Option<ExecutorInfo>,
    /// OS pid recorded at fork, if the launch got that far.
    pub forked_pid: Option<i32>,
    /// Endpoint recorded at executor registration.
    pub registered_pid: Option<String>,
    pub tasks: Vec<RecoveredTask>,
}

/// Durable state of one executor: its runs plus which run was current.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredExecutor {
    pub executor_id: ExecutorId,
    pub latest_run: Option<ContainerId>,
    pub runs: Vec<RecoveredRun>,
}

impl RecoveredExecutor {
    /// The run the agent was driving when it stopped.
    pub fn current_run(&self) -> Option<&RecoveredRun> {
        let latest = self.latest_run.as_ref()?;
        self.runs.iter().find(|r| &r.container_id == latest)
    }
}

/// Durable state of one framework.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredFramework {
    pub framework_id: FrameworkId,
    pub info: Option<FrameworkInfo>,
    pub executors: Vec<RecoveredExecutor>,
}

/// Everything the checkpoint tree knows about this agent.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredSlave {
    pub slave_id: SlaveId,
    pub info: Option<SlaveInfo>,
    pub frameworks: Vec<RecoveredFramework>,
}

/// Recover the checkpoint tree under `layout`, or `None` on a cold start.
pub fn recover(layout: &Layout) -> Result<Option<RecoveredSlave>, StorageError> {
    let slave_id: SlaveId = match read_record(&layout.latest_slave_path())? {
        Some(id) => id,
        None => {
            info!("no checkpointed agent id, cold start");
            return Ok(None);
        }
    };

    let info: Option<SlaveInfo> = read_record(&layout.slave_info_path(&slave_id))?;
    if info.is_none() {
        warn!(slave_id = %slave_id, "agent id checkpointed but slave.info missing");
    }

    let mut frameworks = Vec::new();
    let frameworks_dir = layout.slave_dir(&slave_id).join("frameworks");
    for framework_id in subdirs(&frameworks_dir)? {
        let framework_id = FrameworkId::new(framework_id);
        frameworks.push(recover_framework(layout, &slave_id, framework_id)?);
    }

    info!(
        slave_id = %slave_id,
        frameworks = frameworks.len(),
        "recovered checkpoint tree"
    );

    Ok(Some(RecoveredSlave { slave_id, info, frameworks }))
}

fn recover_framework(
    layout: &Layout,
    slave_id: &SlaveId,
    framework_id: FrameworkId,
) -> Result<RecoveredFramework, StorageError> {
    let info: Option<FrameworkInfo> =
        read_record(&layout.framework_info_path(slave_id, &framework_id))?;

    let mut executors = Vec::new();
    let executors_dir = layout.framework_dir(slave_id, &framework_id).join("executors");
    for executor_id in subdirs(&executors_dir)? {
        let executor_id = ExecutorId::new(executor_id);
        executors.push(recover_executor(layout, slave_id, &framework_id, executor_id)?);
    }

    Ok(RecoveredFramework { framework_id, info, executors })
}

fn recover_executor(
    layout: &Layout,
    slave_id: &SlaveId,
    framework_id: &FrameworkId,
    executor_id: ExecutorId,
) -> Result<RecoveredExecutor, StorageError> {
    let latest_run: Option<ContainerId> =
        read_record(&layout.latest_run_path(slave_id, framework_id, &executor_id))?;

    let mut runs = Vec::new();
    let runs_dir = layout
        .executor_dir(slave_id, framework_id, &executor_id)
        .join("runs");
    for run_name in subdirs(&runs_dir)? {
        let container_id = ContainerId::new(run_name);
        runs.push(recover_run(layout, slave_id, framework_id, &executor_id, container_id)?);
    }

    Ok(RecoveredExecutor { executor_id, latest_run, runs })
}

fn recover_run(
    layout: &Layout,
    slave_id: &SlaveId,
    framework_id: &FrameworkId,
    executor_id: &ExecutorId,
    container_id: ContainerId,
) -> Result<RecoveredRun, StorageError> {
    let info: Option<ExecutorInfo> =
        read_record(&layout.executor_info_path(slave_id, framework_id, executor_id, &container_id))?;
    let forked_pid: Option<i32> =
        read_record(&layout.forked_pid_path(slave_id, framework_id, executor_id, &container_id))?;
    let registered_pid: Option<String> =
        read_record(&layout.executor_pid_path(slave_id, framework_id, executor_id, &container_id))?;

    let mut tasks = Vec::new();
    let tasks_dir = layout
        .run_dir(slave_id, framework_id, executor_id, &container_id)
        .join("tasks");
    for task_name in subdirs(&tasks_dir)? {
        let task_id = TaskId::new(task_name);
        let info: Option<TaskInfo> = read_record(&layout.task_info_path(
            slave_id,
            framework_id,
            executor_id,
            &container_id,
            &task_id,
        ))?;
        let log_path =
            layout.updates_path(slave_id, framework_id, executor_id, &container_id, &task_id);
        let records = UpdateLog::replay(&log_path)?;
        tasks.push(RecoveredTask { task_id, info, log_path, records });
    }

    Ok(RecoveredRun { container_id, info, forked_pid, registered_pid, tasks })
}

/// Names of subdirectories, skipping marker files like `latest`.
fn subdirs(dir: &Path) -> Result<Vec<String>, StorageError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(StorageError::Io { path: dir.to_owned(), source: e });
        }
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::Io { path: dir.to_owned(), source: e })?;
        let is_dir = entry
            .file_type()
            .map_err(|e| StorageError::Io { path: entry.path(), source: e })?
            .is_dir();
        if !is_dir {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(name) => {
                warn!(dir = %dir.display(), ?name, "skipping non-UTF-8 directory entry");
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
#[path = "recover_tests.rs"]
mod tests;
