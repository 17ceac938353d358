// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Checkpoint and sandbox directory layout under the agent work dir.
//!
//! ```text
//! <work_dir>/meta/slaves/latest                       (marker: current agent id)
//! <work_dir>/meta/slaves/<slave-id>/
//!   slave.info
//!   frameworks/<framework-id>/
//!     framework.info
//!     executors/<executor-id>/
//!       runs/latest                                   (marker: current run id)
//!       runs/<run-id>/
//!         executor.info
//!         pid                                         (registered endpoint)
//!         forked.pid                                  (OS process id)
//!         tasks/<task-id>/
//!           task.info
//!           updates                                   (framed append-only log)
//! <work_dir>/slaves/<slave-id>/frameworks/.../runs/<run-id>   (sandboxes)
//! ```

use dray_core::{ContainerId, ExecutorId, FrameworkId, SlaveId, TaskId};
use std::path::{Path, PathBuf};

/// Path builder rooted at the agent work dir.
#[derive(Debug, Clone)]
pub struct Layout {
    work_dir: PathBuf,
}

impl Layout {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self { work_dir: work_dir.into() }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.work_dir.join("meta")
    }

    /// Marker recording which slave directory is current.
    pub fn latest_slave_path(&self) -> PathBuf {
        self.meta_dir().join("slaves").join("latest")
    }

    pub fn slave_dir(&self, slave_id: &SlaveId) -> PathBuf {
        self.meta_dir().join("slaves").join(slave_id.as_str())
    }

    pub fn slave_info_path(&self, slave_id: &SlaveId) -> PathBuf {
        self.slave_dir(slave_id).join("slave.info")
    }

    pub fn framework_dir(&self, slave_id: &SlaveId, framework_id: &FrameworkId) -> PathBuf {
        self.slave_dir(slave_id)
            .join("frameworks")
            .join(framework_id.as_str())
    }

    pub fn framework_info_path(
        &self,
        slave_id: &SlaveId,
        framework_id: &FrameworkId,
    ) -> PathBuf {
        self.framework_dir(slave_id, framework_id).join("framework.info")
    }

    pub fn executor_dir(
        &self,
        slave_id: &SlaveId,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
    ) -> PathBuf {
        self.framework_dir(slave_id, framework_id)
            .join("executors")
            .join(executor_id.as_str())
    }

    /// Marker recording the current run of an executor.
    pub fn latest_run_path(
        &self,
        slave_id: &SlaveId,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
    ) -> PathBuf {
        self.executor_dir(slave_id, framework_id, executor_id)
            .join("runs")
            .join("latest")
    }

    pub fn run_dir(
        &self,
        slave_id: &SlaveId,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        container_id: &ContainerId,
    ) -> PathBuf {
        self.executor_dir(slave_id, framework_id, executor_id)
            .join("runs")
            .join(container_id.as_str())
    }

    pub fn executor_info_path(
        &self,
        slave_id: &SlaveId,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        container_id: &ContainerId,
    ) -> PathBuf {
        self.run_dir(slave_id, framework_id, executor_id, container_id)
            .join("executor.info")
    }

    /// Endpoint the executor registered from (recorded at registration).
    pub fn executor_pid_path(
        &self,
        slave_id: &SlaveId,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        container_id: &ContainerId,
    ) -> PathBuf {
        self.run_dir(slave_id, framework_id, executor_id, container_id)
            .join("pid")
    }

    /// OS process id of the launched executor (recorded at fork).
    pub fn forked_pid_path(
        &self,
        slave_id: &SlaveId,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        container_id: &ContainerId,
    ) -> PathBuf {
        self.run_dir(slave_id, framework_id, executor_id, container_id)
            .join("forked.pid")
    }

    pub fn task_dir(
        &self,
        slave_id: &SlaveId,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        container_id: &ContainerId,
        task_id: &TaskId,
    ) -> PathBuf {
        self.run_dir(slave_id, framework_id, executor_id, container_id)
            .join("tasks")
            .join(task_id.as_str())
    }

    pub fn task_info_path(
        &self,
        slave_id: &SlaveId,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        container_id: &ContainerId,
        task_id: &TaskId,
    ) -> PathBuf {
        self.task_dir(slave_id, framework_id, executor_id, container_id, task_id)
            .join("task.info")
    }

    pub fn updates_path(
        &self,
        slave_id: &SlaveId,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        container_id: &ContainerId,
        task_id: &TaskId,
    ) -> PathBuf {
        self.task_dir(slave_id, framework_id, executor_id, container_id, task_id)
            .join("updates")
    }

    /// Per-run sandbox directory (the executor's working directory).
    pub fn sandbox_dir(
        &self,
        slave_id: &SlaveId,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        container_id: &ContainerId,
    ) -> PathBuf {
        self.work_dir
            .join("slaves")
            .join(slave_id.as_str())
            .join("frameworks")
            .join(framework_id.as_str())
            .join("executors")
            .join(executor_id.as_str())
            .join("runs")
            .join(container_id.as_str())
    }
}

#[cfg(test)]
#[path = "layout_tests.rs"]
mod tests;
