// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer identifier type for tracking scheduled timers.
//!
//! TimerId uniquely identifies a timer instance used for scheduling delayed
//! actions such as retransmits, shutdown grace periods, or periodic checks.

use crate::id::{ExecutorId, FrameworkId, TaskId};

crate::define_id! {
    /// Unique identifier for a timer instance.
    pub struct TimerId;
}

impl TimerId {
    /// Timer ID for the master (re)registration retry backoff.
    pub fn registration_retry() -> Self {
        Self::new("registration")
    }

    /// Timer ID for the grace period between asking an executor to shut
    /// down and forcing it via the isolator.
    pub fn shutdown_grace(framework_id: &FrameworkId, executor_id: &ExecutorId) -> Self {
        Self::new(format!("shutdown-grace:{}:{}", framework_id, executor_id))
    }

    /// Timer ID bounding how long a recovered executor may take to
    /// re-register after an agent restart.
    pub fn reregister_deadline(framework_id: &FrameworkId, executor_id: &ExecutorId) -> Self {
        Self::new(format!("reregister:{}:{}", framework_id, executor_id))
    }

    /// Timer ID for retransmitting an unacknowledged status update.
    pub fn update_retry(framework_id: &FrameworkId, task_id: &TaskId) -> Self {
        Self::new(format!("update-retry:{}:{}", framework_id, task_id))
    }

    /// Timer ID for a framework's failover timeout after master loss.
    pub fn framework_failover(framework_id: &FrameworkId) -> Self {
        Self::new(format!("failover:{}", framework_id))
    }

    /// Timer ID for the periodic disk usage check.
    pub fn disk_watch() -> Self {
        Self::new("disk-watch")
    }

    pub fn is_registration_retry(&self) -> bool {
        self.0 == "registration"
    }

    pub fn is_disk_watch(&self) -> bool {
        self.0 == "disk-watch"
    }

    /// Parses `(framework_id, executor_id)` out of a shutdown-grace timer.
    pub fn as_shutdown_grace(&self) -> Option<(FrameworkId, ExecutorId)> {
        Self::split_pair(self.0.strip_prefix("shutdown-grace:")?)
            .map(|(f, e)| (FrameworkId::new(f), ExecutorId::new(e)))
    }

    /// Parses `(framework_id, executor_id)` out of a reregister-deadline timer.
    pub fn as_reregister_deadline(&self) -> Option<(FrameworkId, ExecutorId)> {
        Self::split_pair(self.0.strip_prefix("reregister:")?)
            .map(|(f, e)| (FrameworkId::new(f), ExecutorId::new(e)))
    }

    /// Parses `(framework_id, task_id)` out of an update-retry timer.
    pub fn as_update_retry(&self) -> Option<(FrameworkId, TaskId)> {
        Self::split_pair(self.0.strip_prefix("update-retry:")?)
            .map(|(f, t)| (FrameworkId::new(f), TaskId::new(t)))
    }

    /// Parses the framework ID out of a failover timer.
    pub fn as_framework_failover(&self) -> Option<FrameworkId> {
        self.0.strip_prefix("failover:").map(FrameworkId::new)
    }

    fn split_pair(rest: &str) -> Option<(&str, &str)> {
        rest.split_once(':')
    }
}

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;
