// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Status updates: durably-logged task state transitions.

use crate::id::{ExecutorId, FrameworkId, TaskId, UpdateId};
use crate::task::TaskState;
use serde::{Deserialize, Serialize};

/// One task-state transition, uniquely identified by `uuid`.
///
/// Updates for the same task are totally ordered by creation time and
/// delivered to the master in that order; the master acknowledges by
/// echoing the uuid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub framework_id: FrameworkId,
    pub executor_id: ExecutorId,
    pub task_id: TaskId,
    pub state: TaskState,
    pub timestamp_ms: u64,
    pub uuid: UpdateId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Opaque framework-defined payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl StatusUpdate {
    pub fn new(
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        task_id: TaskId,
        state: TaskState,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            framework_id,
            executor_id,
            task_id,
            state,
            timestamp_ms,
            uuid: UpdateId::generate(),
            message: None,
            data: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
#[path = "update_tests.rs"]
mod tests;
