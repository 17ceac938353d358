// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task description and state machine.

use crate::id::TaskId;
use crate::info::{CommandInfo, ExecutorInfo};
use crate::resources::Resources;
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a task.
///
/// `Staging → Starting → Running → {Finished, Failed, Killed, Lost}`.
/// A task is `Staging` from the moment the master assigns it until the
/// executor acknowledges it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    #[serde(rename = "TASK_STAGING")]
    Staging,
    #[serde(rename = "TASK_STARTING")]
    Starting,
    #[serde(rename = "TASK_RUNNING")]
    Running,
    #[serde(rename = "TASK_FINISHED")]
    Finished,
    #[serde(rename = "TASK_FAILED")]
    Failed,
    #[serde(rename = "TASK_KILLED")]
    Killed,
    #[serde(rename = "TASK_LOST")]
    Lost,
}

impl TaskState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Killed | TaskState::Lost
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Staging => write!(f, "TASK_STAGING"),
            TaskState::Starting => write!(f, "TASK_STARTING"),
            TaskState::Running => write!(f, "TASK_RUNNING"),
            TaskState::Finished => write!(f, "TASK_FINISHED"),
            TaskState::Failed => write!(f, "TASK_FAILED"),
            TaskState::Killed => write!(f, "TASK_KILLED"),
            TaskState::Lost => write!(f, "TASK_LOST"),
        }
    }
}

/// A unit of work as described by the master.
///
/// Carries either an inline `command` (the agent synthesizes a command
/// executor for it) or an explicit `executor` to run under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub name: String,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorInfo>,
    /// Opaque payload handed to the executor on launch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
