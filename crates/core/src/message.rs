// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message enums exchanged with the master and with executor processes.
//!
//! Serializes with `{"type": "peer:name", ...fields}` format. Unknown
//! type tags on inbound enums deserialize to `Custom` so a newer peer
//! never wedges the agent.

use crate::id::{ExecutorId, FrameworkId, SlaveId, TaskId, UpdateId};
use crate::info::{FrameworkInfo, SlaveInfo};
use crate::resources::Resources;
use crate::task::{TaskInfo, TaskState};
use crate::update::StatusUpdate;
use serde::{Deserialize, Serialize};

/// Messages the agent receives from the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MasterMessage {
    /// First registration succeeded; carries the assigned agent ID.
    #[serde(rename = "master:registered")]
    Registered { slave_id: SlaveId },

    /// Re-registration succeeded.
    #[serde(rename = "master:reregistered")]
    Reregistered { slave_id: SlaveId },

    /// Assign a task to this agent.
    #[serde(rename = "master:run_task")]
    RunTask {
        framework_id: FrameworkId,
        framework: FrameworkInfo,
        /// Scheduler endpoint for direct framework-to-executor traffic.
        #[serde(default)]
        framework_pid: String,
        task: TaskInfo,
    },

    /// Kill a task previously assigned here.
    #[serde(rename = "master:kill_task")]
    KillTask { framework_id: FrameworkId, task_id: TaskId },

    /// Acknowledge a status update by echoing its uuid.
    #[serde(rename = "master:status_update_ack")]
    StatusUpdateAck {
        framework_id: FrameworkId,
        task_id: TaskId,
        uuid: UpdateId,
    },

    /// Tear down a framework and everything it is running here.
    #[serde(rename = "master:shutdown_framework")]
    ShutdownFramework { framework_id: FrameworkId },

    /// Opaque scheduler-to-executor payload to route through.
    #[serde(rename = "master:framework_message")]
    FrameworkMessage {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: String,
    },

    /// Liveness probe; answered with `SlaveMessage::Pong`.
    #[serde(rename = "master:ping")]
    Ping,

    /// Shut the whole agent down.
    #[serde(rename = "master:shutdown")]
    Shutdown,

    /// Catch-all for unknown message types (extensibility)
    #[serde(other, skip_serializing)]
    Custom,
}

/// Summary of a live executor, carried in re-registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSnapshot {
    pub executor_id: ExecutorId,
    pub framework_id: FrameworkId,
    #[serde(default)]
    pub resources: Resources,
}

/// Summary of a live task, carried in re-registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub framework_id: FrameworkId,
    pub executor_id: ExecutorId,
    pub state: TaskState,
    #[serde(default)]
    pub resources: Resources,
}

/// Messages the agent sends to the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SlaveMessage {
    /// Cold-start registration; the master assigns an agent ID.
    #[serde(rename = "slave:register")]
    Register { slave: SlaveInfo },

    /// Warm-start registration with the full executor/task inventory so
    /// the master can reconcile.
    #[serde(rename = "slave:reregister")]
    Reregister {
        slave: SlaveInfo,
        executors: Vec<ExecutorSnapshot>,
        tasks: Vec<TaskSnapshot>,
    },

    /// Clean departure.
    #[serde(rename = "slave:unregister")]
    Unregister { slave_id: SlaveId },

    /// Forward a task status update; retried until acknowledged.
    #[serde(rename = "slave:status_update")]
    StatusUpdate { update: StatusUpdate },

    /// Executor-to-scheduler payload routed via the master.
    #[serde(rename = "slave:framework_message")]
    FrameworkMessage {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: String,
    },

    /// Reply to `MasterMessage::Ping`.
    #[serde(rename = "slave:pong")]
    Pong,
}

/// Messages the agent receives from executor processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutorMessage {
    /// First message on a fresh executor connection.
    #[serde(rename = "executor:register")]
    Register {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
    },

    /// Reconnection after an agent restart, carrying the executor's view
    /// of its tasks and any unacknowledged updates for reconciliation.
    #[serde(rename = "executor:reregister")]
    Reregister {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        tasks: Vec<TaskSnapshot>,
        updates: Vec<StatusUpdate>,
    },

    /// Task state transition.
    #[serde(rename = "executor:status_update")]
    StatusUpdate { update: StatusUpdate },

    /// Executor-to-scheduler payload.
    #[serde(rename = "executor:framework_message")]
    FrameworkMessage {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: String,
    },

    /// Catch-all for unknown message types (extensibility)
    #[serde(other, skip_serializing)]
    Custom,
}

/// Messages the agent sends to executor processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutorCommand {
    /// Registration accepted.
    #[serde(rename = "agent:registered")]
    Registered {
        slave_id: SlaveId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
    },

    /// Reconnection accepted.
    #[serde(rename = "agent:reregistered")]
    Reregistered { slave_id: SlaveId },

    /// Dispatch a task to the executor.
    #[serde(rename = "agent:run_task")]
    RunTask { framework_id: FrameworkId, task: TaskInfo },

    /// Kill one task.
    #[serde(rename = "agent:kill_task")]
    KillTask { framework_id: FrameworkId, task_id: TaskId },

    /// The master acknowledged an update end-to-end.
    #[serde(rename = "agent:status_update_ack")]
    StatusUpdateAck { task_id: TaskId, uuid: UpdateId },

    /// Scheduler-to-executor payload.
    #[serde(rename = "agent:framework_message")]
    FrameworkMessage { data: String },

    /// Begin graceful shutdown; the agent escalates to the isolator after
    /// the grace period.
    #[serde(rename = "agent:shutdown")]
    Shutdown,
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
