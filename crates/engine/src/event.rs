// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events delivered to the agent actor's mailbox.
//!
//! Every collaborator — master link reader, executor listener, reaper,
//! isolator, status-update manager — communicates with the agent by
//! enqueueing one of these. The agent processes them strictly in order.

use dray_core::{ExecutorCommand, ExecutorMessage, FrameworkId, MasterMessage, TaskId, UpdateId};
use tokio::sync::mpsc;

/// Outbound side of one executor connection.
///
/// The listener spawns a writer task per connection; this handle enqueues
/// commands for it. Sends never block the agent: a full or closed queue
/// drops the command with a log line (the reaper remains the authority on
/// executor liveness).
#[derive(Debug, Clone)]
pub struct ExecutorConn {
    tx: mpsc::Sender<ExecutorCommand>,
}

impl ExecutorConn {
    pub fn new(tx: mpsc::Sender<ExecutorCommand>) -> Self {
        Self { tx }
    }

    pub fn send(&self, command: ExecutorCommand) {
        if let Err(e) = self.tx.try_send(command) {
            tracing::warn!(error = %e, "dropping command to executor (connection gone or backed up)");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Events that drive the agent actor.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A message arrived from the master.
    Master(MasterMessage),

    /// The master-detection collaborator found a (new) master.
    MasterDetected { master: String },

    /// Contact with the master was lost.
    MasterLost,

    /// A message arrived from an executor connection; `conn` is the way
    /// back to that executor.
    Executor {
        conn: ExecutorConn,
        message: ExecutorMessage,
    },

    /// A monitored process is gone (reaper or isolator observation).
    /// `status` is the exit code when known, `None` for reparented
    /// processes whose status is unobservable.
    ProcessExited { pid: i32, status: Option<i32> },

    /// The status-update manager completed an end-to-end acknowledgement.
    UpdateAcked {
        framework_id: FrameworkId,
        task_id: TaskId,
        uuid: UpdateId,
        /// The acked update was terminal; the stream is now closed.
        terminal: bool,
    },

    /// The status-update manager failed to persist a record.
    CheckpointFailed { message: String },
}
