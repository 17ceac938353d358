// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dray-engine: the supervision machinery of the node agent.
//!
//! Components here are cooperative actors (tokio tasks with mpsc
//! mailboxes) or plain state machines driven by the daemon's event loop:
//! the process reaper, the isolator seam with its posix implementation,
//! the framework/executor/task registry, the at-least-once status-update
//! manager, the timer scheduler, and the sandbox garbage collector.

pub mod event;
pub mod gc;
pub mod isolator;
pub mod master;
pub mod reaper;
pub mod registry;
pub mod scheduler;
pub mod status_update;

pub use event::{AgentEvent, ExecutorConn};
pub use gc::{permitted_sandbox_age, DeferredGc, Gc};
pub use isolator::{
    Isolator, IsolatorError, LaunchConfig, Launched, PosixIsolator, RecoveredProcess,
    ResourceStatistics,
};
pub use master::{MasterLink, NoMaster};
pub use reaper::{ProcessExit, Reaper, REAP_INTERVAL};
pub use registry::{
    command_executor, Executor, Framework, Registry, Stats, Task,
    MAX_COMPLETED_EXECUTORS_PER_FRAMEWORK, MAX_COMPLETED_FRAMEWORKS,
    MAX_COMPLETED_TASKS_PER_EXECUTOR,
};
pub use scheduler::Scheduler;
pub use status_update::{
    RecoveredStream, TerminatedTask, UpdateManager, UpdateManagerConfig, UpdateManagerHandle,
};
