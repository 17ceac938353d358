// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Isolator: launches, constrains, and destroys executor processes.
//!
//! The agent holds any isolator behind the [`Isolator`] capability set
//! {launch, update, usage, destroy, recover} and never learns the
//! concrete runtime. [`PosixIsolator`] is the plain-process variant;
//! container-backed variants plug in behind the same trait.

use crate::event::AgentEvent;
use async_trait::async_trait;
use dray_core::{ContainerId, ExecutorId, ExecutorInfo, FrameworkId, Resources};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Errors surfaced by isolator implementations
#[derive(Debug, Error)]
pub enum IsolatorError {
    /// The executor process could not be started. Fatal for that
    /// executor: the agent synthesizes TASK_FAILED for its tasks.
    #[error("launch failed: {0}")]
    LaunchFailed(String),
    /// Forced termination failed. Logged by callers; the reaper remains
    /// the authority on the actual exit.
    #[error("destroy failed: {0}")]
    DestroyFailed(String),
}

/// Everything needed to start one executor run.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub framework_id: FrameworkId,
    pub executor: ExecutorInfo,
    pub container_id: ContainerId,
    /// Prepared sandbox directory; becomes the working directory.
    pub sandbox: PathBuf,
    pub env: Vec<(String, String)>,
    pub resources: Resources,
}

/// Result of a successful launch.
#[derive(Debug, Clone, Copy)]
pub struct Launched {
    pub pid: i32,
}

/// A run re-attached during agent recovery.
#[derive(Debug, Clone)]
pub struct RecoveredProcess {
    pub framework_id: FrameworkId,
    pub executor_id: ExecutorId,
    pub pid: Option<i32>,
}

/// Point-in-time usage of one executor, for monitoring.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ResourceStatistics {
    pub timestamp_ms: u64,
    pub cpus_limit: f64,
    pub mem_limit_mb: u64,
    pub mem_rss_mb: u64,
}

/// Capability set the agent requires from any executor runtime.
#[async_trait]
pub trait Isolator: Send + Sync + 'static {
    /// Start an executor in its sandbox with resource limits applied.
    /// Termination is reported through the agent event channel as
    /// [`AgentEvent::ProcessExited`].
    async fn launch(&self, config: LaunchConfig) -> Result<Launched, IsolatorError>;

    /// Change the applied resource limits.
    async fn update(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        resources: Resources,
    ) -> Result<(), IsolatorError>;

    /// Current usage for monitoring.
    async fn usage(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
    ) -> Result<ResourceStatistics, IsolatorError>;

    /// Forcibly terminate. Idempotent: destroying an unknown or
    /// already-dead executor succeeds.
    async fn destroy(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
    ) -> Result<(), IsolatorError>;

    /// Re-attach to still-running executors after an agent restart.
    async fn recover(&self, processes: Vec<RecoveredProcess>) -> Result<(), IsolatorError>;
}

#[derive(Debug, Clone, Copy)]
struct ProcEntry {
    pid: i32,
    resources: Resources,
}

type ProcKey = (FrameworkId, ExecutorId);

/// Plain-process isolator: executors run as direct children in their own
/// process group, stdout/stderr captured into the sandbox.
pub struct PosixIsolator {
    processes: Arc<Mutex<HashMap<ProcKey, ProcEntry>>>,
    event_tx: mpsc::Sender<AgentEvent>,
}

impl PosixIsolator {
    pub fn new(event_tx: mpsc::Sender<AgentEvent>) -> Self {
        Self { processes: Arc::new(Mutex::new(HashMap::new())), event_tx }
    }
}

#[async_trait]
impl Isolator for PosixIsolator {
    async fn launch(&self, config: LaunchConfig) -> Result<Launched, IsolatorError> {
        tokio::fs::create_dir_all(&config.sandbox)
            .await
            .map_err(|e| IsolatorError::LaunchFailed(format!("sandbox creation: {e}")))?;

        let stdout = std::fs::File::create(config.sandbox.join("stdout"))
            .map_err(|e| IsolatorError::LaunchFailed(format!("stdout capture: {e}")))?;
        let stderr = std::fs::File::create(config.sandbox.join("stderr"))
            .map_err(|e| IsolatorError::LaunchFailed(format!("stderr capture: {e}")))?;

        let mut command = tokio::process::Command::new("sh");
        command
            .arg("-c")
            .arg(&config.executor.command.value)
            .current_dir(&config.sandbox)
            .envs(config.executor.command.env.clone())
            .envs(config.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| IsolatorError::LaunchFailed(e.to_string()))?;
        let pid = match child.id() {
            Some(pid) => pid as i32,
            None => return Err(IsolatorError::LaunchFailed("child exited at spawn".into())),
        };

        info!(
            framework_id = %config.framework_id,
            executor_id = %config.executor.executor_id,
            run = %config.container_id,
            pid,
            "launched executor"
        );

        self.processes.lock().insert(
            (config.framework_id.clone(), config.executor.executor_id.clone()),
            ProcEntry { pid, resources: config.resources },
        );

        // Observe termination without blocking the caller. The reaper
        // also watches this pid; the agent dedups by executor state.
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            use std::os::unix::process::ExitStatusExt;
            let status = match child.wait().await {
                // Signal deaths encoded shell-style, matching the reaper.
                Ok(status) => status.code().or_else(|| status.signal().map(|s| 128 + s)),
                Err(e) => {
                    warn!(pid, error = %e, "waiting on executor child failed");
                    None
                }
            };
            let _ = event_tx.send(AgentEvent::ProcessExited { pid, status }).await;
        });

        Ok(Launched { pid })
    }

    async fn update(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        resources: Resources,
    ) -> Result<(), IsolatorError> {
        let mut processes = self.processes.lock();
        if let Some(entry) = processes.get_mut(&(framework_id.clone(), executor_id.clone())) {
            // Plain processes have no enforceable limits; remember the
            // allocation so usage() reports the right limits.
            entry.resources = resources;
        }
        Ok(())
    }

    async fn usage(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
    ) -> Result<ResourceStatistics, IsolatorError> {
        let entry = self
            .processes
            .lock()
            .get(&(framework_id.clone(), executor_id.clone()))
            .copied();

        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let Some(entry) = entry else {
            return Ok(ResourceStatistics { timestamp_ms, ..Default::default() });
        };

        Ok(ResourceStatistics {
            timestamp_ms,
            cpus_limit: entry.resources.cpus,
            mem_limit_mb: entry.resources.mem_mb,
            mem_rss_mb: rss_mb(entry.pid).unwrap_or(0),
        })
    }

    async fn destroy(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
    ) -> Result<(), IsolatorError> {
        let entry = self
            .processes
            .lock()
            .remove(&(framework_id.clone(), executor_id.clone()));

        let Some(entry) = entry else {
            debug!(%framework_id, %executor_id, "destroy of unknown executor (already gone)");
            return Ok(());
        };

        info!(%framework_id, %executor_id, pid = entry.pid, "destroying executor");

        // Kill the whole process group; ESRCH means it already exited.
        match kill(Pid::from_raw(-entry.pid), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(IsolatorError::DestroyFailed(format!("pid {}: {e}", entry.pid))),
        }
    }

    async fn recover(&self, processes: Vec<RecoveredProcess>) -> Result<(), IsolatorError> {
        let mut map = self.processes.lock();
        for recovered in processes {
            let Some(pid) = recovered.pid else {
                continue;
            };
            debug!(
                framework_id = %recovered.framework_id,
                executor_id = %recovered.executor_id,
                pid,
                "re-attached to recovered executor"
            );
            map.insert(
                (recovered.framework_id, recovered.executor_id),
                ProcEntry { pid, resources: Resources::default() },
            );
        }
        Ok(())
    }
}

/// Resident set size of a process in megabytes, via procfs.
fn rss_mb(pid: i32) -> Option<u64> {
    let statm = std::fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = 4096u64; // universal on the platforms we run on
    Some(resident_pages * page_size / (1024 * 1024))
}

#[cfg(test)]
#[path = "isolator_tests.rs"]
mod tests;
