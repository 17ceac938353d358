// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent actor: single-threaded event handler sequencing messages
//! from the master, executors, the reaper, the isolator, the
//! status-update manager, and timers.
//!
//! Handlers run to completion; anything that must wait (master acks,
//! executor exits, grace periods) is expressed as a timer or a later
//! event, never a blocking wait.

mod executor_handlers;
mod master_handlers;
mod recovery;

use crate::config::Config;
use dray_core::{
    Clock, ContainerId, ExecutorCommand, ExecutorId, FrameworkId, SlaveId, SlaveInfo,
    SlaveMessage, StatusUpdate, TaskId, TaskState, TimerId, UpdateId,
};
use dray_engine::{
    permitted_sandbox_age, AgentEvent, Gc, Isolator, MasterLink, Reaper, Registry, Scheduler,
    TerminatedTask, UpdateManagerHandle,
};
use dray_storage::{Layout, StorageError};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// First (re)registration retry delay; doubles up to the cap.
const REGISTRATION_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const REGISTRATION_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Errors that stop the agent (only raised under `strict`).
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] StorageError),
    #[error("recovery error: {0}")]
    Recovery(String),
}

/// Registration state toward the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Registering,
    Reregistering,
    Registered,
}

/// Collaborators handed to the agent at startup.
pub struct AgentDeps<I, M, G, C> {
    pub isolator: I,
    pub master: M,
    pub gc: G,
    pub clock: C,
    pub reaper: Reaper,
    pub updates: UpdateManagerHandle,
}

/// The agent actor. Owns the registry and all lifecycle decisions.
pub struct Agent<I, M, G, C: Clock> {
    config: Config,
    layout: Layout,
    isolator: I,
    master: M,
    gc: G,
    clock: C,
    reaper: Reaper,
    updates: UpdateManagerHandle,
    info: SlaveInfo,
    slave_id: Option<SlaveId>,
    connection: ConnectionState,
    registry: Registry,
    scheduler: Scheduler,
    registration_backoff: Duration,
    /// Recovery resolved; new tasks are accepted.
    recovered: bool,
    gc_scheduled: HashSet<PathBuf>,
    event_rx: mpsc::Receiver<AgentEvent>,
}

impl<I, M, G, C> Agent<I, M, G, C>
where
    I: Isolator,
    M: MasterLink,
    G: Gc,
    C: Clock,
{
    pub fn new(config: Config, deps: AgentDeps<I, M, G, C>, event_rx: mpsc::Receiver<AgentEvent>) -> Self {
        let layout = Layout::new(config.work_dir.clone());
        let info = SlaveInfo::new(config.hostname.clone(), config.resources);
        Self {
            config,
            layout,
            isolator: deps.isolator,
            master: deps.master,
            gc: deps.gc,
            clock: deps.clock,
            reaper: deps.reaper,
            updates: deps.updates,
            info,
            slave_id: None,
            connection: ConnectionState::Disconnected,
            registry: Registry::new(),
            scheduler: Scheduler::new(),
            registration_backoff: REGISTRATION_BACKOFF_INITIAL,
            recovered: false,
            gc_scheduled: HashSet::new(),
            event_rx,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn slave_id(&self) -> Option<&SlaveId> {
        self.slave_id.as_ref()
    }

    /// Run recovery, then process events until shutdown.
    pub async fn run(mut self) -> Result<(), AgentError> {
        self.recover().await?;
        self.scheduler.set_timer(
            &TimerId::disk_watch(),
            self.config.disk_watch_interval,
            self.clock.now(),
        );

        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .map_err(|e| AgentError::Recovery(format!("signal handler: {e}")))?;
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .map_err(|e| AgentError::Recovery(format!("signal handler: {e}")))?;

        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // The mailbox moves out of self so the select arms can borrow
        // the agent for their handlers.
        let (_closed_tx, closed_rx) = mpsc::channel(1);
        let mut event_rx = std::mem::replace(&mut self.event_rx, closed_rx);

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await?,
                        None => {
                            info!("event channel closed, stopping");
                            break;
                        }
                    }
                }
                _ = tick.tick() => {
                    self.handle_timers().await?;
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, stopping");
                    break;
                }
                _ = sigint.recv() => {
                    info!("received SIGINT, stopping");
                    break;
                }
            }
        }

        // Checkpointed executors keep running; a restart reconnects to
        // them. Tell the master we are going away cleanly.
        if let Some(slave_id) = &self.slave_id {
            self.master.send(SlaveMessage::Unregister { slave_id: slave_id.clone() });
        }
        Ok(())
    }

    /// Drain one pending mailbox event without blocking. Returns whether
    /// an event was processed.
    pub async fn step(&mut self) -> Result<bool, AgentError> {
        match self.event_rx.try_recv() {
            Ok(event) => {
                self.handle_event(event).await?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Dispatch one mailbox event.
    pub async fn handle_event(&mut self, event: AgentEvent) -> Result<(), AgentError> {
        match event {
            AgentEvent::Master(message) => self.handle_master_message(message).await,
            AgentEvent::MasterDetected { master } => {
                self.handle_master_detected(&master);
                Ok(())
            }
            AgentEvent::MasterLost => {
                self.handle_master_lost();
                Ok(())
            }
            AgentEvent::Executor { conn, message } => {
                self.handle_executor_message(conn, message).await
            }
            AgentEvent::ProcessExited { pid, status } => {
                self.handle_process_exited(pid, status).await
            }
            AgentEvent::UpdateAcked { framework_id, task_id, uuid, terminal } => {
                self.handle_update_acked(framework_id, task_id, uuid, terminal);
                Ok(())
            }
            AgentEvent::CheckpointFailed { message } => {
                if self.config.strict {
                    Err(AgentError::Recovery(format!("checkpoint failed: {message}")))
                } else {
                    warn!(message, "checkpoint failure, continuing best-effort");
                    Ok(())
                }
            }
        }
    }

    /// Drain and dispatch fired timers.
    pub async fn handle_timers(&mut self) -> Result<(), AgentError> {
        let fired = self.scheduler.fired_timers(self.clock.now());
        for timer in fired {
            if timer.is_registration_retry() {
                self.handle_registration_retry();
            } else if timer.is_disk_watch() {
                self.handle_disk_watch();
            } else if let Some((framework_id, executor_id)) = timer.as_shutdown_grace() {
                // Phase 2: the grace period ran out.
                info!(%framework_id, %executor_id, "shutdown grace expired, destroying executor");
                if let Err(e) = self.isolator.destroy(&framework_id, &executor_id).await {
                    warn!(%framework_id, %executor_id, error = %e, "destroy failed; reaper remains authoritative");
                }
            } else if let Some((framework_id, executor_id)) = timer.as_reregister_deadline() {
                info!(
                    %framework_id,
                    %executor_id,
                    "recovered executor did not re-register in time, shutting it down"
                );
                self.shutdown_executor(&framework_id, &executor_id).await;
            } else if let Some(framework_id) = timer.as_framework_failover() {
                info!(%framework_id, "framework failover timeout elapsed, shutting framework down");
                self.shutdown_framework(&framework_id).await;
            }
        }
        Ok(())
    }

    // --- registration state machine -------------------------------------

    fn handle_master_detected(&mut self, master: &str) {
        if !self.recovered {
            // Registration starts only after recovery settles; the link
            // will redeliver detection on reconnect, and the retry timer
            // covers the gap.
            debug!(master, "master detected before recovery settled");
        }
        self.connection = if self.slave_id.is_some() {
            ConnectionState::Reregistering
        } else {
            ConnectionState::Registering
        };
        info!(master, state = ?self.connection, "master detected, registering");
        self.registration_backoff = REGISTRATION_BACKOFF_INITIAL;
        self.send_registration();
        self.scheduler.set_timer(
            &TimerId::registration_retry(),
            self.registration_backoff,
            self.clock.now(),
        );
    }

    fn handle_master_lost(&mut self) {
        info!("master lost; executors continue, updates keep retrying");
        self.connection = ConnectionState::Disconnected;
        self.scheduler.cancel_timer(&TimerId::registration_retry());

        // Arm failover timers; frameworks that never hear from their
        // scheduler again are torn down.
        let now = self.clock.now();
        for framework in self.registry.frameworks() {
            let timeout_ms = framework.info.failover_timeout_ms;
            if timeout_ms > 0 {
                self.scheduler.set_timer(
                    &TimerId::framework_failover(&framework.framework_id),
                    Duration::from_millis(timeout_ms),
                    now,
                );
            }
        }
    }

    fn handle_registration_retry(&mut self) {
        if !matches!(
            self.connection,
            ConnectionState::Registering | ConnectionState::Reregistering
        ) {
            return;
        }
        self.registration_backoff =
            (self.registration_backoff * 2).min(REGISTRATION_BACKOFF_MAX);
        info!(
            state = ?self.connection,
            next_retry_secs = self.registration_backoff.as_secs(),
            "retrying master registration"
        );
        self.send_registration();
        self.scheduler.set_timer(
            &TimerId::registration_retry(),
            self.registration_backoff,
            self.clock.now(),
        );
    }

    fn send_registration(&self) {
        match self.connection {
            ConnectionState::Registering => {
                self.master.send(SlaveMessage::Register { slave: self.info.clone() });
            }
            ConnectionState::Reregistering => {
                self.master.send(SlaveMessage::Reregister {
                    slave: self.info.clone(),
                    executors: self.registry.executor_snapshots(),
                    tasks: self.registry.task_snapshots(),
                });
            }
            _ => {}
        }
    }

    // --- shared lifecycle paths -----------------------------------------

    /// Phase 1 of executor shutdown: ask nicely, arm the grace timer.
    pub(crate) async fn shutdown_executor(
        &mut self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
    ) {
        let Some(executor) = self.registry.executor_mut(framework_id, executor_id) else {
            return;
        };
        if executor.shutting_down {
            return;
        }
        executor.shutting_down = true;

        match &executor.conn {
            Some(conn) => {
                info!(%framework_id, %executor_id, "asking executor to shut down");
                conn.send(ExecutorCommand::Shutdown);
                self.scheduler.set_timer(
                    &TimerId::shutdown_grace(framework_id, executor_id),
                    self.config.executor_shutdown_grace,
                    self.clock.now(),
                );
            }
            None => {
                // Never registered: nothing to ask, force it.
                info!(%framework_id, %executor_id, "destroying unregistered executor");
                if let Err(e) = self.isolator.destroy(framework_id, executor_id).await {
                    warn!(%framework_id, %executor_id, error = %e, "destroy failed");
                }
            }
        }
    }

    pub(crate) async fn shutdown_framework(&mut self, framework_id: &FrameworkId) {
        let Some(framework) = self.registry.framework_mut(framework_id) else {
            warn!(%framework_id, "shutdown for unknown framework");
            return;
        };
        info!(%framework_id, "shutting down framework");
        framework.shutting_down = true;
        self.scheduler.cancel_timer(&TimerId::framework_failover(framework_id));

        let executor_ids: Vec<ExecutorId> = framework.executors.keys().cloned().collect();
        for executor_id in &executor_ids {
            self.shutdown_executor(framework_id, executor_id).await;
        }
        self.try_remove_framework(framework_id);
    }

    /// Reaper or isolator observed the executor's process exit.
    async fn handle_process_exited(
        &mut self,
        pid: i32,
        status: Option<i32>,
    ) -> Result<(), AgentError> {
        let Some((framework_id, executor_id)) = self.registry.find_by_pid(pid) else {
            // Already finalized via the other observation path.
            debug!(pid, "exit for unknown pid");
            return Ok(());
        };
        info!(%framework_id, %executor_id, pid, ?status, "executor terminated");
        self.executor_terminated(&framework_id, &executor_id, status).await;
        Ok(())
    }

    /// Finalize a terminated executor: reconcile its tasks, retire the
    /// record, hand stragglers to the status-update manager.
    pub(crate) async fn executor_terminated(
        &mut self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        exit_status: Option<i32>,
    ) {
        self.scheduler
            .cancel_timer(&TimerId::shutdown_grace(framework_id, executor_id));
        self.scheduler
            .cancel_timer(&TimerId::reregister_deadline(framework_id, executor_id));

        let slave_id = match &self.slave_id {
            Some(id) => id.clone(),
            None => {
                warn!(%framework_id, %executor_id, "executor terminated before agent had an id");
                return;
            }
        };
        let Some(framework) = self.registry.framework_mut(framework_id) else {
            return;
        };
        let Some(executor) = framework.executor_mut(executor_id) else {
            return;
        };
        let container_id = executor.container_id.clone();

        // Any executor exit fails its unfinished tasks; the exact state
        // is cross-checked with the final status update if one arrived.
        let state = match exit_status {
            Some(code) if code != 0 => TaskState::Failed,
            _ => TaskState::Lost,
        };
        let orphaned = executor.terminate_all_tasks(state);
        let terminated: Vec<TerminatedTask> = orphaned
            .into_iter()
            .map(|task_id| TerminatedTask {
                log_path: self.layout.updates_path(
                    &slave_id,
                    framework_id,
                    executor_id,
                    &container_id,
                    &task_id,
                ),
                task_id,
            })
            .collect();

        let now_ms = self.clock.epoch_ms();
        framework.destroy_executor(executor_id, now_ms);

        self.updates
            .executor_terminated(
                framework_id.clone(),
                executor_id.clone(),
                terminated,
                exit_status,
            )
            .await;

        if let Err(e) = self.isolator.destroy(framework_id, executor_id).await {
            debug!(%framework_id, %executor_id, error = %e, "post-exit destroy failed");
        }

        self.try_remove_framework(framework_id);
    }

    /// The manager finished an end-to-end acknowledgement: relay it to
    /// the executor and, on terminal acks, see whether the framework can
    /// be retired.
    fn handle_update_acked(
        &mut self,
        framework_id: FrameworkId,
        task_id: TaskId,
        uuid: UpdateId,
        terminal: bool,
    ) {
        if let Some(framework) = self.registry.framework(&framework_id) {
            if let Some(executor) = framework.executor_for_task(&task_id) {
                if let Some(conn) = &executor.conn {
                    conn.send(ExecutorCommand::StatusUpdateAck { task_id: task_id.clone(), uuid });
                }
            }
        }
        if terminal {
            self.try_remove_framework(&framework_id);
        }
    }

    /// A framework with its shutdown flag set and no live executors is
    /// removed into the completed ring.
    pub(crate) fn try_remove_framework(&mut self, framework_id: &FrameworkId) {
        let eligible = self
            .registry
            .framework(framework_id)
            .is_some_and(|f| f.shutting_down && f.is_idle());
        if eligible {
            info!(%framework_id, "framework complete, removing");
            self.registry.remove_framework(framework_id);
        }
    }

    // --- disk usage control loop ----------------------------------------

    fn handle_disk_watch(&mut self) {
        let usage = disk_usage(&self.config.work_dir).unwrap_or(0.0);
        let permitted = permitted_sandbox_age(self.config.gc_delay, usage);
        let now_ms = self.clock.epoch_ms();

        let mut expired: Vec<PathBuf> = Vec::new();
        let completed = self
            .registry
            .frameworks()
            .flat_map(|f| f.completed_executors.iter())
            .chain(
                self.registry
                    .completed_frameworks()
                    .flat_map(|f| f.completed_executors.iter()),
            );
        for executor in completed {
            let Some(terminated_at) = executor.terminated_at_ms else {
                continue;
            };
            let age_ms = now_ms.saturating_sub(terminated_at);
            if age_ms >= permitted.as_millis() as u64 {
                expired.push(executor.sandbox.clone());
            }
        }

        for sandbox in expired {
            if self.gc_scheduled.insert(sandbox.clone()) {
                debug!(path = %sandbox.display(), usage, "scheduling expired sandbox for deletion");
                self.gc.schedule(Duration::ZERO, sandbox);
            }
        }

        self.scheduler.set_timer(
            &TimerId::disk_watch(),
            self.config.disk_watch_interval,
            self.clock.now(),
        );
    }

    // --- checkpoint helpers ---------------------------------------------

    /// Checkpoint a record off the actor thread, honoring the strict
    /// policy on failure.
    ///
    /// The record is serialized here; the fsync-heavy file I/O runs on
    /// the blocking pool so no handler stalls the event loop on disk.
    pub(crate) async fn checkpoint<T: Serialize>(
        &self,
        path: &Path,
        record: &T,
    ) -> Result<(), AgentError> {
        let value = match serde_json::to_value(record) {
            Ok(value) => value,
            Err(e) => return self.checkpoint_result(path, Err(StorageError::from(e))),
        };

        let target = path.to_owned();
        let result = tokio::task::spawn_blocking(move || dray_storage::checkpoint(&target, &value))
            .await
            .unwrap_or_else(|e| {
                Err(StorageError::Io {
                    path: path.to_owned(),
                    source: std::io::Error::other(e.to_string()),
                })
            });
        self.checkpoint_result(path, result)
    }

    fn checkpoint_result(
        &self,
        path: &Path,
        result: Result<(), StorageError>,
    ) -> Result<(), AgentError> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if self.config.strict => Err(e.into()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "checkpoint failed, continuing best-effort");
                Ok(())
            }
        }
    }

    pub(crate) fn update_log_path(
        &self,
        slave_id: &SlaveId,
        update: &StatusUpdate,
        container_id: &ContainerId,
    ) -> PathBuf {
        self.layout.updates_path(
            slave_id,
            &update.framework_id,
            &update.executor_id,
            container_id,
            &update.task_id,
        )
    }
}

/// Fraction of the work dir's filesystem in use.
fn disk_usage(path: &Path) -> Option<f64> {
    let total = fs2::total_space(path).ok()? as f64;
    let available = fs2::available_space(path).ok()? as f64;
    if total <= 0.0 {
        return None;
    }
    Some(1.0 - available / total)
}

#[cfg(test)]
#[path = "../agent_tests/mod.rs"]
mod tests;
