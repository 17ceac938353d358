// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Status-update manager: at-least-once, per-task in-order delivery.
//!
//! Runs as its own actor so the agent never blocks on fsync. Every
//! update is appended to its task's on-disk log before it is forwarded;
//! the front of each per-task queue is retransmitted with exponential
//! backoff until the master echoes its uuid, then the next queued update
//! goes out. Duplicate uuids are dropped, acknowledged terminal updates
//! close the stream, and executors that die without a terminal update
//! get one synthesized (TASK_LOST, or TASK_FAILED when a non-zero exit
//! status is known) through the same pipeline.

use crate::event::AgentEvent;
use crate::master::MasterLink;
use crate::scheduler::Scheduler;
use dray_core::{
    Clock, ExecutorId, FrameworkId, SlaveMessage, StatusUpdate, TaskId, TaskState, TimerId,
    UpdateId,
};
use dray_storage::{StorageError, UpdateLog, UpdateLogRecord};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Mailbox capacity; updates beyond this backpressure the producer task,
/// never the executor process itself.
const MAILBOX_CAPACITY: usize = 1024;

/// Tuning knobs for the manager.
#[derive(Debug, Clone)]
pub struct UpdateManagerConfig {
    /// Abort-on-checkpoint-error policy is enforced by the agent; the
    /// manager only reports failures.
    pub retry_initial: Duration,
    pub retry_max: Duration,
    /// Pending updates per framework before a warning is logged. Soft:
    /// correctness forbids dropping pre-terminal updates.
    pub framework_pending_soft_cap: usize,
    /// Timer resolution of the manager's internal tick.
    pub tick: Duration,
}

impl Default for UpdateManagerConfig {
    fn default() -> Self {
        Self {
            retry_initial: Duration::from_secs(10),
            retry_max: Duration::from_secs(10 * 60),
            framework_pending_soft_cap: 16_384,
            tick: Duration::from_secs(1),
        }
    }
}

/// A task whose executor terminated, with the stream's log location.
#[derive(Debug, Clone)]
pub struct TerminatedTask {
    pub task_id: TaskId,
    pub log_path: PathBuf,
}

/// One task stream reconstructed from the checkpoint tree.
#[derive(Debug, Clone)]
pub struct RecoveredStream {
    pub framework_id: FrameworkId,
    pub executor_id: ExecutorId,
    pub task_id: TaskId,
    pub log_path: PathBuf,
    pub records: Vec<UpdateLogRecord>,
}

enum Command {
    Update {
        update: StatusUpdate,
        log_path: PathBuf,
    },
    Acknowledge {
        framework_id: FrameworkId,
        task_id: TaskId,
        uuid: UpdateId,
    },
    ExecutorTerminated {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        tasks: Vec<TerminatedTask>,
        exit_status: Option<i32>,
    },
    Recover {
        streams: Vec<RecoveredStream>,
    },
}

/// Handle for enqueueing work to the manager actor.
#[derive(Clone)]
pub struct UpdateManagerHandle {
    tx: mpsc::Sender<Command>,
}

impl UpdateManagerHandle {
    /// Route a fresh (or executor-retransmitted) update into the pipeline.
    pub async fn update(&self, update: StatusUpdate, log_path: PathBuf) {
        self.send(Command::Update { update, log_path }).await;
    }

    /// Apply a master acknowledgement.
    pub async fn acknowledge(&self, framework_id: FrameworkId, task_id: TaskId, uuid: UpdateId) {
        self.send(Command::Acknowledge { framework_id, task_id, uuid }).await;
    }

    /// Synthesize terminal updates for tasks orphaned by a dead executor.
    pub async fn executor_terminated(
        &self,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        tasks: Vec<TerminatedTask>,
        exit_status: Option<i32>,
    ) {
        self.send(Command::ExecutorTerminated { framework_id, executor_id, tasks, exit_status })
            .await;
    }

    /// Rebuild streams from replayed logs and re-arm retransmits.
    pub async fn recover(&self, streams: Vec<RecoveredStream>) {
        self.send(Command::Recover { streams }).await;
    }

    async fn send(&self, command: Command) {
        if self.tx.send(command).await.is_err() {
            warn!("status-update manager is gone, dropping command");
        }
    }
}

/// Per-task delivery state. `pending.front()` is the update currently
/// in flight (when `forwarded` is set) or next to go out.
struct Stream {
    framework_id: FrameworkId,
    executor_id: ExecutorId,
    task_id: TaskId,
    log_path: PathBuf,
    log: Option<UpdateLog>,
    pending: VecDeque<StatusUpdate>,
    received: HashSet<UpdateId>,
    acked: HashSet<UpdateId>,
    forwarded: Option<UpdateId>,
    /// A terminal update was acknowledged; the stream admits nothing more.
    terminated: bool,
    backoff: Duration,
}

impl Stream {
    fn new(
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        task_id: TaskId,
        log_path: PathBuf,
        backoff: Duration,
    ) -> Self {
        Self {
            framework_id,
            executor_id,
            task_id,
            log_path,
            log: None,
            pending: VecDeque::new(),
            received: HashSet::new(),
            acked: HashSet::new(),
            forwarded: None,
            terminated: false,
            backoff,
        }
    }

    /// Append to the stream's log, opening it on first use.
    fn persist(&mut self, record: &UpdateLogRecord) -> Result<(), StorageError> {
        if self.log.is_none() {
            self.log = Some(UpdateLog::open(&self.log_path)?);
        }
        match self.log.as_mut() {
            Some(log) => log.append(record),
            None => Ok(()),
        }
    }

    /// Whether a terminal update is already on its way out.
    fn has_pending_terminal(&self) -> bool {
        self.pending.iter().any(|u| u.is_terminal())
    }
}

type StreamKey = (FrameworkId, TaskId);

/// The manager actor. Owns stream state, the retransmit scheduler, and
/// the per-task log handles.
pub struct UpdateManager<M: MasterLink, C: Clock> {
    config: UpdateManagerConfig,
    master: M,
    clock: C,
    event_tx: mpsc::Sender<AgentEvent>,
    streams: HashMap<StreamKey, Stream>,
    scheduler: Scheduler,
    rx: mpsc::Receiver<Command>,
}

impl<M: MasterLink, C: Clock + 'static> UpdateManager<M, C> {
    /// Spawn the manager actor; returns the command handle.
    pub fn spawn(
        config: UpdateManagerConfig,
        master: M,
        clock: C,
        event_tx: mpsc::Sender<AgentEvent>,
    ) -> UpdateManagerHandle {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let manager = Self {
            config,
            master,
            clock,
            event_tx,
            streams: HashMap::new(),
            scheduler: Scheduler::new(),
            rx,
        };
        tokio::spawn(manager.run());
        UpdateManagerHandle { tx }
    }

    async fn run(mut self) {
        let mut tick = tokio::time::interval(self.config.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                _ = tick.tick() => {
                    let fired = self.scheduler.fired_timers(self.clock.now());
                    for timer in fired {
                        if let Some((framework_id, task_id)) = timer.as_update_retry() {
                            self.retransmit(&(framework_id, task_id));
                        }
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Update { update, log_path } => self.handle_update(update, log_path).await,
            Command::Acknowledge { framework_id, task_id, uuid } => {
                self.handle_ack(framework_id, task_id, uuid).await;
            }
            Command::ExecutorTerminated { framework_id, executor_id, tasks, exit_status } => {
                self.handle_executor_terminated(framework_id, executor_id, tasks, exit_status)
                    .await;
            }
            Command::Recover { streams } => self.handle_recover(streams),
        }
    }

    async fn handle_update(&mut self, update: StatusUpdate, log_path: PathBuf) {
        let key = (update.framework_id.clone(), update.task_id.clone());
        let stream = self.streams.entry(key.clone()).or_insert_with(|| {
            Stream::new(
                update.framework_id.clone(),
                update.executor_id.clone(),
                update.task_id.clone(),
                log_path,
                self.config.retry_initial,
            )
        });

        if stream.terminated {
            warn!(
                task_id = %update.task_id,
                state = %update.state,
                "update after acknowledged terminal state, dropping"
            );
            return;
        }

        if stream.received.contains(&update.uuid) {
            debug!(task_id = %update.task_id, uuid = %update.uuid, "duplicate update, dropping");
            return;
        }

        if let Err(e) = stream.persist(&UpdateLogRecord::Update { update: update.clone() }) {
            self.report_checkpoint_failure(e).await;
        }

        let stream = match self.streams.get_mut(&key) {
            Some(s) => s,
            None => return,
        };
        stream.received.insert(update.uuid.clone());
        stream.pending.push_back(update);

        self.warn_if_backlogged(&key.0);

        let stream = match self.streams.get_mut(&key) {
            Some(s) => s,
            None => return,
        };
        if stream.forwarded.is_none() {
            Self::forward_front(
                &self.master,
                &mut self.scheduler,
                &self.clock,
                self.config.retry_initial,
                stream,
            );
        }
    }

    async fn handle_ack(&mut self, framework_id: FrameworkId, task_id: TaskId, uuid: UpdateId) {
        let key = (framework_id.clone(), task_id.clone());
        let Some(stream) = self.streams.get_mut(&key) else {
            warn!(%framework_id, %task_id, %uuid, "acknowledgement for unknown task stream");
            return;
        };

        // Re-applying an acknowledgement is a no-op.
        if stream.acked.contains(&uuid) {
            debug!(%task_id, %uuid, "duplicate acknowledgement, dropping");
            return;
        }

        if stream.forwarded.as_ref() != Some(&uuid) {
            warn!(
                %task_id,
                %uuid,
                forwarded = ?stream.forwarded,
                "acknowledgement does not match the in-flight update, dropping"
            );
            return;
        }

        if let Err(e) = stream.persist(&UpdateLogRecord::Ack { uuid: uuid.clone() }) {
            self.report_checkpoint_failure(e).await;
        }
        let Some(stream) = self.streams.get_mut(&key) else {
            return;
        };

        stream.acked.insert(uuid.clone());
        stream.forwarded = None;
        stream.backoff = self.config.retry_initial;
        self.scheduler
            .cancel_timer(&TimerId::update_retry(&framework_id, &task_id));

        let acked_update = stream.pending.pop_front();
        let terminal = acked_update.as_ref().is_some_and(|u| u.is_terminal());
        if terminal {
            stream.terminated = true;
            info!(%framework_id, %task_id, "task stream closed");
        } else if !stream.pending.is_empty() {
            Self::forward_front(
                &self.master,
                &mut self.scheduler,
                &self.clock,
                self.config.retry_initial,
                stream,
            );
        }

        let _ = self
            .event_tx
            .send(AgentEvent::UpdateAcked { framework_id, task_id, uuid, terminal })
            .await;
    }

    async fn handle_executor_terminated(
        &mut self,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        tasks: Vec<TerminatedTask>,
        exit_status: Option<i32>,
    ) {
        // Non-zero exit means the executor failed its tasks; unknown or
        // clean exits leave us unable to say more than "lost".
        let state = match exit_status {
            Some(code) if code != 0 => TaskState::Failed,
            _ => TaskState::Lost,
        };

        for task in tasks {
            let key = (framework_id.clone(), task.task_id.clone());
            if let Some(stream) = self.streams.get(&key) {
                if stream.terminated || stream.has_pending_terminal() {
                    continue;
                }
            }

            let message = match exit_status {
                Some(code) => format!("executor {executor_id} terminated with status {code}"),
                None => format!("executor {executor_id} terminated"),
            };
            let update = StatusUpdate::new(
                framework_id.clone(),
                executor_id.clone(),
                task.task_id.clone(),
                state,
                self.clock.epoch_ms(),
            )
            .with_message(message);

            info!(
                %framework_id,
                task_id = %task.task_id,
                state = %state,
                "synthesizing terminal update for orphaned task"
            );
            self.handle_update(update, task.log_path).await;
        }
    }

    fn handle_recover(&mut self, streams: Vec<RecoveredStream>) {
        for recovered in streams {
            let key = (recovered.framework_id.clone(), recovered.task_id.clone());
            let mut stream = Stream::new(
                recovered.framework_id,
                recovered.executor_id,
                recovered.task_id,
                recovered.log_path,
                self.config.retry_initial,
            );

            for record in &recovered.records {
                match record {
                    UpdateLogRecord::Update { update } => {
                        if stream.received.insert(update.uuid.clone()) {
                            stream.pending.push_back(update.clone());
                        }
                    }
                    UpdateLogRecord::Ack { uuid } => {
                        stream.acked.insert(uuid.clone());
                        if let Some(front) = stream.pending.front() {
                            if &front.uuid == uuid {
                                let update = stream.pending.pop_front();
                                if update.is_some_and(|u| u.is_terminal()) {
                                    stream.terminated = true;
                                }
                            }
                        }
                    }
                }
            }

            info!(
                framework_id = %stream.framework_id,
                task_id = %stream.task_id,
                pending = stream.pending.len(),
                terminated = stream.terminated,
                "recovered task stream"
            );

            if !stream.terminated && !stream.pending.is_empty() {
                Self::forward_front(
                    &self.master,
                    &mut self.scheduler,
                    &self.clock,
                    self.config.retry_initial,
                    &mut stream,
                );
            }
            self.streams.insert(key, stream);
        }
    }

    /// Send the front of the queue and arm its retransmit timer.
    fn forward_front(
        master: &M,
        scheduler: &mut Scheduler,
        clock: &C,
        initial_backoff: Duration,
        stream: &mut Stream,
    ) {
        let Some(update) = stream.pending.front() else {
            return;
        };
        debug!(
            task_id = %stream.task_id,
            state = %update.state,
            uuid = %update.uuid,
            "forwarding status update"
        );
        stream.forwarded = Some(update.uuid.clone());
        stream.backoff = initial_backoff;
        master.send(SlaveMessage::StatusUpdate { update: update.clone() });
        scheduler.set_timer(
            &TimerId::update_retry(&stream.framework_id, &stream.task_id),
            stream.backoff,
            clock.now(),
        );
    }

    /// Retry timer fired: resend the in-flight update with doubled backoff.
    fn retransmit(&mut self, key: &StreamKey) {
        let Some(stream) = self.streams.get_mut(key) else {
            return;
        };
        if stream.forwarded.is_none() {
            return;
        }
        let Some(update) = stream.pending.front() else {
            return;
        };

        stream.backoff = (stream.backoff * 2).min(self.config.retry_max);
        info!(
            task_id = %stream.task_id,
            uuid = %update.uuid,
            next_retry_secs = stream.backoff.as_secs(),
            "retransmitting unacknowledged status update"
        );
        self.master.send(SlaveMessage::StatusUpdate { update: update.clone() });
        self.scheduler.set_timer(
            &TimerId::update_retry(&stream.framework_id, &stream.task_id),
            stream.backoff,
            self.clock.now(),
        );
    }

    fn warn_if_backlogged(&self, framework_id: &FrameworkId) {
        let pending: usize = self
            .streams
            .values()
            .filter(|s| &s.framework_id == framework_id)
            .map(|s| s.pending.len())
            .sum();
        if pending > self.config.framework_pending_soft_cap {
            warn!(
                %framework_id,
                pending,
                cap = self.config.framework_pending_soft_cap,
                "status updates accumulating faster than the master acknowledges"
            );
        }
    }

    async fn report_checkpoint_failure(&mut self, error: StorageError) {
        warn!(error = %error, "failed to checkpoint status update record");
        let _ = self
            .event_tx
            .send(AgentEvent::CheckpointFailed { message: error.to_string() })
            .await;
    }
}

#[cfg(test)]
#[path = "status_update_tests.rs"]
mod tests;
