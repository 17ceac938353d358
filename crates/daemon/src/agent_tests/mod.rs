// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::config::{Config, RecoverPolicy};
use async_trait::async_trait;
use dray_core::{CommandInfo, ExecutorMessage, FakeClock, MasterMessage, Resources, TaskInfo};
use dray_engine::{
    ExecutorConn, IsolatorError, LaunchConfig, Launched, RecoveredProcess, ResourceStatistics,
    UpdateManager, UpdateManagerConfig,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

mod restart;

/// Master link that records everything sent to it.
#[derive(Clone, Default)]
pub(crate) struct FakeMaster {
    sent: Arc<Mutex<Vec<SlaveMessage>>>,
}

impl FakeMaster {
    pub(crate) fn sent(&self) -> Vec<SlaveMessage> {
        self.sent.lock().clone()
    }

    pub(crate) fn updates(&self) -> Vec<StatusUpdate> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                SlaveMessage::StatusUpdate { update } => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn registrations(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|m| matches!(m, SlaveMessage::Register { .. } | SlaveMessage::Reregister { .. }))
            .count()
    }
}

impl MasterLink for FakeMaster {
    fn send(&self, message: SlaveMessage) {
        self.sent.lock().push(message);
    }
}

/// Isolator that records calls and hands out fake pids.
#[derive(Clone)]
pub(crate) struct FakeIsolator {
    launches: Arc<Mutex<Vec<LaunchConfig>>>,
    destroys: Arc<Mutex<Vec<(FrameworkId, ExecutorId)>>>,
    recovered: Arc<Mutex<Vec<RecoveredProcess>>>,
    fail_launch: Arc<AtomicBool>,
    next_pid: Arc<AtomicI32>,
}

impl Default for FakeIsolator {
    fn default() -> Self {
        Self {
            launches: Arc::new(Mutex::new(Vec::new())),
            destroys: Arc::new(Mutex::new(Vec::new())),
            recovered: Arc::new(Mutex::new(Vec::new())),
            fail_launch: Arc::new(AtomicBool::new(false)),
            next_pid: Arc::new(AtomicI32::new(1000)),
        }
    }
}

impl FakeIsolator {
    pub(crate) fn launches(&self) -> Vec<LaunchConfig> {
        self.launches.lock().clone()
    }

    pub(crate) fn destroys(&self) -> Vec<(FrameworkId, ExecutorId)> {
        self.destroys.lock().clone()
    }

    pub(crate) fn fail_next_launch(&self) {
        self.fail_launch.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl dray_engine::Isolator for FakeIsolator {
    async fn launch(&self, config: LaunchConfig) -> Result<Launched, IsolatorError> {
        if self.fail_launch.swap(false, Ordering::SeqCst) {
            return Err(IsolatorError::LaunchFailed("injected failure".into()));
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.launches.lock().push(config);
        Ok(Launched { pid })
    }

    async fn update(
        &self,
        _framework_id: &FrameworkId,
        _executor_id: &ExecutorId,
        _resources: Resources,
    ) -> Result<(), IsolatorError> {
        Ok(())
    }

    async fn usage(
        &self,
        _framework_id: &FrameworkId,
        _executor_id: &ExecutorId,
    ) -> Result<ResourceStatistics, IsolatorError> {
        Ok(ResourceStatistics::default())
    }

    async fn destroy(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
    ) -> Result<(), IsolatorError> {
        self.destroys
            .lock()
            .push((framework_id.clone(), executor_id.clone()));
        Ok(())
    }

    async fn recover(&self, processes: Vec<RecoveredProcess>) -> Result<(), IsolatorError> {
        self.recovered.lock().extend(processes);
        Ok(())
    }
}

/// Gc that records scheduled paths instead of deleting.
#[derive(Clone, Default)]
pub(crate) struct RecordingGc {
    scheduled: Arc<Mutex<Vec<PathBuf>>>,
}

impl RecordingGc {
    pub(crate) fn scheduled(&self) -> Vec<PathBuf> {
        self.scheduled.lock().clone()
    }
}

impl Gc for RecordingGc {
    fn schedule(&self, _delay: Duration, path: PathBuf) {
        self.scheduled.lock().push(path);
    }
}

pub(crate) struct TestAgent {
    pub agent: Agent<FakeIsolator, FakeMaster, RecordingGc, FakeClock>,
    pub master: FakeMaster,
    pub isolator: FakeIsolator,
    pub gc: RecordingGc,
    pub clock: FakeClock,
    pub dir: Arc<TempDir>,
}

pub(crate) fn test_config(dir: &TempDir, recover: RecoverPolicy) -> Config {
    Config {
        work_dir: dir.path().to_path_buf(),
        launcher_dir: dir.path().to_path_buf(),
        hostname: "node-1".to_string(),
        resources: Resources::new(4.0, 8192, 0),
        master: None,
        recover,
        strict: false,
        executor_shutdown_grace: Duration::from_secs(5),
        executor_reregister_timeout: Duration::from_secs(10),
        gc_delay: Duration::from_secs(7 * 24 * 3600),
        disk_watch_interval: Duration::from_secs(60),
    }
}

pub(crate) fn build_agent(dir: Arc<TempDir>, config: Config) -> TestAgent {
    let master = FakeMaster::default();
    let isolator = FakeIsolator::default();
    let gc = RecordingGc::default();
    let clock = FakeClock::new();

    let (event_tx, event_rx) = mpsc::channel(256);
    let updates = UpdateManager::spawn(
        UpdateManagerConfig {
            tick: Duration::from_millis(10),
            ..UpdateManagerConfig::default()
        },
        master.clone(),
        clock.clone(),
        event_tx,
    );

    let agent = Agent::new(
        config,
        AgentDeps {
            isolator: isolator.clone(),
            master: master.clone(),
            gc: gc.clone(),
            clock: clock.clone(),
            reaper: Reaper::new(),
            updates,
        },
        event_rx,
    );

    TestAgent { agent, master, isolator, gc, clock, dir }
}

pub(crate) fn test_agent() -> TestAgent {
    let dir = Arc::new(TempDir::new().expect("tempdir"));
    let config = test_config(&dir, RecoverPolicy::Reconnect);
    build_agent(dir, config)
}

impl TestAgent {
    /// Cold-start recovery plus master registration.
    pub(crate) async fn register(&mut self) -> SlaveId {
        self.agent.recover().await.unwrap();
        self.agent
            .handle_event(AgentEvent::MasterDetected { master: "master:5050".into() })
            .await
            .unwrap();
        let slave_id = SlaveId::new("s-1");
        self.agent
            .handle_event(AgentEvent::Master(MasterMessage::Registered {
                slave_id: slave_id.clone(),
            }))
            .await
            .unwrap();
        slave_id
    }

    /// Pump manager/isolator events into the agent until quiet.
    pub(crate) async fn settle(&mut self) {
        for _ in 0..30 {
            while self.agent.step().await.unwrap() {}
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub(crate) async fn run_task(&mut self, task_id: &str) {
        self.agent
            .handle_event(AgentEvent::Master(MasterMessage::RunTask {
                framework_id: FrameworkId::new("fw-1"),
                framework: framework_info(),
                framework_pid: "scheduler@host".to_string(),
                task: command_task(task_id),
            }))
            .await
            .unwrap();
    }

    /// Register a fake executor connection for the command executor of
    /// `task_id`; returns the command receiver.
    pub(crate) async fn connect_executor(
        &mut self,
        executor_id: &str,
    ) -> mpsc::Receiver<ExecutorCommand> {
        let (tx, rx) = mpsc::channel(64);
        self.agent
            .handle_event(AgentEvent::Executor {
                conn: ExecutorConn::new(tx),
                message: ExecutorMessage::Register {
                    framework_id: FrameworkId::new("fw-1"),
                    executor_id: ExecutorId::new(executor_id),
                },
            })
            .await
            .unwrap();
        rx
    }

    pub(crate) async fn executor_update(&mut self, task_id: &str, state: TaskState) -> StatusUpdate {
        let update = StatusUpdate::new(
            FrameworkId::new("fw-1"),
            ExecutorId::new(task_id),
            TaskId::new(task_id),
            state,
            self.clock.epoch_ms(),
        );
        self.agent
            .handle_event(AgentEvent::Executor {
                conn: dead_conn(),
                message: ExecutorMessage::StatusUpdate { update: update.clone() },
            })
            .await
            .unwrap();
        update
    }

    pub(crate) async fn ack(&mut self, update: &StatusUpdate) {
        self.agent
            .handle_event(AgentEvent::Master(MasterMessage::StatusUpdateAck {
                framework_id: update.framework_id.clone(),
                task_id: update.task_id.clone(),
                uuid: update.uuid.clone(),
            }))
            .await
            .unwrap();
    }

    /// Wait until the master observed `n` status updates.
    pub(crate) async fn wait_for_updates(&mut self, n: usize) -> Vec<StatusUpdate> {
        for _ in 0..300 {
            while self.agent.step().await.unwrap() {}
            let updates = self.master.updates();
            if updates.len() >= n {
                return updates;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("master saw {} updates, wanted {n}", self.master.updates().len());
    }
}

pub(crate) fn framework_info() -> dray_core::FrameworkInfo {
    dray_core::FrameworkInfo {
        name: "etl".to_string(),
        user: "svc".to_string(),
        failover_timeout_ms: 0,
    }
}

pub(crate) fn command_task(task_id: &str) -> TaskInfo {
    TaskInfo {
        task_id: TaskId::new(task_id),
        name: format!("task {task_id}"),
        resources: Resources::new(0.5, 64, 0),
        command: Some(CommandInfo::shell("echo hello")),
        executor: None,
        data: None,
    }
}

/// A connection nobody reads; good enough when only the inbound message
/// matters.
pub(crate) fn dead_conn() -> ExecutorConn {
    let (tx, _rx) = mpsc::channel(1);
    ExecutorConn::new(tx)
}

async fn recv_command(rx: &mut mpsc::Receiver<ExecutorCommand>) -> ExecutorCommand {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for executor command")
        .expect("connection closed")
}

// ── registration ─────────────────────────────────────────────────────────

#[tokio::test]
async fn cold_start_registration_assigns_and_persists_the_id() {
    let mut t = test_agent();
    t.agent.recover().await.unwrap();
    assert_eq!(t.agent.connection_state(), ConnectionState::Disconnected);

    t.agent
        .handle_event(AgentEvent::MasterDetected { master: "m:5050".into() })
        .await
        .unwrap();
    assert_eq!(t.agent.connection_state(), ConnectionState::Registering);
    assert!(matches!(t.master.sent()[0], SlaveMessage::Register { .. }));

    t.agent
        .handle_event(AgentEvent::Master(MasterMessage::Registered {
            slave_id: SlaveId::new("s-1"),
        }))
        .await
        .unwrap();
    assert_eq!(t.agent.connection_state(), ConnectionState::Registered);
    assert_eq!(t.agent.slave_id(), Some(&SlaveId::new("s-1")));

    // Identity is durable.
    let layout = dray_storage::Layout::new(t.dir.path());
    let persisted: Option<SlaveId> =
        dray_storage::read_record(&layout.latest_slave_path()).unwrap();
    assert_eq!(persisted, Some(SlaveId::new("s-1")));
    let info: Option<dray_core::SlaveInfo> =
        dray_storage::read_record(&layout.slave_info_path(&SlaveId::new("s-1"))).unwrap();
    assert_eq!(info.unwrap().id, Some(SlaveId::new("s-1")));
}

#[tokio::test]
async fn registration_retries_with_exponential_backoff() {
    let mut t = test_agent();
    t.agent.recover().await.unwrap();
    t.agent
        .handle_event(AgentEvent::MasterDetected { master: "m:5050".into() })
        .await
        .unwrap();
    assert_eq!(t.master.registrations(), 1);

    // First retry after 1s.
    t.clock.advance(Duration::from_millis(1100));
    t.agent.handle_timers().await.unwrap();
    assert_eq!(t.master.registrations(), 2);

    // Backoff doubled: 1s is no longer enough, 2s is.
    t.clock.advance(Duration::from_millis(1100));
    t.agent.handle_timers().await.unwrap();
    assert_eq!(t.master.registrations(), 2);
    t.clock.advance(Duration::from_millis(1000));
    t.agent.handle_timers().await.unwrap();
    assert_eq!(t.master.registrations(), 3);

    // Registration stops the retries.
    t.agent
        .handle_event(AgentEvent::Master(MasterMessage::Registered {
            slave_id: SlaveId::new("s-1"),
        }))
        .await
        .unwrap();
    t.clock.advance(Duration::from_secs(120));
    t.agent.handle_timers().await.unwrap();
    assert_eq!(t.master.registrations(), 3);
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let mut t = test_agent();
    t.register().await;
    t.agent
        .handle_event(AgentEvent::Master(MasterMessage::Ping))
        .await
        .unwrap();
    assert!(t.master.sent().iter().any(|m| matches!(m, SlaveMessage::Pong)));
}

// ── task launch and the happy path ───────────────────────────────────────

#[tokio::test]
async fn run_task_synthesizes_command_executor_and_launches() {
    let mut t = test_agent();
    t.register().await;
    t.run_task("t-1").await;

    let launches = t.isolator.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].executor.executor_id, ExecutorId::new("t-1"));
    assert!(launches[0]
        .env
        .iter()
        .any(|(k, _)| k == "DRAY_AGENT_SOCKET"));

    let registry = t.agent.registry();
    let framework = registry.framework(&FrameworkId::new("fw-1")).unwrap();
    let executor = framework.executor(&ExecutorId::new("t-1")).unwrap();
    assert_eq!(executor.pid, Some(1000));
    assert_eq!(executor.queued_tasks.len(), 1);

    // Executor info and task info are durable before the fork.
    let layout = dray_storage::Layout::new(t.dir.path());
    let container_id = executor.container_id.clone();
    let info: Option<dray_core::ExecutorInfo> = dray_storage::read_record(
        &layout.executor_info_path(
            &SlaveId::new("s-1"),
            &FrameworkId::new("fw-1"),
            &ExecutorId::new("t-1"),
            &container_id,
        ),
    )
    .unwrap();
    assert!(info.is_some());
}

#[tokio::test]
async fn happy_path_updates_flow_in_order_and_acks_reach_the_executor() {
    let mut t = test_agent();
    t.register().await;
    t.run_task("t-1").await;

    let mut rx = t.connect_executor("t-1").await;
    assert!(matches!(recv_command(&mut rx).await, ExecutorCommand::Registered { .. }));
    assert!(matches!(recv_command(&mut rx).await, ExecutorCommand::RunTask { .. }));

    let starting = t.executor_update("t-1", TaskState::Starting).await;
    let running = t.executor_update("t-1", TaskState::Running).await;
    let finished = t.executor_update("t-1", TaskState::Finished).await;

    // Only the first is forwarded until its ack arrives.
    let seen = t.wait_for_updates(1).await;
    assert_eq!(seen[0].state, TaskState::Starting);

    t.ack(&starting).await;
    let seen = t.wait_for_updates(2).await;
    assert_eq!(seen[1].state, TaskState::Running);

    t.ack(&running).await;
    let seen = t.wait_for_updates(3).await;
    assert_eq!(seen[2].state, TaskState::Finished);
    t.ack(&finished).await;
    t.settle().await;

    // The executor observed all three acknowledgements, in order.
    let mut acked = Vec::new();
    while let Ok(cmd) = rx.try_recv() {
        if let ExecutorCommand::StatusUpdateAck { uuid, .. } = cmd {
            acked.push(uuid);
        }
    }
    assert_eq!(acked, vec![starting.uuid, running.uuid, finished.uuid]);

    // Terminal task lives in the completed ring; executor stays up.
    let registry = t.agent.registry();
    let executor = registry
        .framework(&FrameworkId::new("fw-1"))
        .unwrap()
        .executor(&ExecutorId::new("t-1"))
        .unwrap();
    assert!(executor.launched_tasks.is_empty());
    assert_eq!(executor.completed_tasks.len(), 1);
    assert_eq!(executor.completed_tasks[0].state, TaskState::Finished);
}

#[tokio::test]
async fn launch_failure_fails_the_task_through_the_pipeline() {
    let mut t = test_agent();
    t.register().await;
    t.isolator.fail_next_launch();
    t.run_task("t-1").await;

    let seen = t.wait_for_updates(1).await;
    assert_eq!(seen[0].state, TaskState::Failed);
    assert!(seen[0]
        .message
        .as_deref()
        .is_some_and(|m| m.contains("launch failed")));

    // No executor record survives the failed launch.
    let registry = t.agent.registry();
    let framework = registry.framework(&FrameworkId::new("fw-1")).unwrap();
    assert!(framework.executors.is_empty());
}

#[tokio::test]
async fn duplicate_task_id_from_master_is_counted_and_dropped() {
    let mut t = test_agent();
    t.register().await;
    t.run_task("t-1").await;
    t.run_task("t-1").await;

    assert_eq!(t.isolator.launches().len(), 1);
    assert_eq!(t.agent.registry().stats.invalid_tasks, 1);
}

#[tokio::test]
async fn task_before_recovery_is_dropped() {
    let mut t = test_agent();
    // No recover() call: the agent has not settled recovery.
    t.run_task("t-1").await;
    assert!(t.isolator.launches().is_empty());
    assert_eq!(t.agent.registry().stats.invalid_tasks, 1);
}

// ── executor crash ───────────────────────────────────────────────────────

#[tokio::test]
async fn executor_crash_synthesizes_failed_after_running() {
    let mut t = test_agent();
    t.register().await;
    t.run_task("t-1").await;
    let _rx = t.connect_executor("t-1").await;

    let running = t.executor_update("t-1", TaskState::Running).await;
    t.wait_for_updates(1).await;
    t.ack(&running).await;
    t.settle().await;

    // Reaper observes the crash with a non-zero status.
    t.agent
        .handle_event(AgentEvent::ProcessExited { pid: 1000, status: Some(137) })
        .await
        .unwrap();

    let seen = t.wait_for_updates(2).await;
    assert_eq!(seen[1].state, TaskState::Failed);
    assert_eq!(seen[1].task_id, TaskId::new("t-1"));

    // Executor retired into the completed ring.
    let framework_ref = t.agent.registry().framework(&FrameworkId::new("fw-1")).unwrap();
    assert!(framework_ref.executors.is_empty());
    assert_eq!(framework_ref.completed_executors.len(), 1);

    // Acking the synthesized update closes the stream.
    let failed = seen[1].clone();
    t.ack(&failed).await;
    t.settle().await;
}

#[tokio::test]
async fn crash_with_unknown_status_synthesizes_lost() {
    let mut t = test_agent();
    t.register().await;
    t.run_task("t-1").await;
    let _rx = t.connect_executor("t-1").await;
    t.executor_update("t-1", TaskState::Running).await;
    t.wait_for_updates(1).await;

    t.agent
        .handle_event(AgentEvent::ProcessExited { pid: 1000, status: None })
        .await
        .unwrap();
    t.settle().await;

    // RUNNING is still unacked, so LOST queues behind it.
    let registry = t.agent.registry();
    assert!(registry.framework(&FrameworkId::new("fw-1")).unwrap().executors.is_empty());
}

// ── kill task ────────────────────────────────────────────────────────────

#[tokio::test]
async fn killing_a_queued_task_synthesizes_task_killed() {
    let mut t = test_agent();
    t.register().await;
    t.run_task("t-1").await;

    // Not yet dispatched (executor never registered).
    t.agent
        .handle_event(AgentEvent::Master(MasterMessage::KillTask {
            framework_id: FrameworkId::new("fw-1"),
            task_id: TaskId::new("t-1"),
        }))
        .await
        .unwrap();

    let seen = t.wait_for_updates(1).await;
    assert_eq!(seen[0].state, TaskState::Killed);
}

#[tokio::test]
async fn killing_a_launched_task_is_forwarded_to_the_executor() {
    let mut t = test_agent();
    t.register().await;
    t.run_task("t-1").await;
    let mut rx = t.connect_executor("t-1").await;
    recv_command(&mut rx).await; // Registered
    recv_command(&mut rx).await; // RunTask

    t.agent
        .handle_event(AgentEvent::Master(MasterMessage::KillTask {
            framework_id: FrameworkId::new("fw-1"),
            task_id: TaskId::new("t-1"),
        }))
        .await
        .unwrap();

    assert!(matches!(
        recv_command(&mut rx).await,
        ExecutorCommand::KillTask { .. }
    ));
}

// ── framework shutdown ───────────────────────────────────────────────────

#[tokio::test]
async fn framework_shutdown_is_two_phase() {
    let mut t = test_agent();
    t.register().await;
    t.run_task("t-1").await;
    let mut rx = t.connect_executor("t-1").await;
    recv_command(&mut rx).await; // Registered
    recv_command(&mut rx).await; // RunTask

    t.agent
        .handle_event(AgentEvent::Master(MasterMessage::ShutdownFramework {
            framework_id: FrameworkId::new("fw-1"),
        }))
        .await
        .unwrap();

    // Phase 1: polite shutdown, nothing destroyed yet.
    assert!(matches!(recv_command(&mut rx).await, ExecutorCommand::Shutdown));
    assert!(t.isolator.destroys().is_empty());

    // Phase 2 after the grace period.
    t.clock.advance(Duration::from_secs(6));
    t.agent.handle_timers().await.unwrap();
    assert_eq!(
        t.isolator.destroys(),
        vec![(FrameworkId::new("fw-1"), ExecutorId::new("t-1"))]
    );

    // Exit observation retires the executor and removes the framework.
    t.agent
        .handle_event(AgentEvent::ProcessExited { pid: 1000, status: Some(0) })
        .await
        .unwrap();
    t.settle().await;
    assert!(t.agent.registry().framework(&FrameworkId::new("fw-1")).is_none());
}

#[tokio::test]
async fn task_for_executor_in_shutdown_is_answered_lost() {
    let mut t = test_agent();
    t.register().await;
    t.run_task("t-1").await;
    let mut rx = t.connect_executor("t-1").await;
    recv_command(&mut rx).await;
    recv_command(&mut rx).await;

    t.agent
        .handle_event(AgentEvent::Master(MasterMessage::ShutdownFramework {
            framework_id: FrameworkId::new("fw-1"),
        }))
        .await
        .unwrap();

    // A second task toward the same (command) executor id.
    t.run_task("t-1").await;
    t.settle().await;

    let lost: Vec<_> = t
        .master
        .updates()
        .into_iter()
        .filter(|u| u.state == TaskState::Lost)
        .collect();
    assert_eq!(lost.len(), 1);
}

// ── framework messages ───────────────────────────────────────────────────

#[tokio::test]
async fn framework_messages_route_both_ways() {
    let mut t = test_agent();
    t.register().await;
    t.run_task("t-1").await;
    let mut rx = t.connect_executor("t-1").await;
    recv_command(&mut rx).await;
    recv_command(&mut rx).await;

    t.agent
        .handle_event(AgentEvent::Master(MasterMessage::FrameworkMessage {
            framework_id: FrameworkId::new("fw-1"),
            executor_id: ExecutorId::new("t-1"),
            data: "to-executor".to_string(),
        }))
        .await
        .unwrap();
    assert!(matches!(
        recv_command(&mut rx).await,
        ExecutorCommand::FrameworkMessage { data } if data == "to-executor"
    ));

    t.agent
        .handle_event(AgentEvent::Executor {
            conn: dead_conn(),
            message: ExecutorMessage::FrameworkMessage {
                framework_id: FrameworkId::new("fw-1"),
                executor_id: ExecutorId::new("t-1"),
                data: "to-scheduler".to_string(),
            },
        })
        .await
        .unwrap();
    assert!(t.master.sent().iter().any(|m| matches!(
        m,
        SlaveMessage::FrameworkMessage { data, .. } if data == "to-scheduler"
    )));
    assert_eq!(t.agent.registry().stats.valid_framework_messages, 2);
}

// ── master loss ──────────────────────────────────────────────────────────

#[tokio::test]
async fn framework_failover_timeout_tears_the_framework_down() {
    let mut t = test_agent();
    t.register().await;
    t.agent
        .handle_event(AgentEvent::Master(MasterMessage::RunTask {
            framework_id: FrameworkId::new("fw-1"),
            framework: dray_core::FrameworkInfo {
                name: "etl".to_string(),
                user: "svc".to_string(),
                failover_timeout_ms: 30_000,
            },
            framework_pid: "scheduler@host".to_string(),
            task: command_task("t-1"),
        }))
        .await
        .unwrap();
    let mut rx = t.connect_executor("t-1").await;
    recv_command(&mut rx).await;
    recv_command(&mut rx).await;

    t.agent.handle_event(AgentEvent::MasterLost).await.unwrap();
    assert_eq!(t.agent.connection_state(), ConnectionState::Disconnected);

    // Executors are NOT torn down on master loss alone.
    t.clock.advance(Duration::from_secs(10));
    t.agent.handle_timers().await.unwrap();
    assert!(t.isolator.destroys().is_empty());

    // The failover timeout elapses: two-phase shutdown begins.
    t.clock.advance(Duration::from_secs(25));
    t.agent.handle_timers().await.unwrap();
    assert!(matches!(recv_command(&mut rx).await, ExecutorCommand::Shutdown));
}

#[tokio::test]
async fn reconnecting_before_failover_cancels_the_teardown() {
    let mut t = test_agent();
    t.register().await;
    t.agent
        .handle_event(AgentEvent::Master(MasterMessage::RunTask {
            framework_id: FrameworkId::new("fw-1"),
            framework: dray_core::FrameworkInfo {
                name: "etl".to_string(),
                user: "svc".to_string(),
                failover_timeout_ms: 30_000,
            },
            framework_pid: "scheduler@host".to_string(),
            task: command_task("t-1"),
        }))
        .await
        .unwrap();

    t.agent.handle_event(AgentEvent::MasterLost).await.unwrap();
    t.agent
        .handle_event(AgentEvent::MasterDetected { master: "m:5050".into() })
        .await
        .unwrap();
    t.agent
        .handle_event(AgentEvent::Master(MasterMessage::Reregistered {
            slave_id: SlaveId::new("s-1"),
        }))
        .await
        .unwrap();

    t.clock.advance(Duration::from_secs(60));
    t.agent.handle_timers().await.unwrap();
    assert!(t.isolator.destroys().is_empty());
    assert!(t
        .agent
        .registry()
        .framework(&FrameworkId::new("fw-1"))
        .is_some());
}

// ── protocol accounting ──────────────────────────────────────────────────

#[tokio::test]
async fn updates_from_unknown_executors_are_counted_invalid() {
    let mut t = test_agent();
    t.register().await;

    t.agent
        .handle_event(AgentEvent::Executor {
            conn: dead_conn(),
            message: ExecutorMessage::StatusUpdate {
                update: StatusUpdate::new(
                    FrameworkId::new("ghost"),
                    ExecutorId::new("ghost"),
                    TaskId::new("t-404"),
                    TaskState::Running,
                    1_000,
                ),
            },
        })
        .await
        .unwrap();

    assert_eq!(t.agent.registry().stats.invalid_status_updates, 1);
    assert_eq!(t.agent.registry().stats.valid_status_updates, 0);
    t.settle().await;
    assert!(t.master.updates().is_empty());
}

// ── disk watcher ─────────────────────────────────────────────────────────

#[tokio::test]
async fn expired_sandboxes_are_handed_to_the_gc() {
    let dir = Arc::new(TempDir::new().unwrap());
    let mut config = test_config(&dir, RecoverPolicy::Reconnect);
    // Zero delay: any completed sandbox is immediately expired.
    config.gc_delay = Duration::ZERO;
    let mut t = build_agent(dir, config);

    t.register().await;
    t.run_task("t-1").await;
    let _rx = t.connect_executor("t-1").await;
    t.agent
        .handle_event(AgentEvent::ProcessExited { pid: 1000, status: Some(0) })
        .await
        .unwrap();
    t.settle().await;

    t.agent.handle_disk_watch();
    let scheduled = t.gc.scheduled();
    assert_eq!(scheduled.len(), 1);
    assert!(scheduled[0].starts_with(t.dir.path()));

    // Idempotent across passes.
    t.agent.handle_disk_watch();
    assert_eq!(t.gc.scheduled().len(), 1);
}

// ── strictness ───────────────────────────────────────────────────────────

#[tokio::test]
async fn checkpoint_failure_is_fatal_under_strict() {
    let dir = Arc::new(TempDir::new().unwrap());
    let mut config = test_config(&dir, RecoverPolicy::Reconnect);
    config.strict = true;
    let mut t = build_agent(dir, config);
    t.agent.recover().await.unwrap();

    let result = t
        .agent
        .handle_event(AgentEvent::CheckpointFailed { message: "disk full".into() })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn checkpoint_failure_is_tolerated_without_strict() {
    let mut t = test_agent();
    t.agent.recover().await.unwrap();
    t.agent
        .handle_event(AgentEvent::CheckpointFailed { message: "disk full".into() })
        .await
        .unwrap();
}
