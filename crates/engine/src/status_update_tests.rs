// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dray_core::FakeClock;
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;

/// Master link that records everything sent to it.
#[derive(Clone, Default)]
struct FakeMaster {
    sent: Arc<Mutex<Vec<SlaveMessage>>>,
}

impl FakeMaster {
    fn updates(&self) -> Vec<StatusUpdate> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                SlaveMessage::StatusUpdate { update } => Some(update.clone()),
                _ => None,
            })
            .collect()
    }
}

impl MasterLink for FakeMaster {
    fn send(&self, message: SlaveMessage) {
        self.sent.lock().push(message);
    }
}

struct Harness {
    handle: UpdateManagerHandle,
    master: FakeMaster,
    clock: FakeClock,
    event_rx: mpsc::Receiver<AgentEvent>,
    dir: TempDir,
}

fn harness(config: UpdateManagerConfig) -> Harness {
    let master = FakeMaster::default();
    let clock = FakeClock::new();
    let (event_tx, event_rx) = mpsc::channel(64);
    let handle = UpdateManager::spawn(config, master.clone(), clock.clone(), event_tx);
    Harness {
        handle,
        master,
        clock,
        event_rx,
        dir: TempDir::new().expect("tempdir"),
    }
}

fn fast_config() -> UpdateManagerConfig {
    UpdateManagerConfig {
        retry_initial: Duration::from_secs(10),
        retry_max: Duration::from_secs(600),
        framework_pending_soft_cap: 16,
        tick: Duration::from_millis(10),
    }
}

fn update(task: &str, state: TaskState) -> StatusUpdate {
    StatusUpdate::new(
        FrameworkId::new("fw-1"),
        ExecutorId::new("e-1"),
        TaskId::new(task),
        state,
        1_000,
    )
}

impl Harness {
    fn log_path(&self, task: &str) -> PathBuf {
        self.dir.path().join(task).join("updates")
    }

    /// Wait until the master has seen `n` updates (or fail).
    async fn wait_for_updates(&self, n: usize) -> Vec<StatusUpdate> {
        for _ in 0..300 {
            let updates = self.master.updates();
            if updates.len() >= n {
                return updates;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "master saw {} updates, expected {n}",
            self.master.updates().len()
        );
    }

    async fn wait_for_ack_event(&mut self) -> (TaskId, bool) {
        for _ in 0..300 {
            match self.event_rx.try_recv() {
                Ok(AgentEvent::UpdateAcked { task_id, terminal, .. }) => {
                    return (task_id, terminal)
                }
                Ok(_) => {}
                Err(_) => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
        panic!("no UpdateAcked event");
    }

    /// Let the manager drain its mailbox.
    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
}

#[tokio::test]
async fn update_is_persisted_before_forwarding() {
    let h = harness(fast_config());
    let u = update("t-1", TaskState::Running);

    h.handle.update(u.clone(), h.log_path("t-1")).await;
    let seen = h.wait_for_updates(1).await;
    assert_eq!(seen[0].uuid, u.uuid);

    let records = UpdateLog::replay(&h.log_path("t-1")).unwrap();
    assert_eq!(records, vec![UpdateLogRecord::Update { update: u }]);
}

#[tokio::test]
async fn later_updates_queue_until_predecessor_is_acked() {
    let mut h = harness(fast_config());
    let running = update("t-1", TaskState::Running);
    let finished = update("t-1", TaskState::Finished);

    h.handle.update(running.clone(), h.log_path("t-1")).await;
    h.handle.update(finished.clone(), h.log_path("t-1")).await;
    h.settle().await;

    // Only the first update went out.
    assert_eq!(h.wait_for_updates(1).await.len(), 1);

    h.handle
        .acknowledge(running.framework_id.clone(), running.task_id.clone(), running.uuid.clone())
        .await;
    let (task_id, terminal) = h.wait_for_ack_event().await;
    assert_eq!(task_id, TaskId::new("t-1"));
    assert!(!terminal);

    // Now the terminal update flows, and its ack closes the stream.
    let seen = h.wait_for_updates(2).await;
    assert_eq!(seen[1].uuid, finished.uuid);

    h.handle
        .acknowledge(finished.framework_id.clone(), finished.task_id.clone(), finished.uuid.clone())
        .await;
    let (_, terminal) = h.wait_for_ack_event().await;
    assert!(terminal);
}

#[tokio::test]
async fn duplicate_updates_are_dropped_by_uuid() {
    let h = harness(fast_config());
    let u = update("t-1", TaskState::Running);

    h.handle.update(u.clone(), h.log_path("t-1")).await;
    h.handle.update(u.clone(), h.log_path("t-1")).await;
    h.settle().await;

    assert_eq!(h.master.updates().len(), 1);
    // The log carries a single copy too.
    let records = UpdateLog::replay(&h.log_path("t-1")).unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn acknowledging_twice_is_idempotent() {
    let mut h = harness(fast_config());
    let u = update("t-1", TaskState::Finished);

    h.handle.update(u.clone(), h.log_path("t-1")).await;
    h.wait_for_updates(1).await;

    h.handle
        .acknowledge(u.framework_id.clone(), u.task_id.clone(), u.uuid.clone())
        .await;
    let (_, terminal) = h.wait_for_ack_event().await;
    assert!(terminal);

    h.handle
        .acknowledge(u.framework_id.clone(), u.task_id.clone(), u.uuid.clone())
        .await;
    h.settle().await;

    // No second ack event, no new master traffic.
    assert!(h.event_rx.try_recv().is_err());
    assert_eq!(h.master.updates().len(), 1);
}

#[tokio::test]
async fn updates_after_acked_terminal_are_dropped() {
    let mut h = harness(fast_config());
    let finished = update("t-1", TaskState::Finished);

    h.handle.update(finished.clone(), h.log_path("t-1")).await;
    h.wait_for_updates(1).await;
    h.handle
        .acknowledge(finished.framework_id.clone(), finished.task_id.clone(), finished.uuid.clone())
        .await;
    h.wait_for_ack_event().await;

    h.handle
        .update(update("t-1", TaskState::Running), h.log_path("t-1"))
        .await;
    h.settle().await;

    assert_eq!(h.master.updates().len(), 1);
}

#[tokio::test]
async fn mismatched_ack_uuid_is_ignored() {
    let h = harness(fast_config());
    let u = update("t-1", TaskState::Running);

    h.handle.update(u.clone(), h.log_path("t-1")).await;
    h.wait_for_updates(1).await;

    h.handle
        .acknowledge(u.framework_id.clone(), u.task_id.clone(), UpdateId::generate())
        .await;
    h.settle().await;

    // Still in flight: a later correct ack succeeds.
    let records = UpdateLog::replay(&h.log_path("t-1")).unwrap();
    assert_eq!(records.len(), 1, "bogus ack must not be checkpointed");
}

#[tokio::test]
async fn executor_death_synthesizes_lost_for_unfinished_tasks() {
    let h = harness(fast_config());
    let running = update("t-1", TaskState::Running);

    h.handle.update(running.clone(), h.log_path("t-1")).await;
    h.handle
        .acknowledge(running.framework_id.clone(), running.task_id.clone(), running.uuid.clone())
        .await;
    h.settle().await;

    h.handle
        .executor_terminated(
            FrameworkId::new("fw-1"),
            ExecutorId::new("e-1"),
            vec![TerminatedTask { task_id: TaskId::new("t-1"), log_path: h.log_path("t-1") }],
            None,
        )
        .await;

    let seen = h.wait_for_updates(2).await;
    assert_eq!(seen[1].state, TaskState::Lost);
    assert!(seen[1].message.as_deref().is_some_and(|m| m.contains("e-1")));
}

#[tokio::test]
async fn executor_death_with_nonzero_status_synthesizes_failed() {
    let h = harness(fast_config());

    h.handle
        .executor_terminated(
            FrameworkId::new("fw-1"),
            ExecutorId::new("e-1"),
            vec![TerminatedTask { task_id: TaskId::new("t-2"), log_path: h.log_path("t-2") }],
            Some(137),
        )
        .await;

    let seen = h.wait_for_updates(1).await;
    assert_eq!(seen[0].state, TaskState::Failed);
}

#[tokio::test]
async fn executor_death_skips_tasks_with_terminal_in_flight() {
    let h = harness(fast_config());
    let finished = update("t-1", TaskState::Finished);

    h.handle.update(finished, h.log_path("t-1")).await;
    h.wait_for_updates(1).await;

    h.handle
        .executor_terminated(
            FrameworkId::new("fw-1"),
            ExecutorId::new("e-1"),
            vec![TerminatedTask { task_id: TaskId::new("t-1"), log_path: h.log_path("t-1") }],
            None,
        )
        .await;
    h.settle().await;

    // No synthesized LOST on top of the pending FINISHED.
    assert_eq!(h.master.updates().len(), 1);
}

#[tokio::test]
async fn unacknowledged_updates_are_retransmitted_with_backoff() {
    let h = harness(UpdateManagerConfig {
        retry_initial: Duration::from_secs(10),
        retry_max: Duration::from_secs(600),
        framework_pending_soft_cap: 16,
        tick: Duration::from_millis(10),
    });
    let u = update("t-1", TaskState::Running);

    h.handle.update(u.clone(), h.log_path("t-1")).await;
    h.wait_for_updates(1).await;

    h.clock.advance(Duration::from_secs(11));
    let seen = h.wait_for_updates(2).await;
    assert_eq!(seen[0].uuid, seen[1].uuid);

    // Backoff doubled: 10s is no longer enough, 20s is.
    h.clock.advance(Duration::from_secs(11));
    h.settle().await;
    assert_eq!(h.master.updates().len(), 2);

    h.clock.advance(Duration::from_secs(10));
    h.wait_for_updates(3).await;
}

#[tokio::test]
async fn recovery_rearms_the_unacknowledged_tail() {
    let mut h = harness(fast_config());

    let running = update("t-1", TaskState::Running);
    let finished = update("t-1", TaskState::Finished);
    let records = vec![
        UpdateLogRecord::Update { update: running.clone() },
        UpdateLogRecord::Ack { uuid: running.uuid.clone() },
        UpdateLogRecord::Update { update: finished.clone() },
    ];

    h.handle
        .recover(vec![RecoveredStream {
            framework_id: FrameworkId::new("fw-1"),
            executor_id: ExecutorId::new("e-1"),
            task_id: TaskId::new("t-1"),
            log_path: h.log_path("t-1"),
            records,
        }])
        .await;

    // Only the unacked FINISHED goes out; the acked RUNNING is not re-sent.
    let seen = h.wait_for_updates(1).await;
    assert_eq!(seen[0].uuid, finished.uuid);

    h.handle
        .acknowledge(finished.framework_id.clone(), finished.task_id.clone(), finished.uuid.clone())
        .await;
    let (_, terminal) = h.wait_for_ack_event().await;
    assert!(terminal);
}

#[tokio::test]
async fn fully_acked_terminal_stream_recovers_closed() {
    let h = harness(fast_config());

    let finished = update("t-1", TaskState::Finished);
    let records = vec![
        UpdateLogRecord::Update { update: finished.clone() },
        UpdateLogRecord::Ack { uuid: finished.uuid.clone() },
    ];

    h.handle
        .recover(vec![RecoveredStream {
            framework_id: FrameworkId::new("fw-1"),
            executor_id: ExecutorId::new("e-1"),
            task_id: TaskId::new("t-1"),
            log_path: h.log_path("t-1"),
            records,
        }])
        .await;
    h.settle().await;

    // Nothing re-reported for a terminal-acked task.
    assert!(h.master.updates().is_empty());
}
