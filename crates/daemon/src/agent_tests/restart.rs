// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent restart scenarios: recovery from the checkpoint tree with
//! reconnect and cleanup policies.

use super::*;
use dray_core::TaskSnapshot;

/// Run one task to RUNNING (acked) on a fresh agent over `dir`, then
/// abandon the agent as if the process was SIGKILLed.
async fn run_to_running(dir: Arc<TempDir>) -> StatusUpdate {
    let mut t = agent_over(Arc::clone(&dir), RecoverPolicy::Reconnect);
    t.register().await;
    t.run_task("t-1").await;
    let _rx = t.connect_executor("t-1").await;
    let running = t.executor_update("t-1", TaskState::Running).await;
    t.wait_for_updates(1).await;
    t.ack(&running).await;
    t.settle().await;
    running
}

fn agent_over(dir: Arc<TempDir>, recover: RecoverPolicy) -> TestAgent {
    let config = test_config(&dir, recover);
    build_agent(dir, config)
}

#[tokio::test]
async fn reconnect_restart_keeps_the_task_and_resends_nothing() {
    let dir = Arc::new(TempDir::new().unwrap());
    run_to_running(Arc::clone(&dir)).await;

    let mut t = agent_over(Arc::clone(&dir), RecoverPolicy::Reconnect);
    t.agent.recover().await.unwrap();

    // Identity and task survived.
    assert_eq!(t.agent.slave_id(), Some(&SlaveId::new("s-1")));
    let executor_pid = {
        let registry = t.agent.registry();
        let executor = registry
            .framework(&FrameworkId::new("fw-1"))
            .unwrap()
            .executor(&ExecutorId::new("t-1"))
            .unwrap();
        assert_eq!(
            executor.launched_tasks[&TaskId::new("t-1")].state,
            TaskState::Running
        );
        executor.pid
    };
    assert_eq!(executor_pid, Some(1000));

    // Executor re-registers within the deadline, carrying its view.
    let (tx, mut rx) = mpsc::channel(16);
    t.agent
        .handle_event(AgentEvent::Executor {
            conn: ExecutorConn::new(tx),
            message: ExecutorMessage::Reregister {
                framework_id: FrameworkId::new("fw-1"),
                executor_id: ExecutorId::new("t-1"),
                tasks: vec![TaskSnapshot {
                    task_id: TaskId::new("t-1"),
                    framework_id: FrameworkId::new("fw-1"),
                    executor_id: ExecutorId::new("t-1"),
                    state: TaskState::Running,
                    resources: Resources::new(0.5, 64, 0),
                }],
                updates: vec![],
            },
        })
        .await
        .unwrap();
    assert!(matches!(
        rx.recv().await.unwrap(),
        ExecutorCommand::Reregistered { .. }
    ));

    // Re-registration with the master carries the inventory.
    t.agent
        .handle_event(AgentEvent::MasterDetected { master: "m:5050".into() })
        .await
        .unwrap();
    assert_eq!(t.agent.connection_state(), ConnectionState::Reregistering);
    let reregister = t
        .master
        .sent()
        .into_iter()
        .find_map(|m| match m {
            SlaveMessage::Reregister { tasks, .. } => Some(tasks),
            _ => None,
        })
        .expect("no reregister sent");
    assert_eq!(reregister.len(), 1);
    assert_eq!(reregister[0].state, TaskState::Running);

    t.agent
        .handle_event(AgentEvent::Master(MasterMessage::Reregistered {
            slave_id: SlaveId::new("s-1"),
        }))
        .await
        .unwrap();
    assert_eq!(t.agent.connection_state(), ConnectionState::Registered);

    // The acked TASK_RUNNING is not re-reported.
    t.settle().await;
    assert!(t.master.updates().is_empty());

    // And the reregister deadline no longer fires.
    t.clock.advance(Duration::from_secs(30));
    t.agent.handle_timers().await.unwrap();
    assert!(t.isolator.destroys().is_empty());
}

#[tokio::test]
async fn reconnect_restart_resends_the_unacked_update_with_its_uuid() {
    let dir = Arc::new(TempDir::new().unwrap());
    let running = {
        let mut t = agent_over(Arc::clone(&dir), RecoverPolicy::Reconnect);
        t.register().await;
        t.run_task("t-1").await;
        let _rx = t.connect_executor("t-1").await;
        let running = t.executor_update("t-1", TaskState::Running).await;
        t.wait_for_updates(1).await;
        // Crash before the ack arrives.
        running
    };

    let mut t = agent_over(Arc::clone(&dir), RecoverPolicy::Reconnect);
    t.agent.recover().await.unwrap();

    // The recovered manager re-forwards the same update (same uuid).
    let seen = t.wait_for_updates(1).await;
    assert_eq!(seen[0].uuid, running.uuid);
    assert_eq!(seen[0].state, TaskState::Running);

    // Acking it now clears the stream.
    t.ack(&running).await;
    t.settle().await;
}

#[tokio::test]
async fn missed_reregistration_deadline_shuts_the_executor_down() {
    let dir = Arc::new(TempDir::new().unwrap());
    run_to_running(Arc::clone(&dir)).await;

    let mut t = agent_over(Arc::clone(&dir), RecoverPolicy::Reconnect);
    t.agent.recover().await.unwrap();

    // No re-registration before the deadline.
    t.clock.advance(Duration::from_secs(11));
    t.agent.handle_timers().await.unwrap();

    // Unregistered executor goes straight to destroy.
    assert_eq!(
        t.isolator.destroys(),
        vec![(FrameworkId::new("fw-1"), ExecutorId::new("t-1"))]
    );
}

#[tokio::test]
async fn cleanup_restart_shuts_everything_down_and_reports_lost() {
    let dir = Arc::new(TempDir::new().unwrap());
    run_to_running(Arc::clone(&dir)).await;

    let mut t = agent_over(Arc::clone(&dir), RecoverPolicy::Cleanup);
    t.agent.recover().await.unwrap();

    // Every recovered executor is shut down; none had a connection, so
    // the isolator destroys them immediately.
    assert_eq!(
        t.isolator.destroys(),
        vec![(FrameworkId::new("fw-1"), ExecutorId::new("t-1"))]
    );

    // The reaper observes the death; the non-terminal task surfaces as a
    // synthesized terminal update which the master then acks.
    t.agent
        .handle_event(AgentEvent::ProcessExited { pid: 1000, status: None })
        .await
        .unwrap();

    let seen = t.wait_for_updates(1).await;
    assert_eq!(seen[0].state, TaskState::Lost);
    assert_eq!(seen[0].task_id, TaskId::new("t-1"));

    let lost = seen[0].clone();
    t.ack(&lost).await;
    t.settle().await;

    // Nothing is left to drive.
    let registry = t.agent.registry();
    let framework = registry.framework(&FrameworkId::new("fw-1")).unwrap();
    assert!(framework.executors.is_empty());
}

#[tokio::test]
async fn terminal_acked_task_is_not_rereported_after_restart() {
    let dir = Arc::new(TempDir::new().unwrap());
    {
        let mut t = agent_over(Arc::clone(&dir), RecoverPolicy::Reconnect);
        t.register().await;
        t.run_task("t-1").await;
        let _rx = t.connect_executor("t-1").await;
        let running = t.executor_update("t-1", TaskState::Running).await;
        t.wait_for_updates(1).await;
        t.ack(&running).await;
        let finished = t.executor_update("t-1", TaskState::Finished).await;
        t.wait_for_updates(2).await;
        t.ack(&finished).await;
        t.settle().await;
    }

    let mut t = agent_over(Arc::clone(&dir), RecoverPolicy::Reconnect);
    t.agent.recover().await.unwrap();
    t.settle().await;

    // The stream recovered closed: no re-report of the terminal state.
    assert!(t.master.updates().is_empty());

    // The task recovered into the completed ring, not the live set.
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
