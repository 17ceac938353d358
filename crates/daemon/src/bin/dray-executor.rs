// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command executor: runs a single inline-command task under the agent.
//!
//! Launched by the agent's isolator with `DRAY_AGENT_SOCKET`,
//! `DRAY_FRAMEWORK_ID`, and `DRAY_EXECUTOR_ID` in the environment.
//! Connects back over the executor socket, registers, runs the command
//! of each assigned task via `sh -c`, and reports state transitions.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use dray_core::{
    ExecutorCommand, ExecutorId, ExecutorMessage, FrameworkId, StatusUpdate, TaskId, TaskInfo,
    TaskState,
};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

struct Env {
    socket: String,
    framework_id: FrameworkId,
    executor_id: ExecutorId,
}

fn read_env() -> Result<Env, String> {
    let socket = std::env::var("DRAY_AGENT_SOCKET")
        .map_err(|_| "DRAY_AGENT_SOCKET not set".to_string())?;
    let framework_id = std::env::var("DRAY_FRAMEWORK_ID")
        .map_err(|_| "DRAY_FRAMEWORK_ID not set".to_string())?;
    let executor_id = std::env::var("DRAY_EXECUTOR_ID")
        .map_err(|_| "DRAY_EXECUTOR_ID not set".to_string())?;
    Ok(Env {
        socket,
        framework_id: FrameworkId::new(framework_id),
        executor_id: ExecutorId::new(executor_id),
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let env = match read_env() {
        Ok(env) => env,
        Err(message) => {
            eprintln!("dray-executor: {message}");
            std::process::exit(1);
        }
    };

    if let Err(message) = run(env).await {
        eprintln!("dray-executor: {message}");
        std::process::exit(1);
    }
}

async fn run(env: Env) -> Result<(), String> {
    let stream = UnixStream::connect(&env.socket)
        .await
        .map_err(|e| format!("connecting to agent at {}: {e}", env.socket))?;
    let (read_half, mut write_half) = stream.into_split();

    // Serialize outbound messages through one channel so task bodies and
    // the control loop never interleave partial lines.
    let (out_tx, mut out_rx) = mpsc::channel::<ExecutorMessage>(64);
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let Ok(mut line) = serde_json::to_vec(&message) else {
                continue;
            };
            line.push(b'\n');
            if write_half.write_all(&line).await.is_err() {
                return;
            }
        }
    });

    out_tx
        .send(ExecutorMessage::Register {
            framework_id: env.framework_id.clone(),
            executor_id: env.executor_id.clone(),
        })
        .await
        .map_err(|_| "agent connection closed".to_string())?;

    let mut running: HashMap<TaskId, tokio::task::JoinHandle<()>> = HashMap::new();
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let command: ExecutorCommand = match serde_json::from_str(line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("dray-executor: unparseable command: {e}");
                continue;
            }
        };

        match command {
            ExecutorCommand::Registered { .. } | ExecutorCommand::Reregistered { .. } => {}
            ExecutorCommand::RunTask { framework_id, task } => {
                let handle = spawn_task(framework_id, env.executor_id.clone(), task, out_tx.clone());
                running.retain(|_, h| !h.is_finished());
                if let Some((task_id, handle)) = handle {
                    running.insert(task_id, handle);
                }
            }
            ExecutorCommand::KillTask { framework_id, task_id } => {
                if let Some(handle) = running.remove(&task_id) {
                    handle.abort();
                    let update = StatusUpdate::new(
                        framework_id,
                        env.executor_id.clone(),
                        task_id,
                        TaskState::Killed,
                        epoch_ms(),
                    );
                    let _ = out_tx.send(ExecutorMessage::StatusUpdate { update }).await;
                }
            }
            ExecutorCommand::StatusUpdateAck { .. } => {
                // At-least-once bookkeeping lives in the agent; nothing
                // to clear here since updates are not buffered locally.
            }
            ExecutorCommand::FrameworkMessage { .. } => {
                // Command tasks have no scheduler channel to relay to.
            }
            ExecutorCommand::Shutdown => {
                for (_, handle) in running.drain() {
                    handle.abort();
                }
                break;
            }
        }
    }

    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

/// Run one task's command and report its lifecycle.
fn spawn_task(
    framework_id: FrameworkId,
    executor_id: ExecutorId,
    task: TaskInfo,
    out_tx: mpsc::Sender<ExecutorMessage>,
) -> Option<(TaskId, tokio::task::JoinHandle<()>)> {
    let task_id = task.task_id.clone();
    let Some(command) = task.command.clone() else {
        let update = StatusUpdate::new(
            framework_id,
            executor_id,
            task_id,
            TaskState::Failed,
            epoch_ms(),
        )
        .with_message("task has no command");
        let tx = out_tx;
        tokio::spawn(async move {
            let _ = tx.send(ExecutorMessage::StatusUpdate { update }).await;
        });
        return None;
    };

    let id_for_map = task_id.clone();
    let handle = tokio::spawn(async move {
        let send_state = |state: TaskState, message: Option<String>| {
            let mut update = StatusUpdate::new(
                framework_id.clone(),
                executor_id.clone(),
                task_id.clone(),
                state,
                epoch_ms(),
            );
            update.message = message;
            let tx = out_tx.clone();
            async move {
                let _ = tx.send(ExecutorMessage::StatusUpdate { update }).await;
            }
        };

        send_state(TaskState::Running, None).await;

        let result = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command.value)
            .envs(command.env.clone())
            .output()
            .await;

        match result {
            Ok(output) if output.status.success() => {
                send_state(TaskState::Finished, None).await;
            }
            Ok(output) => {
                let code = output.status.code().unwrap_or(-1);
                send_state(TaskState::Failed, Some(format!("command exited with status {code}")))
                    .await;
            }
            Err(e) => {
                send_state(TaskState::Failed, Some(format!("command failed to start: {e}")))
                    .await;
            }
        }
    });

    Some((id_for_map, handle))
}
