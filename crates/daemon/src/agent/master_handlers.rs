// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handlers for messages from the master.

use super::{Agent, AgentError, ConnectionState};
use dray_core::{
    Clock, ContainerId, ExecutorCommand, ExecutorId, ExecutorInfo, FrameworkId, FrameworkInfo,
    MasterMessage, SlaveId, SlaveMessage, StatusUpdate, TaskId, TaskInfo, TaskState, TimerId,
};
use dray_engine::{command_executor, Executor, Gc, Isolator, LaunchConfig, MasterLink};
use tracing::{debug, info, warn};

impl<I, M, G, C> Agent<I, M, G, C>
where
    I: Isolator,
    M: MasterLink,
    G: Gc,
    C: Clock,
{
    pub(crate) async fn handle_master_message(
        &mut self,
        message: MasterMessage,
    ) -> Result<(), AgentError> {
        match message {
            MasterMessage::Registered { slave_id } => self.handle_registered(slave_id).await,
            MasterMessage::Reregistered { slave_id } => {
                self.handle_reregistered(slave_id);
                Ok(())
            }
            MasterMessage::RunTask { framework_id, framework, framework_pid, task } => {
                self.handle_run_task(framework_id, framework, framework_pid, task).await
            }
            MasterMessage::KillTask { framework_id, task_id } => {
                self.handle_kill_task(framework_id, task_id).await;
                Ok(())
            }
            MasterMessage::StatusUpdateAck { framework_id, task_id, uuid } => {
                self.updates.acknowledge(framework_id, task_id, uuid).await;
                Ok(())
            }
            MasterMessage::ShutdownFramework { framework_id } => {
                self.shutdown_framework(&framework_id).await;
                Ok(())
            }
            MasterMessage::FrameworkMessage { framework_id, executor_id, data } => {
                self.handle_framework_message(framework_id, executor_id, data);
                Ok(())
            }
            MasterMessage::Ping => {
                self.master.send(SlaveMessage::Pong);
                Ok(())
            }
            MasterMessage::Shutdown => {
                info!("master asked the agent to shut down all work");
                for framework_id in self.registry.framework_ids() {
                    self.shutdown_framework(&framework_id).await;
                }
                Ok(())
            }
            MasterMessage::Custom => {
                debug!("ignoring unknown master message");
                Ok(())
            }
        }
    }

    async fn handle_registered(&mut self, slave_id: SlaveId) -> Result<(), AgentError> {
        match &self.slave_id {
            Some(existing) if existing != &slave_id => {
                warn!(%slave_id, existing = %existing, "master assigned a different agent id, ignoring");
                return Ok(());
            }
            Some(_) => {}
            None => {
                info!(%slave_id, "registered with master");
                self.info.id = Some(slave_id.clone());
                self.slave_id = Some(slave_id.clone());
                // Durable identity: a restart re-registers as this agent.
                self.checkpoint(&self.layout.latest_slave_path(), &slave_id).await?;
                self.checkpoint(&self.layout.slave_info_path(&slave_id), &self.info)
                    .await?;
            }
        }

        self.finish_registration();
        Ok(())
    }

    fn handle_reregistered(&mut self, slave_id: SlaveId) {
        if self.slave_id.as_ref() != Some(&slave_id) {
            warn!(%slave_id, "re-registration for a different agent id, ignoring");
            return;
        }
        info!(%slave_id, "re-registered with master");
        self.finish_registration();
    }

    fn finish_registration(&mut self) {
        self.connection = ConnectionState::Registered;
        self.scheduler.cancel_timer(&TimerId::registration_retry());
        for framework_id in self.registry.framework_ids() {
            self.scheduler
                .cancel_timer(&TimerId::framework_failover(&framework_id));
        }
    }

    async fn handle_run_task(
        &mut self,
        framework_id: FrameworkId,
        framework_info: FrameworkInfo,
        framework_pid: String,
        task: TaskInfo,
    ) -> Result<(), AgentError> {
        if !self.recovered {
            warn!(%framework_id, task_id = %task.task_id, "task before recovery settled, dropping");
            self.registry.stats.invalid_tasks += 1;
            return Ok(());
        }
        let Some(slave_id) = self.slave_id.clone() else {
            warn!(%framework_id, task_id = %task.task_id, "task before registration, dropping");
            self.registry.stats.invalid_tasks += 1;
            return Ok(());
        };

        let is_new_framework = self.registry.framework(&framework_id).is_none();
        if is_new_framework {
            self.checkpoint(
                &self.layout.framework_info_path(&slave_id, &framework_id),
                &framework_info,
            )
            .await?;
        }
        let framework =
            self.registry
                .ensure_framework(&framework_id, &framework_info, &framework_pid);

        if framework.shutting_down {
            warn!(%framework_id, task_id = %task.task_id, "task for framework in shutdown");
            let executor_id = task
                .executor
                .as_ref()
                .map(|e| e.executor_id.clone())
                .unwrap_or_else(|| ExecutorId::new(task.task_id.as_str()));
            self.reply_lost(&slave_id, &framework_id, &executor_id, &task.task_id, None)
                .await;
            return Ok(());
        }

        // Derive or read the executor for this task. A bare command
        // synthesizes a command executor.
        let executor_info = match &task.executor {
            Some(info) => info.clone(),
            None => command_executor(&framework_id, &task, &self.config.launcher_dir),
        };
        let executor_id = executor_info.executor_id.clone();

        match framework.executor_mut(&executor_id) {
            Some(executor) => {
                if executor.shutting_down {
                    info!(%framework_id, %executor_id, task_id = %task.task_id, "executor shutting down, task lost");
                    let container_id = executor.container_id.clone();
                    self.reply_lost(
                        &slave_id,
                        &framework_id,
                        &executor_id,
                        &task.task_id,
                        Some(&container_id),
                    )
                    .await;
                    return Ok(());
                }
                if executor.has_task(&task.task_id) {
                    warn!(%framework_id, task_id = %task.task_id, "duplicate task id from master, dropping");
                    self.registry.stats.invalid_tasks += 1;
                    return Ok(());
                }

                let container_id = executor.container_id.clone();
                self.checkpoint(
                    &self.layout.task_info_path(
                        &slave_id,
                        &framework_id,
                        &executor_id,
                        &container_id,
                        &task.task_id,
                    ),
                    &task,
                )
                .await?;

                let Some(executor) = self.registry.executor_mut(&framework_id, &executor_id)
                else {
                    return Ok(());
                };
                let task_id = task.task_id.clone();
                executor.add_queued_task(task);
                if executor.is_registered() {
                    Self::dispatch_queued_task(executor, &framework_id, &task_id);
                }
            }
            None => {
                self.launch_executor(&slave_id, &framework_id, executor_info, task)
                    .await?;
            }
        }
        Ok(())
    }

    /// Create the executor record, checkpoint it, and launch the process.
    async fn launch_executor(
        &mut self,
        slave_id: &SlaveId,
        framework_id: &FrameworkId,
        executor_info: ExecutorInfo,
        task: TaskInfo,
    ) -> Result<(), AgentError> {
        let executor_id = executor_info.executor_id.clone();
        let container_id = ContainerId::generate();
        let sandbox = self
            .layout
            .sandbox_dir(slave_id, framework_id, &executor_id, &container_id);

        self.checkpoint(
            &self.layout.latest_run_path(slave_id, framework_id, &executor_id),
            &container_id,
        )
        .await?;
        self.checkpoint(
            &self
                .layout
                .executor_info_path(slave_id, framework_id, &executor_id, &container_id),
            &executor_info,
        )
        .await?;
        self.checkpoint(
            &self.layout.task_info_path(
                slave_id,
                framework_id,
                &executor_id,
                &container_id,
                &task.task_id,
            ),
            &task,
        )
        .await?;

        let mut executor = Executor::new(executor_info.clone(), container_id.clone(), sandbox.clone());
        let task_resources = task.resources;
        executor.add_queued_task(task);

        let env = vec![
            ("DRAY_FRAMEWORK_ID".to_string(), framework_id.to_string()),
            ("DRAY_EXECUTOR_ID".to_string(), executor_id.to_string()),
            (
                "DRAY_AGENT_SOCKET".to_string(),
                self.config.socket_path().display().to_string(),
            ),
            ("DRAY_SANDBOX".to_string(), sandbox.display().to_string()),
        ];
        let launch = self
            .isolator
            .launch(LaunchConfig {
                framework_id: framework_id.clone(),
                executor: executor_info,
                container_id: container_id.clone(),
                sandbox,
                env,
                resources: executor.resources + task_resources,
            })
            .await;

        match launch {
            Ok(launched) => {
                executor.pid = Some(launched.pid);
                self.checkpoint(
                    &self
                        .layout
                        .forked_pid_path(slave_id, framework_id, &executor_id, &container_id),
                    &launched.pid,
                )
                .await?;
                self.reaper.monitor(launched.pid);
                if let Some(framework) = self.registry.framework_mut(framework_id) {
                    framework.add_executor(executor);
                }
            }
            Err(e) => {
                warn!(%framework_id, %executor_id, error = %e, "executor launch failed");
                // Launch failure fails the queued tasks through the
                // normal pipeline, then the executor record is dropped.
                let tasks: Vec<TaskId> = executor.queued_tasks.keys().cloned().collect();
                for task_id in tasks {
                    let update = StatusUpdate::new(
                        framework_id.clone(),
                        executor_id.clone(),
                        task_id.clone(),
                        TaskState::Failed,
                        self.clock.epoch_ms(),
                    )
                    .with_message(format!("executor launch failed: {e}"));
                    let path = self.update_log_path(slave_id, &update, &container_id);
                    self.updates.update(update, path).await;
                }
            }
        }
        Ok(())
    }

    /// Dispatch one queued task to a registered executor.
    pub(crate) fn dispatch_queued_task(
        executor: &mut Executor,
        framework_id: &FrameworkId,
        task_id: &TaskId,
    ) {
        let Some(conn) = executor.conn.clone() else {
            return;
        };
        if let Some(task) = executor.launch_task(task_id) {
            conn.send(ExecutorCommand::RunTask {
                framework_id: framework_id.clone(),
                task: task.info.clone(),
            });
        }
    }

    async fn handle_kill_task(&mut self, framework_id: FrameworkId, task_id: TaskId) {
        let Some(slave_id) = self.slave_id.clone() else {
            return;
        };
        let Some(framework) = self.registry.framework_mut(&framework_id) else {
            warn!(%framework_id, %task_id, "kill for unknown framework, dropping");
            self.registry.stats.invalid_tasks += 1;
            return;
        };

        let Some(executor_id) = framework
            .executors
            .values()
            .find(|e| e.has_task(&task_id))
            .map(|e| e.executor_id.clone())
        else {
            warn!(%framework_id, %task_id, "kill for unknown task, dropping");
            self.registry.stats.invalid_tasks += 1;
            return;
        };

        let Some(executor) = framework.executor_mut(&executor_id) else {
            return;
        };
        let container_id = executor.container_id.clone();

        if executor.remove_queued_task(&task_id).is_some() {
            // Never dispatched: answer with TASK_KILLED ourselves.
            info!(%framework_id, %task_id, "killed queued task");
            let update = StatusUpdate::new(
                framework_id.clone(),
                executor_id.clone(),
                task_id.clone(),
                TaskState::Killed,
                self.clock.epoch_ms(),
            )
            .with_message("killed before delivery to executor");
            let path = self.update_log_path(&slave_id, &update, &container_id);
            self.updates.update(update, path).await;
            return;
        }

        match &executor.conn {
            Some(conn) => {
                conn.send(ExecutorCommand::KillTask {
                    framework_id: framework_id.clone(),
                    task_id,
                });
            }
            None => {
                // Dispatch pending registration; the kill races the
                // launch. The shutdown path reconciles the task.
                warn!(%framework_id, %task_id, "kill before executor registration, shutting executor down");
                self.shutdown_executor(&framework_id, &executor_id).await;
            }
        }
    }

    fn handle_framework_message(
        &mut self,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: String,
    ) {
        let Some(executor) = self
            .registry
            .framework(&framework_id)
            .and_then(|f| f.executor(&executor_id))
        else {
            warn!(%framework_id, %executor_id, "framework message for unknown executor");
            self.registry.stats.invalid_framework_messages += 1;
            return;
        };

        match &executor.conn {
            Some(conn) => {
                conn.send(ExecutorCommand::FrameworkMessage { data });
                self.registry.stats.valid_framework_messages += 1;
            }
            None => {
                warn!(%framework_id, %executor_id, "framework message before executor registration");
                self.registry.stats.invalid_framework_messages += 1;
            }
        }
    }

    /// Synthesize an immediate TASK_LOST reply (executor or framework
    /// cannot accept the task).
    async fn reply_lost(
        &mut self,
        slave_id: &SlaveId,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        task_id: &TaskId,
        container_id: Option<&ContainerId>,
    ) {
        let update = StatusUpdate::new(
            framework_id.clone(),
            executor_id.clone(),
            task_id.clone(),
            TaskState::Lost,
            self.clock.epoch_ms(),
        )
        .with_message("agent cannot accept this task");

        // Without a run there is no stream directory; park the log under
        // a synthetic run named after the task.
        let fallback = ContainerId::new(format!("lost-{}", task_id));
        let container_id = container_id.unwrap_or(&fallback);
        let path = self.update_log_path(slave_id, &update, container_id);
        self.updates.update(update, path).await;
    }
}
