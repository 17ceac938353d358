// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handlers for messages from executor processes.

use super::{Agent, AgentError};
use dray_core::{
    Clock, ExecutorCommand, ExecutorId, ExecutorMessage, FrameworkId, SlaveMessage, StatusUpdate,
    TaskId, TaskSnapshot, TimerId,
};
use dray_engine::{ExecutorConn, Gc, Isolator, MasterLink};
use tracing::{debug, info, warn};

impl<I, M, G, C> Agent<I, M, G, C>
where
    I: Isolator,
    M: MasterLink,
    G: Gc,
    C: Clock,
{
    pub(crate) async fn handle_executor_message(
        &mut self,
        conn: ExecutorConn,
        message: ExecutorMessage,
    ) -> Result<(), AgentError> {
        match message {
            ExecutorMessage::Register { framework_id, executor_id } => {
                self.handle_executor_register(conn, framework_id, executor_id).await
            }
            ExecutorMessage::Reregister { framework_id, executor_id, tasks, updates } => {
                self.handle_executor_reregister(conn, framework_id, executor_id, tasks, updates)
                    .await
            }
            ExecutorMessage::StatusUpdate { update } => self.handle_status_update(update).await,
            ExecutorMessage::FrameworkMessage { framework_id, executor_id, data } => {
                self.handle_executor_framework_message(framework_id, executor_id, data);
                Ok(())
            }
            ExecutorMessage::Custom => {
                debug!("ignoring unknown executor message");
                Ok(())
            }
        }
    }

    async fn handle_executor_register(
        &mut self,
        conn: ExecutorConn,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
    ) -> Result<(), AgentError> {
        let Some(slave_id) = self.slave_id.clone() else {
            warn!(%framework_id, %executor_id, "executor registered before the agent has an id");
            conn.send(ExecutorCommand::Shutdown);
            return Ok(());
        };
        let Some(executor) = self.registry.executor_mut(&framework_id, &executor_id) else {
            warn!(%framework_id, %executor_id, "registration from unknown executor, shutting it down");
            conn.send(ExecutorCommand::Shutdown);
            return Ok(());
        };
        if executor.shutting_down {
            info!(%framework_id, %executor_id, "late registration from executor in shutdown");
            conn.send(ExecutorCommand::Shutdown);
            return Ok(());
        }

        info!(%framework_id, %executor_id, "executor registered");
        executor.conn = Some(conn.clone());
        let container_id = executor.container_id.clone();
        let endpoint = format!("executor@{}", executor.pid.unwrap_or_default());

        self.checkpoint(
            &self
                .layout
                .executor_pid_path(&slave_id, &framework_id, &executor_id, &container_id),
            &endpoint,
        )
        .await?;

        conn.send(ExecutorCommand::Registered {
            slave_id,
            framework_id: framework_id.clone(),
            executor_id: executor_id.clone(),
        });

        self.flush_queued_tasks(&framework_id, &executor_id);
        Ok(())
    }

    async fn handle_executor_reregister(
        &mut self,
        conn: ExecutorConn,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        tasks: Vec<TaskSnapshot>,
        updates: Vec<StatusUpdate>,
    ) -> Result<(), AgentError> {
        let Some(slave_id) = self.slave_id.clone() else {
            conn.send(ExecutorCommand::Shutdown);
            return Ok(());
        };
        let Some(executor) = self.registry.executor_mut(&framework_id, &executor_id) else {
            warn!(%framework_id, %executor_id, "re-registration from unknown executor, shutting it down");
            conn.send(ExecutorCommand::Shutdown);
            return Ok(());
        };

        info!(
            %framework_id,
            %executor_id,
            tasks = tasks.len(),
            updates = updates.len(),
            "executor re-registered"
        );
        executor.conn = Some(conn.clone());
        let container_id = executor.container_id.clone();
        self.scheduler
            .cancel_timer(&TimerId::reregister_deadline(&framework_id, &executor_id));

        // Reconcile the executor's view of its tasks with ours.
        for snapshot in &tasks {
            executor.update_task_state(&snapshot.task_id, snapshot.state);
        }

        conn.send(ExecutorCommand::Reregistered { slave_id: slave_id.clone() });

        // Unacknowledged updates the executor held across the restart go
        // through the normal pipeline; UUID dedup drops what we already
        // have.
        for update in updates {
            self.registry.stats.valid_status_updates += 1;
            let path = self.update_log_path(&slave_id, &update, &container_id);
            self.updates.update(update, path).await;
        }

        self.flush_queued_tasks(&framework_id, &executor_id);
        Ok(())
    }

    /// Dispatch everything still queued on a (re)registered executor.
    fn flush_queued_tasks(&mut self, framework_id: &FrameworkId, executor_id: &ExecutorId) {
        let Some(executor) = self.registry.executor_mut(framework_id, executor_id) else {
            return;
        };
        let queued: Vec<TaskId> = executor.queued_tasks.keys().cloned().collect();
        for task_id in queued {
            Self::dispatch_queued_task(executor, framework_id, &task_id);
        }
    }

    async fn handle_status_update(&mut self, update: StatusUpdate) -> Result<(), AgentError> {
        let Some(slave_id) = self.slave_id.clone() else {
            warn!(task_id = %update.task_id, "status update before the agent has an id, dropping");
            self.registry.stats.invalid_status_updates += 1;
            return Ok(());
        };

        let Some(executor) = self
            .registry
            .executor_mut(&update.framework_id, &update.executor_id)
        else {
            warn!(
                framework_id = %update.framework_id,
                executor_id = %update.executor_id,
                task_id = %update.task_id,
                "status update from unknown executor, dropping"
            );
            self.registry.stats.invalid_status_updates += 1;
            return Ok(());
        };

        debug!(
            task_id = %update.task_id,
            state = %update.state,
            "status update from executor"
        );
        let container_id = executor.container_id.clone();
        let known = executor.update_task_state(&update.task_id, update.state);
        if known {
            self.registry.stats.valid_status_updates += 1;
        } else {
            // Not fatal: reconciliation can race the registry view, but
            // it is not a valid update either.
            self.registry.stats.invalid_status_updates += 1;
            debug!(task_id = %update.task_id, "update for task missing from the registry");
        }

        let path = self.update_log_path(&slave_id, &update, &container_id);
        self.updates.update(update, path).await;
        Ok(())
    }

    fn handle_executor_framework_message(
        &mut self,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: String,
    ) {
        if self
            .registry
            .framework(&framework_id)
            .and_then(|f| f.executor(&executor_id))
            .is_none()
        {
            warn!(%framework_id, %executor_id, "framework message from unknown executor");
            self.registry.stats.invalid_framework_messages += 1;
            return;
        }
        self.registry.stats.valid_framework_messages += 1;
        self.master
            .send(SlaveMessage::FrameworkMessage { framework_id, executor_id, data });
    }
}
