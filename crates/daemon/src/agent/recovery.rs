// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recovery protocol: rebuild state from the checkpoint tree before
//! accepting new work.
//!
//! Order matters: agent identity, then the registry, then the
//! status-update streams, then isolator re-attachment, and only then the
//! per-executor reconnect-or-cleanup decision. Master registration
//! starts after recovery resolves.

use super::{Agent, AgentError};
use crate::config::RecoverPolicy;
use dray_core::{Clock, ExecutorId, FrameworkId, TaskState, TimerId};
use dray_engine::{
    Executor, Gc, Isolator, MasterLink, RecoveredProcess, RecoveredStream, Task,
};
use dray_storage::{RecoveredRun, RecoveredSlave, UpdateLogRecord};
use std::collections::HashMap;
use tracing::{info, warn};

impl<I, M, G, C> Agent<I, M, G, C>
where
    I: Isolator,
    M: MasterLink,
    G: Gc,
    C: Clock,
{
    /// Rebuild in-memory state from disk. Errors abort under `strict`;
    /// otherwise damaged entities are shut down or skipped.
    pub(crate) async fn recover(&mut self) -> Result<(), AgentError> {
        let recovered = match dray_storage::recover(&self.layout) {
            Ok(recovered) => recovered,
            Err(e) if self.config.strict => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "checkpoint recovery failed, starting cold");
                None
            }
        };

        let Some(slave) = recovered else {
            info!("cold start");
            self.recovered = true;
            return Ok(());
        };

        info!(slave_id = %slave.slave_id, "warm start, rebuilding from checkpoint");
        self.slave_id = Some(slave.slave_id.clone());
        match &slave.info {
            Some(info) => self.info = info.clone(),
            None => {
                let message = "checkpointed agent id without slave.info".to_string();
                if self.config.strict {
                    return Err(AgentError::Recovery(message));
                }
                warn!(message);
                self.info.id = Some(slave.slave_id.clone());
            }
        }

        let (streams, processes) = self.rebuild_registry(&slave)?;

        self.updates.recover(streams).await;

        if let Err(e) = self.isolator.recover(processes).await {
            if self.config.strict {
                return Err(AgentError::Recovery(format!("isolator recovery: {e}")));
            }
            warn!(error = %e, "isolator recovery failed, continuing");
        }

        self.settle_recovered_executors().await;

        self.recovered = true;
        info!("recovery complete, accepting work");
        Ok(())
    }

    /// Rebuild frameworks/executors/tasks; collect the update streams and
    /// live pids for the other recovery steps.
    fn rebuild_registry(
        &mut self,
        slave: &RecoveredSlave,
    ) -> Result<(Vec<RecoveredStream>, Vec<RecoveredProcess>), AgentError> {
        let mut streams = Vec::new();
        let mut processes = Vec::new();

        for framework in &slave.frameworks {
            let Some(framework_info) = &framework.info else {
                let message =
                    format!("framework {} has no framework.info", framework.framework_id);
                if self.config.strict {
                    return Err(AgentError::Recovery(message));
                }
                warn!(message);
                continue;
            };
            self.registry
                .ensure_framework(&framework.framework_id, framework_info, "");

            for recovered_executor in &framework.executors {
                let Some(run) = recovered_executor.current_run() else {
                    warn!(
                        framework_id = %framework.framework_id,
                        executor_id = %recovered_executor.executor_id,
                        "executor has no current run, skipping"
                    );
                    continue;
                };
                let Some(executor_info) = run.info.clone() else {
                    warn!(
                        framework_id = %framework.framework_id,
                        executor_id = %recovered_executor.executor_id,
                        "run has no executor.info, skipping"
                    );
                    continue;
                };

                let sandbox = self.layout.sandbox_dir(
                    &slave.slave_id,
                    &framework.framework_id,
                    &recovered_executor.executor_id,
                    &run.container_id,
                );
                let mut executor =
                    Executor::new(executor_info, run.container_id.clone(), sandbox);
                executor.pid = run.forked_pid;

                rebuild_tasks(&mut executor, run, &framework.framework_id, &mut streams);
                processes.push(RecoveredProcess {
                    framework_id: framework.framework_id.clone(),
                    executor_id: recovered_executor.executor_id.clone(),
                    pid: run.forked_pid,
                });

                if let Some(f) = self.registry.framework_mut(&framework.framework_id) {
                    f.add_executor(executor);
                }
            }
        }

        Ok((streams, processes))
    }

    /// Apply the recovery policy to every recovered executor.
    async fn settle_recovered_executors(&mut self) {
        let mut live: Vec<(FrameworkId, ExecutorId, Option<i32>)> = Vec::new();
        for framework in self.registry.frameworks() {
            for executor in framework.executors.values() {
                live.push((
                    framework.framework_id.clone(),
                    executor.executor_id.clone(),
                    executor.pid,
                ));
            }
        }

        for (framework_id, executor_id, pid) in live {
            match pid {
                Some(pid) => {
                    // The reaper observes death within a tick, including
                    // executors that died while we were down.
                    self.reaper.monitor(pid);
                }
                None => {
                    // Checkpointed before the fork completed: there is no
                    // process to wait for.
                    info!(%framework_id, %executor_id, "recovered executor never forked, finalizing");
                    self.executor_terminated(&framework_id, &executor_id, None).await;
                    continue;
                }
            }

            match self.config.recover {
                RecoverPolicy::Reconnect => {
                    info!(%framework_id, %executor_id, "waiting for executor to re-register");
                    self.scheduler.set_timer(
                        &TimerId::reregister_deadline(&framework_id, &executor_id),
                        self.config.executor_reregister_timeout,
                        self.clock.now(),
                    );
                }
                RecoverPolicy::Cleanup => {
                    info!(%framework_id, %executor_id, "cleanup recovery, shutting executor down");
                    self.shutdown_executor(&framework_id, &executor_id).await;
                }
            }
        }
    }
}

/// Rebuild one run's tasks into the executor and collect its streams.
fn rebuild_tasks(
    executor: &mut Executor,
    run: &RecoveredRun,
    framework_id: &FrameworkId,
    streams: &mut Vec<RecoveredStream>,
) {
    for task in &run.tasks {
        let Some(task_info) = task.info.clone() else {
            warn!(task_id = %task.task_id, "task has no task.info, skipping");
            continue;
        };

        // Fold the update log: the last update gives the task's state,
        // an acked terminal closes it.
        let mut last_state = TaskState::Staging;
        let mut terminal_by_uuid: HashMap<&str, bool> = HashMap::new();
        let mut terminal_acked = false;
        for record in &task.records {
            match record {
                UpdateLogRecord::Update { update } => {
                    last_state = update.state;
                    terminal_by_uuid.insert(update.uuid.as_str(), update.is_terminal());
                }
                UpdateLogRecord::Ack { uuid } => {
                    if terminal_by_uuid.get(uuid.as_str()).copied().unwrap_or(false) {
                        terminal_acked = true;
                    }
                }
            }
        }

        streams.push(RecoveredStream {
            framework_id: framework_id.clone(),
            executor_id: executor.executor_id.clone(),
            task_id: task.task_id.clone(),
            log_path: task.log_path.clone(),
            records: task.records.clone(),
        });

        if terminal_acked || last_state.is_terminal() {
            // Fully reported (or waiting only on the ack): completed ring.
            executor.completed_tasks.push_back(Task { info: task_info, state: last_state });
        } else {
            executor.resources += task_info.resources;
            executor
                .launched_tasks
                .insert(task.task_id.clone(), Task { info: task_info, state: last_state });
        }
    }
}
