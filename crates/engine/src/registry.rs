// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authoritative in-memory model of frameworks, executors, and tasks.
//!
//! Ownership is a tree: the registry owns frameworks, frameworks own
//! executors, executors own tasks. Completed entities move into bounded
//! rings owned by their parent; there are no back-pointers — handlers
//! resolve explicit IDs through the registry.

use crate::event::ExecutorConn;
use dray_core::{
    CommandInfo, ContainerId, ExecutorId, ExecutorInfo, ExecutorSnapshot, FrameworkId,
    FrameworkInfo, Resources, TaskId, TaskInfo, TaskSnapshot, TaskState,
};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::path::PathBuf;
use tracing::warn;

/// Completed frameworks kept for introspection.
pub const MAX_COMPLETED_FRAMEWORKS: usize = 50;

/// Completed executors kept per framework.
pub const MAX_COMPLETED_EXECUTORS_PER_FRAMEWORK: usize = 150;

/// Completed tasks kept per executor.
pub const MAX_COMPLETED_TASKS_PER_EXECUTOR: usize = 1000;

/// Runtime state of a dispatched task.
#[derive(Debug, Clone)]
pub struct Task {
    pub info: TaskInfo,
    pub state: TaskState,
}

/// One executor run and the tasks it carries.
#[derive(Debug, Clone)]
pub struct Executor {
    pub executor_id: ExecutorId,
    pub framework_id: FrameworkId,
    /// Fresh per launch; disambiguates re-launches of the same executor ID.
    pub container_id: ContainerId,
    pub info: ExecutorInfo,
    pub sandbox: PathBuf,
    /// OS pid, set once the isolator forked the process.
    pub pid: Option<i32>,
    /// Connection back to the executor, set at registration.
    pub conn: Option<ExecutorConn>,
    /// Executor-reserved resources plus the sum of launched task resources.
    pub resources: Resources,
    /// Assigned but not yet dispatched to the executor process.
    pub queued_tasks: HashMap<TaskId, TaskInfo>,
    /// Dispatched and acknowledged by the executor process.
    pub launched_tasks: HashMap<TaskId, Task>,
    pub completed_tasks: VecDeque<Task>,
    pub shutting_down: bool,
    /// Set when the run terminated; drives sandbox garbage collection.
    pub terminated_at_ms: Option<u64>,
}

impl Executor {
    pub fn new(info: ExecutorInfo, container_id: ContainerId, sandbox: PathBuf) -> Self {
        let resources = info.resources;
        Self {
            executor_id: info.executor_id.clone(),
            framework_id: info.framework_id.clone(),
            container_id,
            info,
            sandbox,
            pid: None,
            conn: None,
            resources,
            queued_tasks: HashMap::new(),
            launched_tasks: HashMap::new(),
            completed_tasks: VecDeque::new(),
            shutting_down: false,
            terminated_at_ms: None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.conn.is_some()
    }

    /// Whether this executor knows the task in any live collection.
    pub fn has_task(&self, task_id: &TaskId) -> bool {
        self.queued_tasks.contains_key(task_id) || self.launched_tasks.contains_key(task_id)
    }

    /// Queue a task for dispatch. Duplicate task IDs within an executor
    /// are a programming error upstream (the agent validates master input
    /// before calling this).
    pub fn add_queued_task(&mut self, task: TaskInfo) {
        assert!(
            !self.has_task(&task.task_id),
            "duplicate task {} in executor {}",
            task.task_id,
            self.executor_id
        );
        self.queued_tasks.insert(task.task_id.clone(), task);
    }

    /// Move a queued task into the launched set (dispatched to the
    /// executor process). Accounts its resources against the executor.
    pub fn launch_task(&mut self, task_id: &TaskId) -> Option<&Task> {
        let info = self.queued_tasks.remove(task_id)?;
        self.resources += info.resources;
        let task = Task { info, state: TaskState::Staging };
        self.launched_tasks.insert(task_id.clone(), task);
        self.launched_tasks.get(task_id)
    }

    /// Remove a task that never got dispatched.
    pub fn remove_queued_task(&mut self, task_id: &TaskId) -> Option<TaskInfo> {
        self.queued_tasks.remove(task_id)
    }

    /// Apply a state transition to a launched task. Terminal states move
    /// the task into the completed ring and release its resources.
    /// Returns false when the task is unknown (stale or duplicate input).
    pub fn update_task_state(&mut self, task_id: &TaskId, state: TaskState) -> bool {
        let Some(task) = self.launched_tasks.get_mut(task_id) else {
            return false;
        };
        task.state = state;

        if state.is_terminal() {
            // Invariant: launched_tasks holds only non-terminal tasks.
            if let Some(task) = self.launched_tasks.remove(task_id) {
                self.resources -= task.info.resources;
                if self.completed_tasks.len() >= MAX_COMPLETED_TASKS_PER_EXECUTOR {
                    self.completed_tasks.pop_front();
                }
                self.completed_tasks.push_back(task);
            }
        }
        true
    }

    /// IDs of every task that has not reached a terminal state.
    pub fn active_tasks(&self) -> Vec<TaskId> {
        self.queued_tasks
            .keys()
            .chain(self.launched_tasks.keys())
            .cloned()
            .collect()
    }

    /// Mark every live task terminal with `state`, moving all of them
    /// into the completed ring. Returns the affected task IDs.
    pub fn terminate_all_tasks(&mut self, state: TaskState) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.queued_tasks.keys().cloned().collect();
        for id in &ids {
            if let Some(info) = self.queued_tasks.remove(id) {
                self.push_completed(Task { info, state });
            }
        }

        let launched: Vec<TaskId> = self.launched_tasks.keys().cloned().collect();
        for id in &launched {
            self.update_task_state(id, state);
        }
        ids.extend(launched);
        ids
    }

    fn push_completed(&mut self, task: Task) {
        if self.completed_tasks.len() >= MAX_COMPLETED_TASKS_PER_EXECUTOR {
            self.completed_tasks.pop_front();
        }
        self.completed_tasks.push_back(task);
    }

    pub fn is_idle(&self) -> bool {
        self.queued_tasks.is_empty() && self.launched_tasks.is_empty()
    }
}

/// A tenant of the cluster and everything it runs on this node.
#[derive(Debug, Clone)]
pub struct Framework {
    pub framework_id: FrameworkId,
    pub info: FrameworkInfo,
    /// Scheduler endpoint, refreshed on every task assignment.
    pub pid: String,
    pub executors: HashMap<ExecutorId, Executor>,
    pub completed_executors: VecDeque<Executor>,
    pub shutting_down: bool,
}

impl Framework {
    pub fn new(framework_id: FrameworkId, info: FrameworkInfo, pid: String) -> Self {
        Self {
            framework_id,
            info,
            pid,
            executors: HashMap::new(),
            completed_executors: VecDeque::new(),
            shutting_down: false,
        }
    }

    pub fn executor(&self, executor_id: &ExecutorId) -> Option<&Executor> {
        self.executors.get(executor_id)
    }

    pub fn executor_mut(&mut self, executor_id: &ExecutorId) -> Option<&mut Executor> {
        self.executors.get_mut(executor_id)
    }

    /// Add a fresh executor run.
    pub fn add_executor(&mut self, executor: Executor) -> &mut Executor {
        use std::collections::hash_map::Entry;
        match self.executors.entry(executor.executor_id.clone()) {
            Entry::Occupied(mut entry) => {
                warn!(
                    framework_id = %self.framework_id,
                    executor_id = %executor.executor_id,
                    "replacing live executor entry"
                );
                entry.insert(executor);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(executor),
        }
    }

    /// Retire an executor into the completed ring.
    pub fn destroy_executor(&mut self, executor_id: &ExecutorId, now_ms: u64) -> Option<&Executor> {
        let mut executor = self.executors.remove(executor_id)?;
        executor.conn = None;
        executor.terminated_at_ms = Some(now_ms);
        if self.completed_executors.len() >= MAX_COMPLETED_EXECUTORS_PER_FRAMEWORK {
            self.completed_executors.pop_front();
        }
        self.completed_executors.push_back(executor);
        self.completed_executors.back()
    }

    /// A framework with no live executors is eligible for removal once
    /// its shutdown flag is set.
    pub fn is_idle(&self) -> bool {
        self.executors.is_empty()
    }

    /// Live executor that knows this task (queued, launched, or recently
    /// completed — acknowledgements can trail the terminal transition).
    pub fn executor_for_task(&self, task_id: &TaskId) -> Option<&Executor> {
        self.executors.values().find(|e| {
            e.has_task(task_id)
                || e.completed_tasks.iter().any(|t| &t.info.task_id == task_id)
        })
    }
}

/// Counters for protocol accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub valid_status_updates: u64,
    pub invalid_status_updates: u64,
    pub valid_framework_messages: u64,
    pub invalid_framework_messages: u64,
    pub invalid_tasks: u64,
}

/// The single source of truth the agent actor consults.
#[derive(Debug, Default)]
pub struct Registry {
    frameworks: HashMap<FrameworkId, Framework>,
    completed_frameworks: VecDeque<Framework>,
    pub stats: Stats,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn framework(&self, framework_id: &FrameworkId) -> Option<&Framework> {
        self.frameworks.get(framework_id)
    }

    pub fn framework_mut(&mut self, framework_id: &FrameworkId) -> Option<&mut Framework> {
        self.frameworks.get_mut(framework_id)
    }

    pub fn frameworks(&self) -> impl Iterator<Item = &Framework> {
        self.frameworks.values()
    }

    pub fn frameworks_mut(&mut self) -> impl Iterator<Item = &mut Framework> {
        self.frameworks.values_mut()
    }

    pub fn framework_ids(&self) -> Vec<FrameworkId> {
        self.frameworks.keys().cloned().collect()
    }

    /// Look up or create the framework for an incoming task.
    pub fn ensure_framework(
        &mut self,
        framework_id: &FrameworkId,
        info: &FrameworkInfo,
        pid: &str,
    ) -> &mut Framework {
        let framework = self
            .frameworks
            .entry(framework_id.clone())
            .or_insert_with(|| {
                Framework::new(framework_id.clone(), info.clone(), pid.to_string())
            });
        // The scheduler may have failed over to a new endpoint.
        framework.pid = pid.to_string();
        framework
    }

    pub fn executor_mut(
        &mut self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
    ) -> Option<&mut Executor> {
        self.frameworks
            .get_mut(framework_id)?
            .executor_mut(executor_id)
    }

    /// Find the live executor forked as `pid`.
    pub fn find_by_pid(&self, pid: i32) -> Option<(FrameworkId, ExecutorId)> {
        for framework in self.frameworks.values() {
            for executor in framework.executors.values() {
                if executor.pid == Some(pid) {
                    return Some((framework.framework_id.clone(), executor.executor_id.clone()));
                }
            }
        }
        None
    }

    /// Completed frameworks, oldest first.
    pub fn completed_frameworks(&self) -> impl Iterator<Item = &Framework> {
        self.completed_frameworks.iter()
    }

    /// Retire a framework into the completed ring.
    pub fn remove_framework(&mut self, framework_id: &FrameworkId) -> Option<&Framework> {
        let framework = self.frameworks.remove(framework_id)?;
        if self.completed_frameworks.len() >= MAX_COMPLETED_FRAMEWORKS {
            self.completed_frameworks.pop_front();
        }
        self.completed_frameworks.push_back(framework);
        self.completed_frameworks.back()
    }

    /// Inventory of live executors, for re-registration.
    pub fn executor_snapshots(&self) -> Vec<ExecutorSnapshot> {
        self.frameworks
            .values()
            .flat_map(|f| f.executors.values())
            .map(|e| ExecutorSnapshot {
                executor_id: e.executor_id.clone(),
                framework_id: e.framework_id.clone(),
                resources: e.resources,
            })
            .collect()
    }

    /// Inventory of live tasks, for re-registration.
    pub fn task_snapshots(&self) -> Vec<TaskSnapshot> {
        let mut snapshots = Vec::new();
        for framework in self.frameworks.values() {
            for executor in framework.executors.values() {
                for info in executor.queued_tasks.values() {
                    snapshots.push(TaskSnapshot {
                        task_id: info.task_id.clone(),
                        framework_id: framework.framework_id.clone(),
                        executor_id: executor.executor_id.clone(),
                        state: TaskState::Staging,
                        resources: info.resources,
                    });
                }
                for task in executor.launched_tasks.values() {
                    snapshots.push(TaskSnapshot {
                        task_id: task.info.task_id.clone(),
                        framework_id: framework.framework_id.clone(),
                        executor_id: executor.executor_id.clone(),
                        state: task.state,
                        resources: task.info.resources,
                    });
                }
            }
        }
        snapshots
    }
}

/// Synthesize the executor for a task that carries an inline command.
///
/// The executor runs the `dray-executor` helper from `launcher_dir`
/// (resolved to a real path); when the helper cannot be resolved the
/// command degrades to a one-liner that reports the failure and exits
/// non-zero, which surfaces as a launch failure on the task.
pub fn command_executor(
    framework_id: &FrameworkId,
    task: &TaskInfo,
    launcher_dir: &Path,
) -> ExecutorInfo {
    let task_command = task.command.clone().unwrap_or_default();

    let value = match std::fs::canonicalize(launcher_dir.join("dray-executor")) {
        Ok(path) => path.display().to_string(),
        Err(e) => {
            warn!(
                launcher_dir = %launcher_dir.display(),
                error = %e,
                "dray-executor not resolvable, launch will fail with a message"
            );
            format!(
                "echo 'dray-executor not found under {}' >&2; exit 1",
                launcher_dir.display()
            )
        }
    };

    ExecutorInfo {
        // The task ID doubles as the executor ID: command executors run
        // exactly one task, and task IDs are unique within a framework.
        executor_id: ExecutorId::new(task.task_id.as_str()),
        framework_id: framework_id.clone(),
        name: format!("(command) {}", task_command.display_name()),
        command: CommandInfo { value, env: task_command.env },
        resources: Resources::default(),
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
