// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process reaper: observes termination of arbitrary PIDs.
//!
//! Executors may be reparented away from the agent by a container
//! runtime, so the reaper cannot assume it owns the processes it watches.
//! Direct children are reaped with a non-blocking `waitpid` which yields
//! the real exit status; everything else gets a zero-signal liveness
//! probe and reports an unknown status when it disappears.
//!
//! Exactly one notification is delivered per monitored PID. Poll errors
//! are logged and retried on the next tick; the reaper task never dies.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default poll interval. Must stay at or below one second so executor
/// exits are observed promptly.
pub const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Capacity of each subscriber channel.
const SUBSCRIBER_BUFFER: usize = 256;

/// One observed process exit. `status` is the exit code when the process
/// was our child (signal deaths encoded shell-style as 128 + signo),
/// `None` when the process was reparented and its status unobservable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub pid: i32,
    pub status: Option<i32>,
}

/// What one poll of a PID concluded.
enum Poll {
    Alive,
    Exited(Option<i32>),
    Unknown,
}

/// Handle to the reaper actor. Cloneable; all clones share the watch list.
#[derive(Clone, Default)]
pub struct Reaper {
    monitored: Arc<Mutex<HashSet<i32>>>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<ProcessExit>>>>,
}

impl Reaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in a PID. Idempotent: monitoring an
    /// already-monitored PID still yields a single notification.
    pub fn monitor(&self, pid: i32) {
        self.monitored.lock().insert(pid);
    }

    /// Number of PIDs currently being watched.
    pub fn monitored_count(&self) -> usize {
        self.monitored.lock().len()
    }

    /// Subscribe to exit notifications.
    pub fn subscribe(&self) -> mpsc::Receiver<ProcessExit> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Spawn the polling task.
    pub fn spawn(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let reaper = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                reaper.poll_once().await;
            }
        })
    }

    /// One poll pass over the watch list.
    pub async fn poll_once(&self) {
        let pids: Vec<i32> = self.monitored.lock().iter().copied().collect();

        for pid in pids {
            match poll_pid(pid) {
                Poll::Alive => {}
                Poll::Exited(status) => {
                    self.monitored.lock().remove(&pid);
                    self.notify(ProcessExit { pid, status }).await;
                }
                Poll::Unknown => {
                    // Transient poll failure; try again next tick.
                }
            }
        }
    }

    async fn notify(&self, exit: ProcessExit) {
        debug!(pid = exit.pid, status = ?exit.status, "process exited");
        let subscribers: Vec<mpsc::Sender<ProcessExit>> =
            self.subscribers.lock().iter().cloned().collect();
        for tx in subscribers {
            if tx.send(exit).await.is_err() {
                // Subscriber went away; dropped senders are pruned lazily.
            }
        }
        self.subscribers.lock().retain(|tx| !tx.is_closed());
    }
}

/// Poll a single PID for liveness.
fn poll_pid(pid: i32) -> Poll {
    match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => Poll::Alive,
        Ok(WaitStatus::Exited(_, code)) => Poll::Exited(Some(code)),
        Ok(WaitStatus::Signaled(_, signal, _)) => Poll::Exited(Some(128 + signal as i32)),
        Ok(_) => Poll::Alive, // stopped/continued: still running
        Err(Errno::ECHILD) => probe_non_child(pid),
        Err(e) => {
            warn!(pid, error = %e, "waitpid failed, retrying next tick");
            Poll::Unknown
        }
    }
}

/// Liveness probe for a PID that is not our child: send signal 0.
fn probe_non_child(pid: i32) -> Poll {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => Poll::Alive,
        // Exists but owned by someone else: alive.
        Err(Errno::EPERM) => Poll::Alive,
        Err(Errno::ESRCH) => Poll::Exited(None),
        Err(e) => {
            warn!(pid, error = %e, "liveness probe failed, retrying next tick");
            Poll::Unknown
        }
    }
}

#[cfg(test)]
#[path = "reaper_tests.rs"]
mod tests;
