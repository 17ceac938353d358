// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: wiring the actors together at startup, and cleanup
//! on the way out.

use std::fs::File;
use std::path::PathBuf;

use crate::agent::{Agent, AgentDeps};
use crate::config::Config;
use crate::listener::Listener;
use crate::master::TcpMaster;
use dray_core::SystemClock;
use dray_engine::{
    AgentEvent, DeferredGc, MasterLink, NoMaster, PosixIsolator, Reaper, UpdateManager,
    UpdateManagerConfig, REAP_INTERVAL,
};
use fs2::FileExt;
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::info;

/// Agent mailbox capacity.
const EVENT_BUFFER: usize = 1024;

/// The concrete agent the daemon runs.
pub type DaemonAgent = Agent<PosixIsolator, Box<dyn MasterLink>, DeferredGc, SystemClock>;

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind executor socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything `main` needs after startup.
pub struct StartupResult {
    pub agent: DaemonAgent,
    pub listener: Listener,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    pub lock_file: File,
}

/// Wire up the actors: lock, socket, reaper, isolator, update manager,
/// master link, agent.
pub fn startup(config: Config) -> Result<StartupResult, LifecycleError> {
    std::fs::create_dir_all(&config.work_dir)?;

    // Acquire the lock FIRST - prevents races. Avoid truncating before
    // the lock is held, which would wipe the running daemon's PID.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(config.lock_path())?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;
    {
        use std::io::Write;
        let mut lock_file = &lock_file;
        lock_file.set_len(0)?;
        writeln!(lock_file, "{}", std::process::id())?;
    }

    // Remove a stale socket from a previous run, then bind.
    let socket_path = config.socket_path();
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let unix_listener = UnixListener::bind(&socket_path)
        .map_err(|e| LifecycleError::BindFailed(socket_path.clone(), e))?;

    let (event_tx, event_rx) = mpsc::channel::<AgentEvent>(EVENT_BUFFER);

    let reaper = Reaper::new();
    let _reap_task = reaper.spawn(REAP_INTERVAL);
    spawn_exit_forwarder(&reaper, event_tx.clone());

    let isolator = PosixIsolator::new(event_tx.clone());

    let (master_for_agent, master_for_updates): (Box<dyn MasterLink>, Box<dyn MasterLink>) =
        match &config.master {
            Some(address) => {
                let link = TcpMaster::spawn(address.clone(), event_tx.clone());
                (Box::new(link.clone()), Box::new(link))
            }
            None => {
                info!("no master configured, waiting for detection");
                (Box::new(NoMaster), Box::new(NoMaster))
            }
        };

    let updates = UpdateManager::spawn(
        UpdateManagerConfig::default(),
        master_for_updates,
        SystemClock,
        event_tx.clone(),
    );

    let agent = Agent::new(
        config,
        AgentDeps {
            isolator,
            master: master_for_agent,
            gc: DeferredGc::new(),
            clock: SystemClock,
            reaper,
            updates,
        },
        event_rx,
    );

    let listener = Listener::new(unix_listener, event_tx);

    info!("daemon wired up");
    Ok(StartupResult { agent, listener, lock_file })
}

/// Forward reaper exit notifications into the agent mailbox.
fn spawn_exit_forwarder(reaper: &Reaper, event_tx: mpsc::Sender<AgentEvent>) {
    let mut exits = reaper.subscribe();
    tokio::spawn(async move {
        while let Some(exit) = exits.recv().await {
            let event = AgentEvent::ProcessExited { pid: exit.pid, status: exit.status };
            if event_tx.send(event).await.is_err() {
                return;
            }
        }
    });
}

/// Remove the files that mark a live daemon.
pub fn cleanup(config: &Config) {
    let socket_path = config.socket_path();
    if socket_path.exists() {
        let _ = std::fs::remove_file(&socket_path);
    }
    let lock_path = config.lock_path();
    if lock_path.exists() {
        let _ = std::fs::remove_file(&lock_path);
    }
}
