// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! dray node agent daemon (drayd)
//!
//! Long-lived process that registers with the cluster master, launches
//! and supervises executor processes for assigned tasks, delivers task
//! status updates at-least-once, and recovers in-flight work from its
//! checkpoint tree across restarts.
//!
//! Architecture:
//! - Listener task: executor socket I/O, feeds the agent mailbox
//! - Master link task: TCP JSON lines to/from the master
//! - Agent actor: single loop sequencing every event
//! - Reaper / isolator / update manager: cooperating background actors

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod agent;
mod config;
mod env;
mod lifecycle;
mod listener;
mod master;

use crate::config::Config;
use crate::lifecycle::StartupResult;
use tracing::{error, info};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle info flags before any config/lock acquisition
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("drayd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("drayd {}", env!("CARGO_PKG_VERSION"));
                println!("dray node agent - supervises executors for a cluster master");
                println!();
                println!("USAGE:");
                println!("    drayd");
                println!();
                println!("Configuration comes from the file named by DRAY_CONFIG plus");
                println!("DRAY_WORK_DIR / DRAY_MASTER overrides; there are no other");
                println!("command line options.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: drayd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load()?;

    rotate_log_if_needed(&config.log_path());
    let _log_guard = setup_logging(&config)?;

    info!(work_dir = %config.work_dir.display(), "starting node agent");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(run(config.clone()));

    lifecycle::cleanup(&config);
    match result {
        Ok(()) => {
            info!("agent stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "agent failed");
            Err(e)
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let StartupResult { agent, listener, lock_file: _lock_file } =
        match lifecycle::startup(config.clone()) {
            Ok(result) => result,
            Err(lifecycle::LifecycleError::LockFailed(_)) => {
                let pid = std::fs::read_to_string(config.lock_path())
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                eprintln!("drayd is already running");
                if !pid.is_empty() {
                    eprintln!("  pid: {pid}");
                }
                std::process::exit(1);
            }
            Err(e) => return Err(e.into()),
        };

    tokio::spawn(listener.run());

    // Signal ready for whatever supervises the daemon.
    println!("READY");

    agent.run().await?;
    Ok(())
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep (drayd.log.1, .2, .3).
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the daemon log file if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `drayd.log` → `drayd.log.1` → `drayd.log.2` → `drayd.log.3`,
/// deleting the oldest. Best-effort: rotation failures are silently
/// ignored so the daemon still starts.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };

    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();

    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, std::io::Error> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if let Some(parent) = config.log_path().parent() {
        std::fs::create_dir_all(parent)?;
    }

    let directory = config.work_dir.clone();
    let file_name = config
        .log_path()
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "drayd.log".into());
    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
