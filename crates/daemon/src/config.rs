// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration: TOML file merged with `DRAY_*` overrides.

use dray_core::Resources;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::env;

/// What to do with checkpointed executors found at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoverPolicy {
    /// Wait for live executors to re-register, then keep driving them.
    Reconnect,
    /// Shut every recovered executor down (two-phase).
    Cleanup,
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of sandboxes and checkpoints.
    pub work_dir: PathBuf,
    /// Directory holding the `dray-executor` helper.
    pub launcher_dir: PathBuf,
    /// Hostname advertised to the master.
    pub hostname: String,
    /// Resources advertised to the master.
    pub resources: Resources,
    /// Master address (host:port); absent means wait for detection.
    pub master: Option<String>,
    pub recover: RecoverPolicy,
    /// Recovery and checkpoint errors abort the process when set.
    pub strict: bool,
    /// Phase-1 shutdown timeout before the isolator destroys an executor.
    pub executor_shutdown_grace: Duration,
    /// How long a recovered executor may take to re-register.
    pub executor_reregister_timeout: Duration,
    /// Maximum sandbox age when the disk is empty.
    pub gc_delay: Duration,
    /// Cadence of the disk usage control loop.
    pub disk_watch_interval: Duration,
}

impl Config {
    /// Unix socket executors connect to.
    pub fn socket_path(&self) -> PathBuf {
        self.work_dir.join("agent.sock")
    }

    /// Exclusive lock plus PID of the running daemon.
    pub fn lock_path(&self) -> PathBuf {
        self.work_dir.join("drayd.pid")
    }

    pub fn log_path(&self) -> PathBuf {
        self.work_dir.join("drayd.log")
    }
}

/// On-disk shape of the config file. Everything is optional; defaults
/// and environment overrides fill the rest.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    work_dir: Option<PathBuf>,
    launcher_dir: Option<PathBuf>,
    hostname: Option<String>,
    master: Option<String>,
    #[serde(default)]
    resources: Option<Resources>,
    recover: Option<RecoverPolicy>,
    strict: Option<bool>,
    executor_shutdown_grace: Option<String>,
    executor_reregister_timeout: Option<String>,
    gc_delay: Option<String>,
    disk_watch_interval: Option<String>,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine a work directory (set DRAY_WORK_DIR)")]
    NoWorkDir,
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("invalid duration for {field}: {message}")]
    Duration { field: &'static str, message: String },
}

fn parse_duration_field(
    value: Option<String>,
    field: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(s) => env::parse_duration(&s)
            .map_err(|message| ConfigError::Duration { field, message }),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration: file (if present), then env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match env::config_file() {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| ConfigError::Read(path.clone(), e))?;
                toml::from_str(&text).map_err(|e| ConfigError::Parse(path, e))?
            }
            None => ConfigFile::default(),
        };
        Self::from_file(file)
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let work_dir = env::work_dir()
            .or(file.work_dir)
            .or_else(|| dirs::state_dir().map(|d| d.join("dray")))
            .ok_or(ConfigError::NoWorkDir)?;

        let launcher_dir = file.launcher_dir.unwrap_or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|p| p.to_path_buf()))
                .unwrap_or_else(|| PathBuf::from("."))
        });

        let hostname = file.hostname.unwrap_or_else(default_hostname);

        Ok(Self {
            work_dir,
            launcher_dir,
            hostname,
            resources: file.resources.unwrap_or_default(),
            master: env::master().or(file.master),
            recover: file.recover.unwrap_or(RecoverPolicy::Reconnect),
            strict: file.strict.unwrap_or(false),
            executor_shutdown_grace: parse_duration_field(
                file.executor_shutdown_grace,
                "executor_shutdown_grace",
                Duration::from_secs(5),
            )?,
            executor_reregister_timeout: parse_duration_field(
                file.executor_reregister_timeout,
                "executor_reregister_timeout",
                Duration::from_secs(10),
            )?,
            gc_delay: parse_duration_field(
                file.gc_delay,
                "gc_delay",
                Duration::from_secs(7 * 24 * 3600),
            )?,
            disk_watch_interval: parse_duration_field(
                file.disk_watch_interval,
                "disk_watch_interval",
                Duration::from_secs(60),
            )?,
        })
    }
}

fn default_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
