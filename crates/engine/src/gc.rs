// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandbox garbage collection seam.
//!
//! The agent decides *when* a sandbox becomes eligible (the permitted-age
//! decay below); the collector behind [`Gc`] owns the actual deletion
//! scheduling.

use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Fraction of the disk kept free before sandbox age starts decaying.
pub const GC_DISK_HEADROOM: f64 = 0.1;

/// How long a sandbox directory may live given current disk usage.
///
/// Decays linearly from `gc_delay` (empty disk) to zero as usage
/// approaches `1 - GC_DISK_HEADROOM`. Monotonically non-increasing in
/// usage.
pub fn permitted_sandbox_age(gc_delay: Duration, usage: f64) -> Duration {
    let factor = (1.0 - GC_DISK_HEADROOM - usage).clamp(0.0, 1.0);
    gc_delay.mul_f64(factor)
}

/// Deletion scheduler for expired directories.
pub trait Gc: Send + Sync + 'static {
    /// Schedule `path` for removal after `delay`. Idempotent per path.
    fn schedule(&self, delay: Duration, path: PathBuf);
}

/// Tokio-backed collector: sleeps, then removes the directory tree.
/// Failures are logged and the path is left for the next pass.
#[derive(Debug, Clone, Default)]
pub struct DeferredGc;

impl DeferredGc {
    pub fn new() -> Self {
        Self
    }
}

impl Gc for DeferredGc {
    fn schedule(&self, delay: Duration, path: PathBuf) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => info!(path = %path.display(), "garbage collected sandbox"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "sandbox removal failed"),
            }
        });
    }
}

#[cfg(test)]
#[path = "gc_tests.rs"]
mod tests;
