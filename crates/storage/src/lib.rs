// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dray-storage: the on-disk checkpoint tree the agent recovers from.
//!
//! Two write disciplines cover everything the agent persists:
//! - record files (`slave.info`, `framework.info`, ...) are written
//!   atomically: temp file, fsync, rename, parent-directory fsync;
//! - per-task `updates` logs are append-only with framed, checksummed,
//!   individually fsynced entries.
//!
//! Reads tolerate missing and truncated data by treating it as absent;
//! the durable prefix is always recoverable.

mod layout;
mod record;
mod recover;
mod update_log;

pub use layout::Layout;
pub use record::{checkpoint, read_record, StorageError};
pub use recover::{
    recover, RecoveredExecutor, RecoveredFramework, RecoveredRun, RecoveredSlave, RecoveredTask,
};
pub use update_log::{UpdateLog, UpdateLogRecord};
