// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic checkpointing of individual record files.
//!
//! Write ordering for durability across power loss:
//! 1. serialize and write to `<name>.tmp`
//! 2. fsync the temp file (data durable)
//! 3. atomic rename onto the final name
//! 4. fsync the parent directory (rename durable)
//!
//! Readers treat missing or unparseable files as absent: a crash between
//! steps leaves either the old record or nothing, never a torn one.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors from checkpoint-tree operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn io_err(path: &Path, source: io::Error) -> StorageError {
    StorageError::Io { path: path.to_owned(), source }
}

/// Durably write one record. Returns only after the rename is durable.
pub fn checkpoint<T: Serialize>(path: &Path, record: &T) -> Result<(), StorageError> {
    let parent = match path.parent() {
        Some(p) => p,
        None => return Err(io_err(path, io::Error::other("record path has no parent"))),
    };
    std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let bytes = serde_json::to_vec(record)?;
    {
        let mut file = File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
        file.write_all(&bytes).map_err(|e| io_err(&tmp, e))?;
        file.sync_all().map_err(|e| io_err(&tmp, e))?;
    }

    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;

    let dir = File::open(parent).map_err(|e| io_err(parent, e))?;
    dir.sync_all().map_err(|e| io_err(parent, e))?;

    Ok(())
}

/// Read one record. Missing or unparseable files yield `None`; only hard
/// IO failures surface as errors.
pub fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path, e)),
    };

    match serde_json::from_slice(&bytes) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unparseable checkpoint record, treating as absent");
            Ok(None)
        }
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
