// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framed append-only log of status-update records.
//!
//! One log per task stream. Each entry is framed as
//! `(length: u32 LE, payload: JSON, checksum: 8 bytes)` where the
//! checksum is the truncated SHA-256 of the payload. Every append is
//! fsynced before the in-memory update counts as durable; the update
//! manager forwards nothing it has not persisted.
//!
//! Replay stops at the first truncated or checksum-mismatched frame —
//! a crash mid-append loses only the entry being written.

use dray_core::{StatusUpdate, UpdateId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::record::StorageError;

/// Bytes of the truncated SHA-256 kept per frame.
const CHECKSUM_LEN: usize = 8;

/// Upper bound on a single frame payload; larger lengths mean a corrupt
/// length word, not a real record.
const MAX_PAYLOAD_LEN: u32 = 4 * 1024 * 1024;

/// One entry in a task's update log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UpdateLogRecord {
    /// A status update became durable before being forwarded.
    #[serde(rename = "update")]
    Update { update: StatusUpdate },
    /// The master acknowledged the update with this uuid.
    #[serde(rename = "ack")]
    Ack { uuid: UpdateId },
}

fn frame_checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(payload);
    let mut checksum = [0u8; CHECKSUM_LEN];
    checksum.copy_from_slice(&digest[..CHECKSUM_LEN]);
    checksum
}

fn io_err(path: &Path, source: io::Error) -> StorageError {
    StorageError::Io { path: path.to_owned(), source }
}

/// Append handle for one task's update log.
pub struct UpdateLog {
    file: File,
    path: PathBuf,
}

impl UpdateLog {
    /// Open (or create) the log at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| io_err(path, e))?;
        Ok(Self { file, path: path.to_owned() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and fsync. This is the durability point.
    pub fn append(&mut self, record: &UpdateLogRecord) -> Result<(), StorageError> {
        let payload = serde_json::to_vec(record)?;
        let len = payload.len() as u32;

        let mut frame = Vec::with_capacity(4 + payload.len() + CHECKSUM_LEN);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&frame_checksum(&payload));

        self.file
            .write_all(&frame)
            .map_err(|e| io_err(&self.path, e))?;
        self.file.sync_data().map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }

    /// Read every intact record, stopping at the first damaged frame.
    pub fn replay(path: &Path) -> Result<Vec<UpdateLogRecord>, StorageError> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(path, e)),
        };

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| io_err(path, e))?;

        let mut records = Vec::new();
        let mut offset = 0usize;

        while offset + 4 <= bytes.len() {
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&bytes[offset..offset + 4]);
            let len = u32::from_le_bytes(len_bytes);

            if len > MAX_PAYLOAD_LEN {
                warn!(
                    path = %path.display(),
                    offset,
                    len,
                    "implausible frame length in update log, stopping replay"
                );
                break;
            }

            let payload_end = offset + 4 + len as usize;
            let frame_end = payload_end + CHECKSUM_LEN;
            if frame_end > bytes.len() {
                // Truncated tail from a crash mid-append. The durable
                // prefix is everything before this frame.
                break;
            }

            let payload = &bytes[offset + 4..payload_end];
            let checksum = &bytes[payload_end..frame_end];
            if checksum != frame_checksum(payload) {
                warn!(
                    path = %path.display(),
                    offset,
                    "checksum mismatch in update log, stopping replay"
                );
                break;
            }

            match serde_json::from_slice(payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        offset,
                        error = %e,
                        "unparseable update record, stopping replay"
                    );
                    break;
                }
            }

            offset = frame_end;
        }

        Ok(records)
    }
}

#[cfg(test)]
#[path = "update_log_tests.rs"]
mod tests;
