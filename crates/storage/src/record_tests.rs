// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dray_core::{Resources, SlaveInfo};
use tempfile::tempdir;

#[test]
fn checkpoint_then_read_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("slave.info");
    let info = SlaveInfo::new("node-1", Resources::new(4.0, 8192, 0));

    checkpoint(&path, &info).unwrap();
    let back: Option<SlaveInfo> = read_record(&path).unwrap();
    assert_eq!(back, Some(info));
}

#[test]
fn checkpoint_creates_parent_directories() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a/b/c/task.info");

    checkpoint(&path, &"payload").unwrap();
    assert_eq!(read_record::<String>(&path).unwrap().as_deref(), Some("payload"));
}

#[test]
fn checkpoint_replaces_atomically_and_leaves_no_tmp() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("framework.info");

    checkpoint(&path, &1u32).unwrap();
    checkpoint(&path, &2u32).unwrap();

    assert_eq!(read_record::<u32>(&path).unwrap(), Some(2));
    let names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(names, vec![std::ffi::OsString::from("framework.info")]);
}

#[test]
fn missing_record_reads_as_none() {
    let dir = tempdir().unwrap();
    let got: Option<u32> = read_record(&dir.path().join("absent")).unwrap();
    assert_eq!(got, None);
}

#[test]
fn corrupt_record_reads_as_none() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("executor.info");
    std::fs::write(&path, b"{\"trunc").unwrap();

    let got: Option<serde_json::Value> = read_record(&path).unwrap();
    assert_eq!(got, None);
}
