// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn short_truncates_long_ids() {
    let id = FrameworkId::new("framework-20260801-0001");
    assert_eq!(id.short(9), "framework");
}

#[test]
fn short_returns_whole_id_when_within_limit() {
    let id = TaskId::new("t1");
    assert_eq!(id.short(8), "t1");
}

#[test]
fn generated_container_ids_are_unique() {
    let a = ContainerId::generate();
    let b = ContainerId::generate();
    assert_ne!(a, b);
    assert!(!a.is_empty());
}

#[test]
fn update_ids_round_trip_through_json() {
    let id = UpdateId::generate();
    let json = serde_json::to_string(&id).unwrap();
    let back: UpdateId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, back);
}

#[test]
fn ids_compare_against_str() {
    let id = ExecutorId::new("web-server");
    assert_eq!(id, "web-server");
    assert_eq!(id, *"web-server");
}

#[test]
fn ids_work_as_borrowed_map_keys() {
    let mut map = std::collections::HashMap::new();
    map.insert(TaskId::new("t-42"), 1u32);
    assert_eq!(map.get("t-42"), Some(&1));
}
