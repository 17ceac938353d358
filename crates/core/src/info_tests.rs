// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    short = { "echo hi", "echo hi" },
    exactly_limit = { "123456789012345", "123456789012345" },
    over_limit = { "sleep 100 && echo done", "sleep 100 &&..." },
    empty = { "", "(empty)" },
    whitespace_only = { "   ", "(empty)" },
)]
fn display_name_truncation(value: &str, expected: &str) {
    let cmd = CommandInfo::shell(value);
    assert_eq!(cmd.display_name(), expected);
}

#[test]
fn display_name_respects_multibyte_boundaries() {
    // 16 two-byte chars: byte slicing at 12 would split a char
    let cmd = CommandInfo::shell("å".repeat(16));
    assert_eq!(cmd.display_name(), format!("{}...", "å".repeat(12)));
}

#[test]
fn slave_info_round_trips_with_assigned_id() {
    let mut info = SlaveInfo::new("node-7.example.com", Resources::new(8.0, 16384, 100_000));
    info.id = Some(SlaveId::new("20260801-0001-7"));

    let json = serde_json::to_string(&info).unwrap();
    let back: SlaveInfo = serde_json::from_str(&json).unwrap();
    assert_eq!(info, back);
}

#[test]
fn slave_info_without_id_omits_the_field() {
    let info = SlaveInfo::new("node-7", Resources::default());
    let json = serde_json::to_string(&info).unwrap();
    assert!(!json.contains("\"id\""));
}
