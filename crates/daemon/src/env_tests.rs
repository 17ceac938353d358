// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    bare_seconds = { "30", 30_000 },
    seconds = { "45s", 45_000 },
    minutes = { "5m", 300_000 },
    hours = { "2h", 7_200_000 },
    days = { "1d", 86_400_000 },
    millis = { "250ms", 250 },
)]
fn parse_duration_accepts_common_suffixes(input: &str, expected_ms: u64) {
    assert_eq!(parse_duration(input), Ok(Duration::from_millis(expected_ms)));
}

#[parameterized(
    empty = { "" },
    no_number = { "s" },
    bad_suffix = { "10y" },
)]
fn parse_duration_rejects_garbage(input: &str) {
    assert!(parse_duration(input).is_err());
}
