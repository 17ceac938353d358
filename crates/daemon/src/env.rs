// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment variable overrides for daemon configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Work dir override: `DRAY_WORK_DIR`.
pub fn work_dir() -> Option<PathBuf> {
    std::env::var_os("DRAY_WORK_DIR").map(PathBuf::from)
}

/// Config file override: `DRAY_CONFIG`.
pub fn config_file() -> Option<PathBuf> {
    std::env::var_os("DRAY_CONFIG").map(PathBuf::from)
}

/// Master address override: `DRAY_MASTER` (host:port).
pub fn master() -> Option<String> {
    std::env::var("DRAY_MASTER").ok().filter(|s| !s.is_empty())
}

/// Parse a duration string like "30s", "5m", "1h" into a Duration
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the numeric prefix
    let (num_str, suffix) = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| (&s[..i], &s[i..]))
        .unwrap_or((s, ""));

    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("invalid number in duration: {}", s))?;

    let multiplier = match suffix.trim() {
        "ms" | "millis" | "millisecond" | "milliseconds" => {
            return Ok(Duration::from_millis(num));
        }
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
        "d" | "day" | "days" => 86400,
        other => return Err(format!("unknown duration suffix: {}", other)),
    };

    Ok(Duration::from_secs(num * multiplier))
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
