// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::tempdir;
use yare::parameterized;

const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

#[parameterized(
    empty_disk = { 0.0, WEEK.mul_f64(0.9) },
    half_full = { 0.5, WEEK.mul_f64(0.4) },
    at_headroom = { 0.9, Duration::ZERO },
    full = { 1.0, Duration::ZERO },
)]
fn permitted_age_decays_with_usage(usage: f64, expected: Duration) {
    assert_eq!(permitted_sandbox_age(WEEK, usage), expected);
}

#[test]
fn permitted_age_is_monotonic_non_increasing() {
    let mut last = Duration::MAX;
    for step in 0..=20 {
        let usage = step as f64 / 20.0;
        let age = permitted_sandbox_age(WEEK, usage);
        assert!(age <= last, "age increased at usage {usage}");
        last = age;
    }
}

#[tokio::test]
async fn deferred_gc_removes_the_directory() {
    let dir = tempdir().unwrap();
    let victim = dir.path().join("sandbox");
    std::fs::create_dir_all(victim.join("nested")).unwrap();
    std::fs::write(victim.join("nested/file"), b"x").unwrap();

    DeferredGc::new().schedule(Duration::from_millis(10), victim.clone());

    for _ in 0..100 {
        if !victim.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("sandbox was not collected");
}

#[tokio::test]
async fn deferred_gc_tolerates_missing_paths() {
    let dir = tempdir().unwrap();
    DeferredGc::new().schedule(Duration::from_millis(1), dir.path().join("never-existed"));
    tokio::time::sleep(Duration::from_millis(30)).await;
}
