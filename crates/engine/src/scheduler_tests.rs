// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dray_core::{ExecutorId, FrameworkId};

#[test]
fn timers_fire_only_after_their_deadline() {
    let mut sched = Scheduler::new();
    let now = Instant::now();
    let id = TimerId::registration_retry();

    sched.set_timer(&id, Duration::from_secs(10), now);
    assert!(sched.fired_timers(now + Duration::from_secs(9)).is_empty());

    let fired = sched.fired_timers(now + Duration::from_secs(10));
    assert_eq!(fired, vec![id.clone()]);
    assert!(!sched.is_armed(&id));
}

#[test]
fn cancelled_timers_never_fire() {
    let mut sched = Scheduler::new();
    let now = Instant::now();
    let id = TimerId::shutdown_grace(&FrameworkId::new("fw"), &ExecutorId::new("e"));

    sched.set_timer(&id, Duration::from_secs(1), now);
    sched.cancel_timer(&id);
    assert!(sched.fired_timers(now + Duration::from_secs(2)).is_empty());
}

#[test]
fn resetting_a_timer_replaces_its_deadline() {
    let mut sched = Scheduler::new();
    let now = Instant::now();
    let id = TimerId::registration_retry();

    sched.set_timer(&id, Duration::from_secs(1), now);
    sched.set_timer(&id, Duration::from_secs(60), now);

    assert!(sched.fired_timers(now + Duration::from_secs(2)).is_empty());
    assert!(sched.has_timers());
}

#[test]
fn next_deadline_is_the_minimum() {
    let mut sched = Scheduler::new();
    let now = Instant::now();

    sched.set_timer(&TimerId::disk_watch(), Duration::from_secs(60), now);
    sched.set_timer(&TimerId::registration_retry(), Duration::from_secs(5), now);

    assert_eq!(sched.next_deadline(), Some(now + Duration::from_secs(5)));
}
