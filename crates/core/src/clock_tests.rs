// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn fake_clock_advance_moves_both_timelines() {
    let clock = FakeClock::new();
    let start = clock.now();
    let epoch = clock.epoch_ms();

    clock.advance(Duration::from_secs(5));

    assert_eq!(clock.now() - start, Duration::from_secs(5));
    assert_eq!(clock.epoch_ms() - epoch, 5_000);
}

#[test]
fn fake_clock_set_epoch_ms() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(42);
    assert_eq!(clock.epoch_ms(), 42);
}

#[test]
fn system_clock_epoch_is_sane() {
    // Anything after 2020-01-01 counts as sane here.
    assert!(SystemClock.epoch_ms() > 1_577_836_800_000);
}
