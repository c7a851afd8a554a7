// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn system_clock_returns_increasing_time() {
    let clock = SystemClock;
    let t1 = clock.now();
    std::thread::sleep(Duration::from_millis(1));
    let t2 = clock.now();
    assert!(t2 > t1);
}

#[test]
fn fake_clock_advances_both_readings() {
    let clock = FakeClock::new();
    let t1 = clock.now();
    let ms1 = clock.epoch_ms();
    clock.advance(Duration::from_secs(90));
    assert!(clock.now().duration_since(t1) >= Duration::from_secs(90));
    assert_eq!(clock.epoch_ms(), ms1 + 90_000);
}

#[test]
fn fake_clock_is_shared_across_clones() {
    let clock1 = FakeClock::new();
    let clock2 = clock1.clone();
    clock2.advance(Duration::from_secs(30));
    assert_eq!(clock1.now(), clock2.now());
}

#[test]
fn elapsed_since_saturates_at_zero() {
    let clock = FakeClock::new();
    let future = clock.now() + Duration::from_secs(10);
    assert_eq!(clock.elapsed_since(future), Duration::ZERO);
    clock.advance(Duration::from_secs(25));
    assert_eq!(clock.elapsed_since(future), Duration::from_secs(15));
}

#[test]
fn fake_clock_set_epoch_ms() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(42);
    assert_eq!(clock.epoch_ms(), 42);
}
