//! Two snapshots taken back to back, with nothing allocated in between, must agree up to noise.
//!
//! One test per file to enforce process isolation (used-memory is process-level state and any
//! concurrently running test would contaminate the readings).

#![cfg(target_os = "linux")]

use std::time::Duration;

use thread_footprint::{HarnessConfig, Interrupt, MemoryDelta, MemorySnapshotter};

// A single heavyweight unit reserves a whole default stack, so noise must stay well below that.
const NOISE_LIMIT_BYTES: i64 = 1024 * 1024;

#[test]
#[cfg_attr(miri, ignore)] // Miri cannot call platform APIs.
fn back_to_back_snapshots_differ_only_by_noise() {
    let config = HarnessConfig::default().settle_delay(Duration::from_millis(50));
    let snapshotter = MemorySnapshotter::new(&config, Interrupt::new());

    let first = snapshotter.snapshot().unwrap();
    let second = snapshotter.snapshot().unwrap();

    let delta = MemoryDelta::between(&first, &second);

    assert!(first.used_bytes() > 0);
    assert!(second.taken_at() > first.taken_at());
    assert!(
        delta.bytes().abs() < NOISE_LIMIT_BYTES,
        "back to back snapshots differ by {} bytes",
        delta.bytes()
    );
}
