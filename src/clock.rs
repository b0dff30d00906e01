//! Wall-clock access, isolated behind a function so call sites read like the rest
//! of the engine's explicit-dependency style (§9 Design Notes: no global mutable
//! state). `tick()` takes `now` as an explicit parameter precisely so tests can
//! drive it without depending on this module at all (see `state_machine::tests`).

use std::time::{SystemTime, UNIX_EPOCH};

/// Current UNIX time in whole seconds.
pub fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_secs()
}

/// Current UNIX time in whole milliseconds, matching §3's `created_at` etc.
pub fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_millis() as u64
}
