//! Time types used across the stratifier core.
//!
//! SAFETY NOTE: every clock read here is wall-clock (`SystemTime::now`), which
//! is fine for vardiff cadence, idle detection and retention timers but must
//! never be treated as a consensus-relevant input — the network target and
//! block header fields are sourced from the template, never from this module.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds-resolution wall clock timestamp.
pub type TimestampSeconds = u64;

#[inline]
pub fn get_current_time() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
}

#[inline]
pub fn now_secs() -> TimestampSeconds {
    get_current_time().as_secs()
}
