//! Per-interval diff-share accumulators (spec.md §3) shared by `User` and
//! `Worker`, and the hashmeter rollup built on top of them (spec.md §4.7).
//!
//! Grounded in the same decaying-moving-average shape `vardiff`'s `dsps`
//! uses, generalised to the fixed set of reporting windows ckpool exposes:
//! 15 seconds, 1 minute, 5 minutes, 1 hour, 24 hours, 7 days.

use pool_common::time::TimestampSeconds;

use crate::vardiff::decay_time;

/// The reporting windows spec.md §3 names, in seconds.
pub const WINDOWS_SECS: [(&str, f64); 6] = [
    ("15s", 15.0),
    ("1m", 60.0),
    ("5m", 300.0),
    ("1h", 3600.0),
    ("24h", 86_400.0),
    ("7d", 604_800.0),
];

/// Decayed diff-shares-per-second for every standard reporting window, plus
/// the best-ever single share difficulty seen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShareAccumulators {
    pub dsps_15s: f64,
    pub dsps_1m: f64,
    pub dsps_5m: f64,
    pub dsps_1h: f64,
    pub dsps_24h: f64,
    pub dsps_7d: f64,
    pub best_share_diff: f64,
    pub last_update: TimestampSeconds,
}

impl Default for ShareAccumulators {
    fn default() -> Self {
        ShareAccumulators {
            dsps_15s: 0.0,
            dsps_1m: 0.0,
            dsps_5m: 0.0,
            dsps_1h: 0.0,
            dsps_24h: 0.0,
            dsps_7d: 0.0,
            best_share_diff: 0.0,
            last_update: 0,
        }
    }
}

impl ShareAccumulators {
    /// Fold a scored share's diff credit into every window's EMA and track
    /// the best-ever share (spec.md §3: "best-ever share" never decreases).
    pub fn record_share(&mut self, diff_credit: f64, now: TimestampSeconds) {
        let fsecs = (now.saturating_sub(self.last_update)) as f64;
        self.dsps_15s = decay_time(self.dsps_15s, diff_credit, fsecs, 15.0);
        self.dsps_1m = decay_time(self.dsps_1m, diff_credit, fsecs, 60.0);
        self.dsps_5m = decay_time(self.dsps_5m, diff_credit, fsecs, 300.0);
        self.dsps_1h = decay_time(self.dsps_1h, diff_credit, fsecs, 3_600.0);
        self.dsps_24h = decay_time(self.dsps_24h, diff_credit, fsecs, 86_400.0);
        self.dsps_7d = decay_time(self.dsps_7d, diff_credit, fsecs, 604_800.0);
        if diff_credit > self.best_share_diff {
            self.best_share_diff = diff_credit;
        }
        self.last_update = now;
    }

    /// Age every window forward without a fresh share (spec.md §4.7
    /// hashmeter tick: "moves unaccounted shares into the EMA then zeroes
    /// unaccounted"). Passing `fadd = 0.0` is exactly that: the existing
    /// average simply decays toward zero over the elapsed gap.
    pub fn tick(&mut self, now: TimestampSeconds) {
        self.record_share(0.0, now);
        // record_share's best-share tracking is a no-op for fadd=0.0 since
        // 0.0 never exceeds a nonnegative best_share_diff.
    }

    /// Reported hashrate in hashes/second for the 5-minute window, the one
    /// ckpool-style pools conventionally display (spec.md §4.7:
    /// `hashrate = dsps * 2^32`).
    pub fn hashrate_5m(&self) -> f64 {
        self.dsps_5m * 4_294_967_296.0
    }
}
