//! Per-client variable difficulty controller (spec.md §4.4).
//!
//! Modelled as a pure `(state, clock) -> (new_state, action | None)`
//! transition (spec.md §9: "vardiff as pure state/clock functions"), so it
//! can be unit tested without a running client registry or real time —
//! mirroring how `tos_common::difficulty`'s adjustment math is plain
//! numeric functions the daemon's block-acceptance path calls, not a
//! stateful service of its own.

use log::trace;

use pool_common::difficulty::{normalize_pool_diff, EPSILON};
use pool_common::time::TimestampSeconds;

/// Target share interval the controller steers every client towards.
pub const TARGET_SECS_PER_SHARE: f64 = 3.33;

/// The three vardiff decision-cadence tiers (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    UltraFast,
    Fast,
    Normal,
}

impl Cadence {
    pub fn period_secs(self) -> f64 {
        match self {
            Cadence::UltraFast => 15.0,
            Cadence::Fast => 60.0,
            Cadence::Normal => 300.0,
        }
    }
}

/// Pick the cadence tier for a client that has just submitted its
/// `shares_since_diff_change`-th share, `secs_since_last_change` after its
/// diff last changed.
pub fn cadence_for(shares_since_diff_change: u64, secs_since_last_change: f64) -> Cadence {
    if shares_since_diff_change >= 144 && secs_since_last_change < 15.0 {
        Cadence::UltraFast
    } else if shares_since_diff_change >= 72 {
        Cadence::Fast
    } else {
        Cadence::Normal
    }
}

/// Exponential decay of a moving average `f` towards a fresh sample
/// `fadd` contributed over `fsecs` seconds, with smoothing window
/// `interval` (spec.md §4.4).
///
/// `fsecs / interval` is clamped to 36 (`e^-36` is indistinguishable from
/// zero in `f64`, so nothing is lost by capping the exponent there); an
/// `fsecs <= 0` sample is skipped entirely rather than corrupting the
/// average with a division by zero or a negative elapsed time.
pub fn decay_time(f: f64, fadd: f64, fsecs: f64, interval: f64) -> f64 {
    if fsecs <= 0.0 {
        return f;
    }
    let exponent = (fsecs / interval).min(36.0);
    let p = 1.0 - 1.0 / exponent.exp();
    (f + fadd / fsecs * p) / (1.0 + p)
}

/// `1 - e^{-min(tdiff/period, 36)}`: how much weight recent history should
/// carry for a client that changed diff `tdiff` seconds ago. Monotone
/// non-decreasing in `tdiff`, and always in `[0, 1)` for `period > 0`
/// (spec.md P7).
pub fn time_bias(tdiff: f64, period: f64) -> f64 {
    let exponent = (tdiff / period).min(36.0).max(0.0);
    1.0 - 1.0 / exponent.exp()
}

/// The mutable vardiff state spec.md §3 stores per client, guarded in the
/// real registry by a single `diff_lock` mutex so every field here changes
/// atomically together (spec.md §5 "P1").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VardiffState {
    pub diff: f64,
    pub old_diff: f64,
    pub diff_change_job_id: u64,
    pub shares_since_diff_change: u64,
    pub last_diff_change: TimestampSeconds,
    /// Decayed diff-shares-per-second estimate for this client.
    pub dsps: f64,
}

impl VardiffState {
    pub fn new(start_diff: f64, now: TimestampSeconds, current_workbase_id: u64) -> Self {
        VardiffState {
            diff: start_diff,
            old_diff: start_diff,
            diff_change_job_id: current_workbase_id,
            shares_since_diff_change: 0,
            last_diff_change: now,
            dsps: 0.0,
        }
    }
}

/// The floors/ceiling vardiff must respect (spec.md §4.4 step 4): pool-wide
/// `mindiff`/`maxdiff` plus an optional per-worker `mindiff` override.
/// Network difficulty is deliberately absent — it is never a ceiling on
/// worker diff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VardiffLimits {
    pub pool_mindiff: f64,
    /// `<= 0.0` means disabled.
    pub pool_maxdiff: f64,
    pub worker_mindiff: Option<f64>,
}

/// The one action vardiff ever emits: arm a new difficulty, effective as of
/// `diff_change_job_id`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VardiffAction {
    pub new_diff: f64,
    pub diff_change_job_id: u64,
}

/// Record a scored share against the dsps estimate and bump the
/// since-last-change counter. Pure: returns the updated state rather than
/// mutating in place, so callers decide how to publish it under their own
/// lock.
pub fn record_share(state: VardiffState, diff_credit: f64, now: TimestampSeconds) -> VardiffState {
    let since_change = (now.saturating_sub(state.last_diff_change)) as f64;
    let cadence = cadence_for(state.shares_since_diff_change, since_change);
    // The dsps EMA is always decayed against the wall-clock gap since the
    // *previous share*, not since the last diff change; approximate that
    // gap with 1 second when this is the very first share recorded so the
    // first sample doesn't get an artificially huge weight.
    let fsecs = if state.shares_since_diff_change == 0 {
        1.0
    } else {
        since_change.max(1.0)
    };
    let dsps = decay_time(state.dsps, diff_credit, fsecs, cadence.period_secs());
    VardiffState {
        dsps,
        shares_since_diff_change: state.shares_since_diff_change + 1,
        ..state
    }
}

/// Run the ordered vardiff decision rules (spec.md §4.4) and return the
/// possibly-updated state plus an action if diff changed.
pub fn decide(
    state: VardiffState,
    limits: &VardiffLimits,
    current_workbase_id: u64,
    now: TimestampSeconds,
) -> (VardiffState, Option<VardiffAction>) {
    let multiplier = if limits.worker_mindiff.is_some() { 2.4 } else { 3.33 };
    let optimal = normalize_pool_diff(state.dsps * multiplier);

    // Rule 1: no-op if already at (within epsilon of) the optimal diff.
    if (state.diff - optimal).abs() < EPSILON {
        return (state, None);
    }

    // Rule 2: hysteresis deadband around the target share rate.
    if state.diff > 0.0 {
        let drr = state.dsps / state.diff;
        if drr > 0.15 && drr < 0.4 {
            return (state, None);
        }
    }

    // Rule 3: cold-start grace — the first share after a reconnect must not
    // immediately lower diff, even if the dsps estimate (seeded near zero)
    // would otherwise suggest it.
    if state.shares_since_diff_change == 1 && optimal < state.diff {
        let grace_state = VardiffState {
            last_diff_change: now,
            ..state
        };
        return (grace_state, None);
    }

    // Rule 4: clamp into [max(pool_mindiff, worker_mindiff), pool_maxdiff].
    let mut clamped = optimal.max(limits.pool_mindiff);
    if let Some(worker_mindiff) = limits.worker_mindiff {
        clamped = clamped.max(worker_mindiff);
    }
    if limits.pool_maxdiff > 0.0 {
        clamped = clamped.min(limits.pool_maxdiff);
    }

    // Rule 5: guard against a degenerate clamp result.
    if clamped <= 0.0 {
        return (state, None);
    }

    // Rule 6: commit.
    let new_state = VardiffState {
        old_diff: state.diff,
        diff: clamped,
        diff_change_job_id: current_workbase_id + 1,
        shares_since_diff_change: 0,
        last_diff_change: now,
        dsps: state.dsps,
    };
    let action = VardiffAction {
        new_diff: clamped,
        diff_change_job_id: new_state.diff_change_job_id,
    };
    trace!(
        "vardiff: commit diff {} -> {} effective at job {}",
        state.diff, clamped, new_state.diff_change_job_id
    );
    (new_state, Some(action))
}

/// Apply a suggest-difficulty/password-diff request directly (spec.md
/// §4.2/§4.6): bypasses the decision rules above, but still clamps to the
/// pool's floor, and always targets the *current* workbase id rather than
/// the next one (spec.md §4.4 step 6: "...or = current_workbase_id if
/// triggered by suggest_difficulty/password-diff").
pub fn apply_requested_diff(
    state: VardiffState,
    requested: f64,
    pool_mindiff: f64,
    current_workbase_id: u64,
    now: TimestampSeconds,
) -> (VardiffState, VardiffAction) {
    let clamped = normalize_pool_diff(requested.max(pool_mindiff));
    let new_state = VardiffState {
        old_diff: state.diff,
        diff: clamped,
        diff_change_job_id: current_workbase_id,
        shares_since_diff_change: 0,
        last_diff_change: now,
        dsps: state.dsps,
    };
    let action = VardiffAction {
        new_diff: clamped,
        diff_change_job_id: current_workbase_id,
    };
    (new_state, action)
}

/// The central correctness rule of the whole share pipeline (spec.md §4.3,
/// P1): which diff a submitted share is judged against depends on whether
/// the job it was mined under predates the client's last diff change.
pub fn select_diff_for_job(state: &VardiffState, submitted_job_id: u64) -> f64 {
    if submitted_job_id >= state.diff_change_job_id {
        state.diff
    } else {
        state.old_diff
    }
}
