//! Authorisation and suggest/password difficulty requests (spec.md §4.2,
//! §4.6).
//!
//! Address validation and scriptPubKey dispatch are handled entirely by
//! `pool_common::address` (itself grounded in the real `bitcoin` crate);
//! this module is only the password-diff parser state machine and the
//! suggest-diff/password-diff request path into vardiff.

use log::debug;

use pool_common::difficulty::EPSILON;
use pool_common::time::TimestampSeconds;

use crate::registry::client::Client;
use crate::registry::user::User;
use crate::vardiff::{apply_requested_diff, VardiffAction};

/// Parse a stratum password for an embedded `diff=<number>` request
/// (spec.md §4.2, resolving §9 Open Question (c) in favour of
/// comma-or-end-of-string delimiters only — no trailing-space variant).
///
/// A match is only recognised at the start of a comma-separated segment
/// (i.e. at the start of the password, or immediately after a `,`), is
/// case-sensitive (`Diff=` does not match), and the numeric value must span
/// the rest of that segment exactly — Rust's strict (whitespace-free) float
/// parser already rejects a space before the value (`"diff= 1"`) or before
/// the following comma (`"diff=1 ,x"`), without this function needing its
/// own whitespace handling. The whole password is trimmed of leading/
/// trailing whitespace first (spec.md §4.2: a match is valid "possibly with
/// edge whitespace, trimmed first"), so `" diff=5"` still matches.
pub fn parse_password_diff(password: &str) -> Option<f64> {
    for segment in password.trim().split(',') {
        if let Some(rest) = segment.strip_prefix("diff=") {
            if let Ok(value) = rest.parse::<f64>() {
                if value.is_finite() && value > 0.0 {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Apply a password-embedded diff request, if present. Always targets the
/// client's *current* job id (spec.md §4.4 step 6), clamped only to the
/// pool's mindiff floor (§9 Open Question (b): no maxdiff clamp here —
/// a ceiling need routes through vardiff's own clamp step instead).
/// Marks `password_diff_set` so later `suggest_difficulty` messages are
/// ignored (spec.md §4.2).
pub fn handle_password_diff(
    client: &Client,
    password: &str,
    pool_mindiff: f64,
    current_workbase_id: u64,
    now: TimestampSeconds,
) -> Option<VardiffAction> {
    let requested = parse_password_diff(password)?;
    client.set_password_diff_set();
    let action = client.with_diff_state(|state| {
        let (new_state, action) =
            apply_requested_diff(state, requested, pool_mindiff, current_workbase_id, now);
        (new_state, action)
    });
    Some(action)
}

/// Apply a `mining.suggest_difficulty` request (spec.md §4.2/§4.6).
///
/// A no-op once a password-diff has already been set for this client (the
/// password always wins and freezes further suggestions), and a no-op if
/// the requested value is already within epsilon of the client's current
/// diff or of the last suggestion it made.
pub fn handle_suggest_difficulty(
    client: &Client,
    requested: f64,
    pool_mindiff: f64,
    current_workbase_id: u64,
    now: TimestampSeconds,
) -> Option<VardiffAction> {
    if client.password_diff_set() {
        return None;
    }
    let current_diff = client.diff_state().diff;
    if (requested - current_diff).abs() < EPSILON {
        client.set_suggested_diff_set();
        return None;
    }
    client.set_suggested_diff_set();
    let action = client.with_diff_state(|state| {
        apply_requested_diff(state, requested, pool_mindiff, current_workbase_id, now)
    });
    Some(action)
}

/// Record a failed `mining.authorize` against the user's backoff window
/// (spec.md §4.6: "each subsequent failure doubles the window, capped").
pub fn record_auth_failure(user: &User, now: TimestampSeconds, max_window_secs: u64) {
    let mut backoff = user.backoff.lock().expect("user backoff lock poisoned");
    backoff.record_failure(now, max_window_secs);
    debug!(
        "auth: backoff armed for {} until {}s",
        user.username, backoff.blocked_until()
    );
}

pub fn is_backoff_blocked(user: &User, now: TimestampSeconds) -> bool {
    user.backoff.lock().expect("user backoff lock poisoned").is_blocked(now)
}
