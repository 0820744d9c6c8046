//! The typed, validated configuration surface of spec.md §6.
//!
//! Grounded in `tos_daemon::config`'s split between documented constants and
//! a config type, and in the teacher's "validate before defaulting" posture
//! (spec.md §7: "Config validation must reject negatives before default
//! substitution, not after"). Reading this struct from a file or CLI belongs
//! to the out-of-scope process-supervision layer (spec.md §1); this module
//! only owns the typed surface and its validation.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default initial per-client difficulty (spec.md §6: `startdiff`, default 42.0).
pub const DEFAULT_STARTDIFF: f64 = 42.0;

/// Default pool floor on worker difficulty (spec.md §6: `mindiff`, default 1.0).
pub const DEFAULT_MINDIFF: f64 = 1.0;

/// Donation percentage clamp thresholds (spec.md §4.1).
pub const DONATION_MIN_PERCENT: f64 = 0.1;
pub const DONATION_MAX_PERCENT: f64 = 99.9;

/// The donation clamp spec.md §4.1 specifies for coinbase assembly: below
/// the minimum meaningful slice the donation output is dropped entirely
/// (0.0), not rounded up to the floor; above the ceiling it saturates at
/// 99.9. This governs the config value itself, since the workbase manager
/// applies it verbatim when splitting the coinbase payout.
pub fn clamp_donation_percent(pct: f64) -> f64 {
    if pct < DONATION_MIN_PERCENT {
        0.0
    } else {
        pct.min(DONATION_MAX_PERCENT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Initial per-client diff handed out on subscribe, before vardiff or
    /// suggest-diff/password-diff has had a chance to run.
    pub startdiff: f64,

    /// Pool floor on worker diff.
    pub mindiff: f64,

    /// Pool ceiling on worker diff; `0.0` disables the ceiling.
    pub maxdiff: f64,

    /// Secondary floor applied in addition to `mindiff` (spec.md §6).
    pub pool_mindiff: f64,

    /// If true, a computed network difficulty below 1.0 passes through
    /// unclamped (regtest/low-diff test networks).
    pub allow_low_diff: bool,

    /// Seconds a client may be idle (no share submitted) before the
    /// watchdog marks it for drop. `0` disables idle dropping.
    pub dropidle: u64,

    /// Donation percentage, clamped to `[0.1, 99.9]` at ingest.
    pub donation: f64,

    /// Whitelisted user-agent prefixes; empty means "allow all".
    pub useragent: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            startdiff: DEFAULT_STARTDIFF,
            mindiff: DEFAULT_MINDIFF,
            maxdiff: 0.0,
            pool_mindiff: DEFAULT_MINDIFF,
            allow_low_diff: false,
            dropidle: 0,
            donation: 1.0,
            useragent: Vec::new(),
        }
    }
}

impl PoolConfig {
    /// Validate the configuration, and clamp the donation percentage into
    /// its documented range. Called once at startup; a negative
    /// `startdiff`/`mindiff`/`maxdiff`/`pool_mindiff` is fatal (spec.md §7:
    /// "Abort startup").
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.startdiff < 0.0 {
            return Err(ConfigError::NegativeStartDiff(self.startdiff));
        }
        if self.mindiff < 0.0 {
            return Err(ConfigError::NegativeMinDiff(self.mindiff));
        }
        if self.pool_mindiff < 0.0 {
            return Err(ConfigError::NegativePoolMinDiff(self.pool_mindiff));
        }
        if self.maxdiff < 0.0 {
            return Err(ConfigError::NegativeMaxDiff(self.maxdiff));
        }
        if self.maxdiff > 0.0 && self.maxdiff < self.mindiff.max(self.pool_mindiff) {
            return Err(ConfigError::MaxDiffBelowMinDiff {
                mindiff: self.mindiff.max(self.pool_mindiff),
                maxdiff: self.maxdiff,
            });
        }
        if !self.donation.is_finite() {
            return Err(ConfigError::NonFiniteDonation(self.donation));
        }
        self.donation = clamp_donation_percent(self.donation);
        Ok(self)
    }

    /// The effective floor applied to a worker's difficulty: the larger of
    /// `mindiff` and `pool_mindiff` (spec.md §6 treats `pool_mindiff` as a
    /// secondary floor layered on top of `mindiff`).
    pub fn effective_mindiff(&self) -> f64 {
        self.mindiff.max(self.pool_mindiff)
    }

    /// Whether a reported user-agent passes the whitelist (spec.md §4.7): an
    /// empty whitelist allows everything; otherwise the normalised UA must be
    /// a prefix match of at least one configured pattern.
    pub fn useragent_allowed(&self, normalized_ua: &str) -> bool {
        self.useragent.is_empty()
            || self
                .useragent
                .iter()
                .any(|pattern| normalized_ua.starts_with(pattern.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        let cfg = PoolConfig::default().validate().unwrap();
        assert_eq!(cfg.startdiff, DEFAULT_STARTDIFF);
        assert_eq!(cfg.donation, 1.0);
    }

    #[test]
    fn negative_startdiff_is_rejected() {
        let cfg = PoolConfig {
            startdiff: -1.0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::NegativeStartDiff(-1.0)));
    }

    #[test]
    fn negative_mindiff_is_rejected() {
        let cfg = PoolConfig {
            mindiff: -0.5,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::NegativeMinDiff(-0.5)));
    }

    #[test]
    fn donation_below_threshold_clamps_to_zero() {
        let low = PoolConfig { donation: 0.0, ..Default::default() }.validate().unwrap();
        assert_eq!(low.donation, 0.0);

        let tiny = PoolConfig { donation: 0.05, ..Default::default() }.validate().unwrap();
        assert_eq!(tiny.donation, 0.0);
    }

    #[test]
    fn donation_above_ceiling_clamps_to_max() {
        let high = PoolConfig { donation: 150.0, ..Default::default() }.validate().unwrap();
        assert_eq!(high.donation, DONATION_MAX_PERCENT);
    }

    #[test]
    fn donation_within_range_passes_through() {
        let cfg = PoolConfig { donation: 2.5, ..Default::default() }.validate().unwrap();
        assert_eq!(cfg.donation, 2.5);
    }

    #[test]
    fn maxdiff_zero_disables_ceiling_even_below_mindiff() {
        let cfg = PoolConfig {
            mindiff: 5.0,
            maxdiff: 0.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn maxdiff_below_mindiff_is_rejected() {
        let cfg = PoolConfig {
            mindiff: 10.0,
            maxdiff: 5.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn useragent_whitelist_prefix_match() {
        let cfg = PoolConfig {
            useragent: vec!["cgminer".to_string(), "bmminer".to_string()],
            ..Default::default()
        };
        assert!(cfg.useragent_allowed("cgminer"));
        assert!(cfg.useragent_allowed("bmminerX"));
        assert!(!cfg.useragent_allowed("sgminer"));
    }

    #[test]
    fn empty_useragent_whitelist_allows_all() {
        let cfg = PoolConfig::default();
        assert!(cfg.useragent_allowed("anything"));
        assert!(cfg.useragent_allowed(""));
    }
}
