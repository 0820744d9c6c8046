//! Hashrate rollups and user-agent aggregation (spec.md §4.7).
//!
//! Every scope (client, worker, user, pool-wide) is backed by the same
//! [`ShareAccumulators`] EMA windows; this module only adds the scope-level
//! summation and the reported hashrate conversion, plus the whitelist-
//! filtered user-agent tally ckpool-style pools surface on their status
//! page.

use std::collections::HashMap;

use pool_common::config::PoolConfig;
use pool_common::ua::normalize_ua;

use crate::registry::{ClientRegistry, User};
use crate::stats::ShareAccumulators;

/// A snapshot of one scope's decayed diff-shares-per-second windows, plus
/// the 5-minute-window hashrate every status display actually shows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HashmeterSnapshot {
    pub dsps_15s: f64,
    pub dsps_1m: f64,
    pub dsps_5m: f64,
    pub dsps_1h: f64,
    pub dsps_24h: f64,
    pub dsps_7d: f64,
    pub hashrate_5m: f64,
}

impl From<ShareAccumulators> for HashmeterSnapshot {
    fn from(acc: ShareAccumulators) -> Self {
        HashmeterSnapshot {
            dsps_15s: acc.dsps_15s,
            dsps_1m: acc.dsps_1m,
            dsps_5m: acc.dsps_5m,
            dsps_1h: acc.dsps_1h,
            dsps_24h: acc.dsps_24h,
            dsps_7d: acc.dsps_7d,
            hashrate_5m: acc.hashrate_5m(),
        }
    }
}

impl std::ops::Add for HashmeterSnapshot {
    type Output = HashmeterSnapshot;
    fn add(self, other: HashmeterSnapshot) -> HashmeterSnapshot {
        HashmeterSnapshot {
            dsps_15s: self.dsps_15s + other.dsps_15s,
            dsps_1m: self.dsps_1m + other.dsps_1m,
            dsps_5m: self.dsps_5m + other.dsps_5m,
            dsps_1h: self.dsps_1h + other.dsps_1h,
            dsps_24h: self.dsps_24h + other.dsps_24h,
            dsps_7d: self.dsps_7d + other.dsps_7d,
            hashrate_5m: self.hashrate_5m + other.hashrate_5m,
        }
    }
}

impl Default for HashmeterSnapshot {
    fn default() -> Self {
        HashmeterSnapshot {
            dsps_15s: 0.0,
            dsps_1m: 0.0,
            dsps_5m: 0.0,
            dsps_1h: 0.0,
            dsps_24h: 0.0,
            dsps_7d: 0.0,
            hashrate_5m: 0.0,
        }
    }
}

/// Roll a single user's own accumulators plus every one of its workers'
/// into one snapshot (spec.md §4.7: a user's reported rate is the sum of
/// its workers', not a separately tracked total).
pub fn rollup_user(user: &User) -> HashmeterSnapshot {
    let mut total: HashmeterSnapshot = (*user.accumulators.lock().expect("user accumulators lock poisoned")).into();
    for worker in user.workers.iter() {
        let worker_acc: HashmeterSnapshot =
            (*worker.accumulators.lock().expect("worker accumulators lock poisoned")).into();
        total = total + worker_acc;
    }
    total
}

/// Pool-wide rollup: the sum of every known user's rollup (spec.md §4.7).
pub fn rollup_pool(registry: &ClientRegistry) -> HashmeterSnapshot {
    registry
        .all_users()
        .iter()
        .map(|user| rollup_user(user))
        .fold(HashmeterSnapshot::default(), |acc, next| acc + next)
}

/// Tally normalised, whitelist-filtered user-agents across every worker in
/// the registry (spec.md §4.7: "UA aggregation ... only whitelisted
/// prefixes are counted, everything else is dropped silently").
pub fn useragent_tally(registry: &ClientRegistry, config: &PoolConfig) -> HashMap<String, usize> {
    let mut tally = HashMap::new();
    for user in registry.all_users() {
        for worker in user.workers.iter() {
            let ua = worker.persisted_useragent();
            if ua.is_empty() {
                continue;
            }
            let normalized = normalize_ua(&ua);
            if config.useragent_allowed(&normalized) {
                *tally.entry(normalized).or_insert(0) += 1;
            }
        }
    }
    tally
}
