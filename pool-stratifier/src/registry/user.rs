//! User and Worker records (spec.md §3).
//!
//! A `Worker` holds a weak back-reference to its owning `User` rather than
//! an `Arc`, so the registry's `User -> Worker` ownership stays a tree, not
//! a cycle (spec.md §9: "no cyclic refs; weak id-lookups").

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, Weak};

use dashmap::DashMap;
use log::debug;
use pool_common::time::TimestampSeconds;
use pool_common::ua::normalize_ua;

use crate::stats::ShareAccumulators;

/// Auth failure backoff (spec.md §3/§4.6): doubles on every failure, capped
/// at a configured maximum, and resets completely on success.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AuthBackoff {
    window_secs: u64,
    blocked_until: TimestampSeconds,
}

impl AuthBackoff {
    pub fn is_blocked(&self, now: TimestampSeconds) -> bool {
        now < self.blocked_until
    }

    pub fn blocked_until(&self) -> TimestampSeconds {
        self.blocked_until
    }

    pub fn record_failure(&mut self, now: TimestampSeconds, max_window_secs: u64) {
        self.window_secs = if self.window_secs == 0 {
            1
        } else {
            (self.window_secs * 2).min(max_window_secs)
        };
        self.blocked_until = now + self.window_secs;
    }

    pub fn record_success(&mut self) {
        self.window_secs = 0;
        self.blocked_until = 0;
    }
}

/// A payout address's aggregate account (spec.md §3 "User").
pub struct User {
    pub username: String,
    pub accumulators: Mutex<ShareAccumulators>,
    pub backoff: Mutex<AuthBackoff>,
    pub last_auth_at: AtomicU64,
    pub workers: DashMap<String, std::sync::Arc<Worker>>,
}

impl User {
    pub fn new(username: String) -> Self {
        User {
            username,
            accumulators: Mutex::new(ShareAccumulators::default()),
            backoff: Mutex::new(AuthBackoff::default()),
            last_auth_at: AtomicU64::new(0),
            workers: DashMap::new(),
        }
    }

    pub fn record_successful_auth(&self, now: TimestampSeconds) {
        self.last_auth_at.store(now, Ordering::SeqCst);
        let mut backoff = self.backoff.lock().expect("user backoff lock poisoned");
        if backoff.blocked_until() != 0 {
            debug!("auth: backoff cleared for {}", self.username);
        }
        backoff.record_success();
    }

    pub fn connected_client_count(&self) -> usize {
        self.workers.iter().map(|w| w.instance_count()).sum()
    }
}

/// One named worker under a `User` (spec.md §3 "Worker").
pub struct Worker {
    pub owner: Weak<User>,
    pub name: String,
    pub accumulators: Mutex<ShareAccumulators>,
    pub mindiff_override: Mutex<Option<f64>>,
    persisted_ua: Mutex<String>,
    instance_count: AtomicUsize,
}

impl Worker {
    pub fn new(owner: Weak<User>, name: String) -> Self {
        Worker {
            owner,
            name,
            accumulators: Mutex::new(ShareAccumulators::default()),
            mindiff_override: Mutex::new(None),
            persisted_ua: Mutex::new(String::new()),
            instance_count: AtomicUsize::new(0),
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instance_count.load(Ordering::SeqCst)
    }

    /// A client finished authorising against this worker.
    pub fn attach_client(&self) {
        self.instance_count.fetch_add(1, Ordering::SeqCst);
    }

    /// A client attached to this worker disconnected.
    pub fn detach_client(&self) {
        let prev = self.instance_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "worker instance_count underflow");
    }

    pub fn persisted_useragent(&self) -> String {
        self.persisted_ua.lock().expect("worker ua lock poisoned").clone()
    }

    /// The three-way user-agent recalculation rule (spec.md §3): with zero
    /// attached clients the persisted UA is left untouched; with exactly
    /// one, it mirrors (and normalises) that client's UA; with more than
    /// one, it becomes the synthetic `"Other"` token since no single UA is
    /// representative any more.
    pub fn recalc_useragent(&self, connected_client_uas: &[String]) {
        let mut persisted = self.persisted_ua.lock().expect("worker ua lock poisoned");
        match connected_client_uas.len() {
            0 => {}
            1 => *persisted = normalize_ua(&connected_client_uas[0]),
            _ => *persisted = "Other".to_string(),
        }
    }
}
