//! The per-connection client instance (spec.md §3 "Client instance").
//!
//! Grounded in `p2p::peer_list::peer::Peer`'s shape: plain atomics for
//! independently-updated scalar fields (so reads never block a writer),
//! an `mpsc`-style outbound channel standing in for the live socket, and a
//! state machine of `AtomicBool` flags rather than a single enum behind a
//! lock — the same trade the teacher makes to keep per-field updates O(1)
//! and lock-free wherever a coarser lock isn't load-bearing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use pool_common::time::TimestampSeconds;

use crate::protocol::Outbound;
use crate::registry::user::{User, Worker};
use crate::stats::ShareAccumulators;
use crate::vardiff::VardiffState;

/// The out-of-scope network-I/O collaborator (spec.md §1): something that
/// can push a stratum message toward one connected socket. The stratifier
/// core only ever calls `send`; framing, TLS and the actual write live
/// outside this crate.
pub trait ClientTransport: Send + Sync {
    fn send(&self, message: Outbound);
}

/// A `ClientTransport` that simply records everything sent to it, used by
/// tests in this crate and by any harness wiring this core up without a
/// real socket yet.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<Outbound>>,
}

impl ClientTransport for RecordingTransport {
    fn send(&self, message: Outbound) {
        self.sent.lock().expect("recording transport lock poisoned").push(message);
    }
}

/// One connected stratum client (spec.md §3/§4.2).
pub struct Client {
    pub id: u64,
    pub address: SocketAddr,
    enonce1: OnceLock<Vec<u8>>,
    diff_state: Mutex<VardiffState>,
    stats: Mutex<ShareAccumulators>,
    subscribed: AtomicBool,
    authorising: AtomicBool,
    authorised: AtomicBool,
    dropped: AtomicBool,
    refcount: AtomicUsize,
    first_share_at: AtomicU64,
    last_share_at: AtomicU64,
    reject_count: AtomicU64,
    suggested_diff_set: AtomicBool,
    password_diff_set: AtomicBool,
    user: OnceLock<Weak<User>>,
    worker: OnceLock<Weak<Worker>>,
    transport: Arc<dyn ClientTransport>,
}

impl Client {
    pub fn new(
        id: u64,
        address: SocketAddr,
        start_diff: f64,
        now: TimestampSeconds,
        current_workbase_id: u64,
        transport: Arc<dyn ClientTransport>,
    ) -> Self {
        Client {
            id,
            address,
            enonce1: OnceLock::new(),
            diff_state: Mutex::new(VardiffState::new(start_diff, now, current_workbase_id)),
            stats: Mutex::new(ShareAccumulators::default()),
            subscribed: AtomicBool::new(false),
            authorising: AtomicBool::new(false),
            authorised: AtomicBool::new(false),
            dropped: AtomicBool::new(false),
            refcount: AtomicUsize::new(1),
            first_share_at: AtomicU64::new(0),
            last_share_at: AtomicU64::new(0),
            reject_count: AtomicU64::new(0),
            suggested_diff_set: AtomicBool::new(false),
            password_diff_set: AtomicBool::new(false),
            user: OnceLock::new(),
            worker: OnceLock::new(),
            transport,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    /// Complete subscribe: assign the enonce1 this client will use for the
    /// rest of its connection (spec.md §3 invariant: "no enonce1 before
    /// subscribe complete"). Panics if called twice; the registry enforces
    /// single-subscribe at a higher level (spec.md §4.2 state machine).
    pub fn complete_subscribe(&self, enonce1: Vec<u8>) {
        self.enonce1
            .set(enonce1)
            .expect("subscribe completed twice for the same client");
        self.subscribed.store(true, Ordering::SeqCst);
    }

    pub fn enonce1(&self) -> Option<&[u8]> {
        self.enonce1.get().map(Vec::as_slice)
    }

    pub fn is_authorising(&self) -> bool {
        self.authorising.load(Ordering::SeqCst)
    }

    pub fn begin_authorising(&self) {
        self.authorising.store(true, Ordering::SeqCst);
    }

    pub fn is_authorised(&self) -> bool {
        self.authorised.load(Ordering::SeqCst)
    }

    /// Mark this client authorised and bind it to its user/worker
    /// (spec.md §3: "authorised only after successful authorise"; "never
    /// spontaneously clears" — there is deliberately no `clear_authorised`).
    pub fn complete_authorise(&self, user: Weak<User>, worker: Weak<Worker>) {
        self.authorising.store(false, Ordering::SeqCst);
        self.authorised.store(true, Ordering::SeqCst);
        let _ = self.user.set(user);
        let _ = self.worker.set(worker);
    }

    pub fn fail_authorise(&self) {
        self.authorising.store(false, Ordering::SeqCst);
    }

    pub fn user(&self) -> Option<Weak<User>> {
        self.user.get().cloned()
    }

    pub fn worker(&self) -> Option<Weak<Worker>> {
        self.worker.get().cloned()
    }

    pub fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::SeqCst);
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::SeqCst)
    }

    pub fn pin(&self) {
        self.refcount.fetch_add(1, Ordering::SeqCst);
    }

    pub fn unpin(&self) {
        let prev = self.refcount.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "client refcount underflow");
    }

    /// Zombie-cleanup eligibility (spec.md §4.2): dropped, the connector no
    /// longer recognises this id, and nobody else is pinning it.
    pub fn is_zombie(&self, connector_knows: bool) -> bool {
        self.is_dropped() && !connector_knows && self.refcount() == 1
    }

    pub fn record_share_time(&self, now: TimestampSeconds) {
        self.first_share_at.compare_exchange(0, now, Ordering::SeqCst, Ordering::SeqCst).ok();
        self.last_share_at.store(now, Ordering::SeqCst);
    }

    pub fn last_share_at(&self) -> TimestampSeconds {
        self.last_share_at.load(Ordering::SeqCst)
    }

    pub fn increment_rejects(&self) -> u64 {
        self.reject_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reject_count(&self) -> u64 {
        self.reject_count.load(Ordering::SeqCst)
    }

    pub fn suggested_diff_set(&self) -> bool {
        self.suggested_diff_set.load(Ordering::SeqCst)
    }

    pub fn set_suggested_diff_set(&self) {
        self.suggested_diff_set.store(true, Ordering::SeqCst);
    }

    pub fn password_diff_set(&self) -> bool {
        self.password_diff_set.load(Ordering::SeqCst)
    }

    pub fn set_password_diff_set(&self) {
        self.password_diff_set.store(true, Ordering::SeqCst);
    }

    /// Run `f` against the diff-lock-guarded vardiff state and return
    /// whatever it returns (spec.md §5 `diff_lock`: diff/old_diff/
    /// diff_change_job_id/ssdc/ldc change atomically together, in O(1)).
    pub fn with_diff_state<R>(&self, f: impl FnOnce(VardiffState) -> (VardiffState, R)) -> R {
        let mut guard = self.diff_state.lock().expect("client diff_lock poisoned");
        let (new_state, result) = f(*guard);
        *guard = new_state;
        result
    }

    pub fn diff_state(&self) -> VardiffState {
        *self.diff_state.lock().expect("client diff_lock poisoned")
    }

    pub fn with_stats<R>(&self, f: impl FnOnce(&mut ShareAccumulators) -> R) -> R {
        let mut guard = self.stats.lock().expect("client stats_lock poisoned");
        f(&mut guard)
    }

    pub fn send(&self, message: Outbound) {
        if !self.is_dropped() {
            self.transport.send(message);
        }
    }
}
