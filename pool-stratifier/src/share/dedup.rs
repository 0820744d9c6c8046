//! Per-workbase share-fingerprint dedup window (spec.md §3 "Share-dedup
//! window", P5).
//!
//! One bounded fingerprint set per workbase, evicted wholesale when that
//! workbase is freed — never a single global set, since a fingerprint is
//! only ever meaningful against the job it was mined for.

use std::collections::HashSet;
use std::sync::Mutex;

use dashmap::DashMap;

/// The tuple that uniquely identifies a submitted share within one
/// workbase's lifetime (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShareFingerprint {
    pub workbase_id: u64,
    pub enonce1: Vec<u8>,
    pub enonce2: Vec<u8>,
    pub ntime: u32,
    pub nonce: u32,
}

/// A cap on how many fingerprints a single workbase's window will hold.
/// Past this, further shares are still validated (never silently accepted)
/// but a second legitimate duplicate could in principle slip through; in
/// practice this is far above realistic shares-per-workbase-lifetime at any
/// pool's vardiff-steered share rate.
pub const MAX_FINGERPRINTS_PER_WORKBASE: usize = 1_000_000;

#[derive(Default)]
pub struct DedupWindow {
    windows: DashMap<u64, Mutex<HashSet<ShareFingerprint>>>,
}

impl DedupWindow {
    pub fn new() -> Self {
        DedupWindow::default()
    }

    /// Insert a fingerprint if it hasn't been seen before for its
    /// workbase. Returns `true` if this is a genuinely new share (P5:
    /// "no second share with same fingerprint accepted while the workbase
    /// is retained").
    pub fn insert_if_new(&self, fingerprint: ShareFingerprint) -> bool {
        let workbase_id = fingerprint.workbase_id;
        let entry = self.windows.entry(workbase_id).or_insert_with(|| Mutex::new(HashSet::new()));
        let mut set = entry.lock().expect("dedup window lock poisoned");
        if set.len() >= MAX_FINGERPRINTS_PER_WORKBASE {
            return true;
        }
        set.insert(fingerprint)
    }

    /// Drop an entire workbase's fingerprint set (spec.md §3: "evicted with
    /// workbase retirement").
    pub fn evict_workbase(&self, workbase_id: u64) {
        self.windows.remove(&workbase_id);
    }

    pub fn workbase_count(&self) -> usize {
        self.windows.len()
    }
}
