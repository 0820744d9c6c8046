//! Workbase manager (spec.md §3, §4.1): turns an upstream block template
//! into an immutable, shareable "workbase" — the coinbase split, precomputed
//! merkle branches, and 80-byte header scaffold every `mining.notify` and
//! share validation for that job is built from.
//!
//! Grounded in `tos_daemon::core::mining::cache::BlockTemplateCache`'s
//! `Arc<RwLock<...>>`-guarded single-slot "current template" pattern,
//! generalised to also retain recently-retired workbases (by id, in a
//! `DashMap`) so shares against a job that is one-or-two notifies stale can
//! still be validated (spec.md §4.3: "unknown/retired job" is only a
//! rejection once the workbase has actually been freed, not merely
//! superseded).

pub mod coinbase;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, trace};
use pool_common::error::DecodeError;
use pool_common::hash::{double_sha256, Hash};
use pool_common::time::TimestampSeconds;
use pool_common::{difficulty, Target};

use crate::error::WorkbaseError;

use self::coinbase::{build_coinbase, CoinbaseParts};

/// A block template as handed in by the out-of-scope consensus-node RPC
/// client collaborator (spec.md §1). The stratifier core only ever reads
/// this; fetching it is someone else's problem.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub height: u64,
    pub prev_hash: Hash,
    pub coinbase_value_sat: u64,
    /// Non-coinbase transaction ids, in block order.
    pub transaction_ids: Vec<Hash>,
    pub version: u32,
    pub nbits: u32,
    pub ntime: u32,
    pub network_target: Target,
}

/// A block template's metadata without its transaction set (spec.md §4.8):
/// what a trusted upstream's remote workinfo announcement carries before the
/// matching transaction data has arrived. Otherwise identical to [`Template`].
#[derive(Debug, Clone, PartialEq)]
pub struct PartialTemplate {
    pub height: u64,
    pub prev_hash: Hash,
    pub coinbase_value_sat: u64,
    pub version: u32,
    pub nbits: u32,
    pub ntime: u32,
    pub network_target: Target,
}

/// How wide the extranonce fields are for every client of this pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtranonceLayout {
    pub enonce1_const_len: usize,
    pub enonce1_var_len: usize,
    pub enonce2_len: usize,
}

impl ExtranonceLayout {
    pub fn enonce1_total_len(&self) -> usize {
        self.enonce1_const_len + self.enonce1_var_len
    }
}

/// An immutable, published unit of mining work (spec.md §3 "Workbase").
///
/// Every field is set once at construction; the only thing that changes
/// after publish is `reader_refcount`, which is why that alone is atomic
/// while the rest is plain data behind a shared `Arc`.
#[derive(Debug)]
pub struct Workbase {
    pub id: u64,
    pub created_at: TimestampSeconds,
    pub height: u64,
    pub prev_hash: Hash,
    pub network_target: Target,
    pub network_diff: f64,
    pub version: u32,
    pub nbits: u32,
    pub ntime: u32,
    /// Merkle branch siblings needed to fold the coinbase hash up to the
    /// merkle root, precomputed once at ingest (spec.md §4.1).
    pub merkle_branches: Vec<Hash>,
    pub coinbase: CoinbaseParts,
    pub extranonce: ExtranonceLayout,
    /// True until the remote transaction data for a federation-origin
    /// workinfo has actually arrived (spec.md §4.8); local-origin workbases
    /// are never incomplete.
    pub incomplete: bool,
    /// The non-coinbase transaction set this workbase's coinbase_value and
    /// merkle branches were computed from.
    pub transaction_ids: Vec<Hash>,
    reader_refcount: AtomicUsize,
}

impl Workbase {
    /// Current reader count. `>0` pins this workbase against retirement.
    pub fn refcount(&self) -> usize {
        self.reader_refcount.load(Ordering::SeqCst)
    }

    fn pin(&self) {
        self.reader_refcount.fetch_add(1, Ordering::SeqCst);
    }

    fn unpin(&self) {
        let prev = self.reader_refcount.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "workbase refcount underflow");
    }

    /// The 80-byte header scaffold with a zeroed merkle root and nonce,
    /// little-endian word order throughout (spec.md §4.3): callers fill in
    /// the merkle root and nonce per share.
    pub fn header_template(&self) -> [u8; 80] {
        let mut header = [0u8; 80];
        header[0..4].copy_from_slice(&self.version.to_le_bytes());
        header[4..36].copy_from_slice(self.prev_hash.as_bytes());
        // 36..68 merkle root, filled in per-share.
        header[68..72].copy_from_slice(&self.ntime.to_le_bytes());
        header[72..76].copy_from_slice(&self.nbits.to_le_bytes());
        // 76..80 nonce, filled in per-share.
        header
    }
}

/// A live reference to a [`Workbase`] that decrements its reader refcount on
/// drop. Holding one guarantees the workbase will not be freed out from
/// under a share validation in progress (spec.md §3/§9: "never freed while
/// refcount > 0").
pub struct WorkbasePin(Arc<Workbase>);

impl std::ops::Deref for WorkbasePin {
    type Target = Workbase;
    fn deref(&self) -> &Workbase {
        &self.0
    }
}

impl Clone for WorkbasePin {
    fn clone(&self) -> Self {
        self.0.pin();
        WorkbasePin(self.0.clone())
    }
}

impl Drop for WorkbasePin {
    fn drop(&mut self) {
        self.0.unpin();
    }
}

/// Merkle branch precompute (spec.md §4.1): the sibling hash needed at each
/// level to fold the coinbase (always leaf index 0) up to the merkle root.
/// A coinbase-only block yields no branches.
pub fn compute_merkle_branches(transaction_ids: &[Hash]) -> Vec<Hash> {
    if transaction_ids.is_empty() {
        return Vec::new();
    }
    // Leaf 0 is a placeholder for the (not-yet-known) coinbase hash; only
    // its position matters for branch extraction, never its value.
    let mut level: Vec<Hash> = std::iter::once(Hash::zero())
        .chain(transaction_ids.iter().copied())
        .collect();
    let mut branches = Vec::new();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().unwrap();
            level.push(last);
        }
        branches.push(level[1]);
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks_exact(2) {
            let mut buf = Vec::with_capacity(64);
            buf.extend_from_slice(pair[0].as_bytes());
            buf.extend_from_slice(pair[1].as_bytes());
            next.push(double_sha256(&buf));
        }
        level = next;
    }
    branches
}

/// Fold a coinbase hash up through precomputed merkle branches to the
/// merkle root (spec.md §4.3 header construction step). Used by both
/// workbase ingest (sanity, with a placeholder) and the share pipeline
/// (for real, with the per-share coinbase hash).
pub fn fold_merkle_root(coinbase_hash: Hash, branches: &[Hash]) -> Hash {
    let mut acc = coinbase_hash;
    for branch in branches {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(acc.as_bytes());
        buf.extend_from_slice(branch.as_bytes());
        acc = double_sha256(&buf);
    }
    acc
}

/// How long a retired workbase is kept around before it is eligible for
/// freeing (spec.md §9 Open Question (a)).
///
/// The source material describes retention two incompatible ways — a fixed
/// wall-clock age, and "keep the last N heights". This crate uses the
/// wall-clock variant: workbases are freed `retention_secs` after they stop
/// being current, regardless of how many blocks/heights have gone by since.
/// Wall-clock retention is what actually matters for share validity here —
/// a share can arrive late because of network jitter on a slow miner, which
/// is bounded in time, not in block count — so it is the behaviour this
/// crate implements; see DESIGN.md for the full rationale.
pub const DEFAULT_RETENTION_SECS: u64 = 120;

/// Owns the currently-published workbase plus a bounded set of recently
/// retired ones, keyed by id.
pub struct WorkbaseManager {
    next_id: AtomicU64,
    current: arc_swap_lite::ArcCell<Option<Arc<Workbase>>>,
    retained: DashMap<u64, Arc<Workbase>>,
    retention_secs: u64,
}

/// A tiny single-slot swap cell, grounded in the same `Arc<RwLock<...>>`
/// "current template" shape `BlockTemplateCache` uses, kept as its own
/// module so `WorkbaseManager` doesn't need `async` just to read a pointer.
mod arc_swap_lite {
    use std::sync::{Arc, RwLock};

    pub struct ArcCell<T>(RwLock<Arc<T>>);

    impl<T> ArcCell<T> {
        pub fn new(value: T) -> Self {
            ArcCell(RwLock::new(Arc::new(value)))
        }

        pub fn load(&self) -> Arc<T> {
            self.0.read().expect("workbase current lock poisoned").clone()
        }

        pub fn store(&self, value: T) {
            *self.0.write().expect("workbase current lock poisoned") = Arc::new(value);
        }
    }
}

impl WorkbaseManager {
    pub fn new(retention_secs: u64) -> Self {
        WorkbaseManager {
            next_id: AtomicU64::new(0),
            current: arc_swap_lite::ArcCell::new(None),
            retained: DashMap::new(),
            retention_secs,
        }
    }

    /// Ingest a fresh template and atomically publish the resulting
    /// workbase as current (spec.md §4.1). All the expensive precompute
    /// (coinbase assembly, merkle branches) happens before the publish, so
    /// the publish itself is an O(1) pointer swap plus a map insert.
    #[allow(clippy::too_many_arguments)]
    pub fn ingest_template(
        &self,
        template: &Template,
        pool_address: &str,
        donation_address: &str,
        donation_percent: f64,
        extranonce: ExtranonceLayout,
        allow_low_diff: bool,
        now: TimestampSeconds,
    ) -> Result<WorkbasePin, DecodeError> {
        let coinbase = build_coinbase(
            template.height,
            template.coinbase_value_sat,
            pool_address,
            donation_address,
            donation_percent,
            extranonce.enonce1_total_len() + extranonce.enonce2_len,
        )?;
        let merkle_branches = compute_merkle_branches(&template.transaction_ids);
        let network_diff = difficulty::clamp_network_diff(
            difficulty::diff_from_target(&template.network_target),
            allow_low_diff,
        );

        // Strictly increasing ids (spec.md §3 invariant): a single atomic
        // counter, bumped under no lock at all, since workbase ids never
        // need to be contiguous, only monotone.
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let workbase = Arc::new(Workbase {
            id,
            created_at: now,
            height: template.height,
            prev_hash: template.prev_hash,
            network_target: template.network_target,
            network_diff,
            version: template.version,
            nbits: template.nbits,
            ntime: template.ntime,
            merkle_branches,
            coinbase,
            extranonce,
            incomplete: false,
            transaction_ids: template.transaction_ids.clone(),
            reader_refcount: AtomicUsize::new(1),
        });

        self.retained.insert(id, workbase.clone());
        self.current.store(Some(workbase.clone()));
        debug!("workbase: published id {} (height {})", id, template.height);
        Ok(WorkbasePin(workbase))
    }

    /// Publish a workbase from a partial remote-origin template before its
    /// transaction data has arrived (spec.md §4.8): `incomplete=true`, empty
    /// merkle branches, coinbase built the same way as any other workbase
    /// since the payout split only needs the coinbase value, not the rest of
    /// the block's transactions. Completed in place by [`Self::complete_partial`].
    #[allow(clippy::too_many_arguments)]
    pub fn ingest_partial(
        &self,
        partial: &PartialTemplate,
        pool_address: &str,
        donation_address: &str,
        donation_percent: f64,
        extranonce: ExtranonceLayout,
        allow_low_diff: bool,
        now: TimestampSeconds,
    ) -> Result<WorkbasePin, DecodeError> {
        let coinbase = build_coinbase(
            partial.height,
            partial.coinbase_value_sat,
            pool_address,
            donation_address,
            donation_percent,
            extranonce.enonce1_total_len() + extranonce.enonce2_len,
        )?;
        let network_diff =
            difficulty::clamp_network_diff(difficulty::diff_from_target(&partial.network_target), allow_low_diff);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let workbase = Arc::new(Workbase {
            id,
            created_at: now,
            height: partial.height,
            prev_hash: partial.prev_hash,
            network_target: partial.network_target,
            network_diff,
            version: partial.version,
            nbits: partial.nbits,
            ntime: partial.ntime,
            merkle_branches: Vec::new(),
            coinbase,
            extranonce,
            incomplete: true,
            transaction_ids: Vec::new(),
            reader_refcount: AtomicUsize::new(1),
        });

        self.retained.insert(id, workbase.clone());
        self.current.store(Some(workbase.clone()));
        debug!("workbase: published partial id {} (height {})", id, partial.height);
        Ok(WorkbasePin(workbase))
    }

    /// Supply the transaction set for a previously partial remote workbase
    /// (spec.md §4.8), recomputing merkle branches and flipping `incomplete`
    /// to false. A workbase's identity is its id, not its pointer: this
    /// replaces the retained entry (and the published one, if this id is
    /// still current) in place, the same O(1)-swap discipline `ingest_template`
    /// uses for a fresh publish.
    pub fn complete_partial(&self, id: u64, transaction_ids: Vec<Hash>) -> Result<WorkbasePin, WorkbaseError> {
        let existing = self.retained.get(&id).ok_or(WorkbaseError::NotFound)?.clone();
        let merkle_branches = compute_merkle_branches(&transaction_ids);
        let completed = Arc::new(Workbase {
            id: existing.id,
            created_at: existing.created_at,
            height: existing.height,
            prev_hash: existing.prev_hash,
            network_target: existing.network_target,
            network_diff: existing.network_diff,
            version: existing.version,
            nbits: existing.nbits,
            ntime: existing.ntime,
            merkle_branches,
            coinbase: existing.coinbase.clone(),
            extranonce: existing.extranonce,
            incomplete: false,
            transaction_ids,
            reader_refcount: AtomicUsize::new(1),
        });

        self.retained.insert(id, completed.clone());
        let current_slot = self.current.load();
        let current_slot: &Option<Arc<Workbase>> = current_slot.as_ref();
        if current_slot.as_ref().map(|wb| wb.id) == Some(id) {
            self.current.store(Some(completed.clone()));
        }
        Ok(WorkbasePin(completed))
    }

    /// The currently published workbase, pinned.
    pub fn current(&self) -> Option<WorkbasePin> {
        let slot = self.current.load();
        let slot: &Option<Arc<Workbase>> = slot.as_ref();
        slot.as_ref().map(|wb| {
            wb.pin();
            WorkbasePin(wb.clone())
        })
    }

    /// Look up and pin a workbase by id, whether current or merely retained
    /// (spec.md §4.3: shares against a recently-superseded-but-not-yet-freed
    /// job are still valid).
    pub fn lookup(&self, id: u64) -> Option<WorkbasePin> {
        self.retained.get(&id).map(|entry| {
            entry.pin();
            WorkbasePin(entry.clone())
        })
    }

    /// Free any retained workbase old enough (`created_at + retention_secs
    /// <= now`) with zero readers (spec.md P2: "free(w) only after
    /// t_retire AND readers == 0"). A workbase that is still the current
    /// one is never freed regardless of age.
    pub fn retire(&self, now: TimestampSeconds) {
        let current_slot = self.current.load();
        let current_slot: &Option<Arc<Workbase>> = current_slot.as_ref();
        let current_id = current_slot.as_ref().map(|wb| wb.id);
        self.retained.retain(|&id, wb| {
            if Some(id) == current_id {
                return true;
            }
            let age_ok = now.saturating_sub(wb.created_at) >= self.retention_secs;
            let free = age_ok && wb.refcount() == 0;
            if free {
                trace!("workbase: freed retired id {id}");
            }
            !free
        });
    }

    pub fn retained_count(&self) -> usize {
        self.retained.len()
    }
}
