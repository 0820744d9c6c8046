//! Upstream federation glue (spec.md §4.8): remote workinfo hand-off to the
//! workbase manager, remote-authoritative share outcomes, block
//! announcements, and the trusted-remote trust boundary.
//!
//! Grounded in `tos_daemon`'s p2p sync boundary (a distinct, explicitly
//! trusted peer class whose announcements are taken as authoritative rather
//! than independently re-derived) generalised to stratum federation: a
//! downstream pool trusts its upstream's share/block verdicts for the
//! client ids it originated there, while still running its own local
//! validation on everything it can check itself (spec.md §4.8: "Its share
//! pipeline still locally validates what it can, but defers final
//! acceptance to upstream where the upstream has the full txn data").

use dashmap::DashMap;

use pool_common::hash::Hash;
use pool_common::time::TimestampSeconds;

use crate::error::ShareReject;
use crate::registry::client::Client;
use crate::share::dedup::{DedupWindow, ShareFingerprint};

/// A block this pool's upstream announced as found, independent of whether
/// this pool itself ever saw the winning share (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAnnouncement {
    pub height: u64,
    pub hash: Hash,
}

/// The upstream's authoritative verdict on one share this pool forwarded to
/// it (spec.md §4.8): overrides whatever this pool's own local validation
/// concluded, since the upstream alone holds the full transaction set a
/// remote-origin workbase's block candidacy depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteShareVerdict {
    pub client_id: u64,
    pub workbase_id: u64,
    pub accepted: bool,
    pub reject_reason: Option<ShareReject>,
}

/// A client admitted as a trusted remote (spec.md §4.8): this pool's own
/// upstream link, or a downstream pool federating through this one. Plain
/// membership, not a capability — callers consult [`FederationLink::is_trusted`]
/// before routing a client's shares through the privileged dedup space.
#[derive(Default)]
pub struct TrustedRemotes {
    ids: DashMap<u64, ()>,
}

impl TrustedRemotes {
    pub fn new() -> Self {
        TrustedRemotes::default()
    }

    pub fn admit(&self, client_id: u64) {
        self.ids.insert(client_id, ());
    }

    pub fn revoke(&self, client_id: u64) {
        self.ids.remove(&client_id);
    }

    pub fn is_trusted(&self, client_id: u64) -> bool {
        self.ids.contains_key(&client_id)
    }
}

/// The federation boundary's own share-dedup space (spec.md §4.8: "bypasses
/// per-share dedup against window owned by the other party — each party
/// dedups its own space"). Kept as a dedicated [`DedupWindow`] entirely
/// separate from the local share pipeline's, rather than a shared instance
/// with an exemption flag, so a trusted remote's fingerprints can never
/// collide with (or be suppressed by) this pool's own miners' fingerprints
/// for the same workbase id.
pub struct FederationLink {
    trusted: TrustedRemotes,
    remote_dedup: DedupWindow,
}

impl Default for FederationLink {
    fn default() -> Self {
        FederationLink {
            trusted: TrustedRemotes::new(),
            remote_dedup: DedupWindow::new(),
        }
    }
}

impl FederationLink {
    pub fn new() -> Self {
        FederationLink::default()
    }

    pub fn admit_trusted_remote(&self, client_id: u64) {
        self.trusted.admit(client_id);
    }

    pub fn is_trusted_remote(&self, client_id: u64) -> bool {
        self.trusted.is_trusted(client_id)
    }

    /// Record a fingerprint in the federation's own dedup space. Returns
    /// `true` if genuinely new. Never consults (or pollutes) the local
    /// share pipeline's [`DedupWindow`].
    pub fn insert_remote_fingerprint(&self, fingerprint: ShareFingerprint) -> bool {
        self.remote_dedup.insert_if_new(fingerprint)
    }

    pub fn evict_workbase(&self, workbase_id: u64) {
        self.remote_dedup.evict_workbase(workbase_id);
    }
}

/// Apply an upstream's authoritative verdict for a share this pool already
/// scored locally (spec.md §4.8). A rejection reverses whatever credit the
/// local pipeline already recorded is deliberately *not* this function's
/// job — that bookkeeping happens in the same place ordinary share scoring
/// does, keyed by client id, so the two paths can't double-apply or
/// double-reverse a credit. This function only records the authoritative
/// outcome against the client's reject counter and share timing, matching
/// what the local pipeline itself does for a same-shaped local verdict.
pub fn apply_remote_verdict(client: &Client, verdict: &RemoteShareVerdict, now: TimestampSeconds) {
    client.record_share_time(now);
    if !verdict.accepted {
        let rejects = client.increment_rejects();
        if rejects >= 2 {
            client.mark_dropped();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::client::RecordingTransport;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Arc;

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3333)
    }

    fn fp(workbase_id: u64) -> ShareFingerprint {
        ShareFingerprint {
            workbase_id,
            enonce1: vec![1, 2, 3, 4],
            enonce2: vec![0; 8],
            ntime: 1_700_000_000,
            nonce: 1,
        }
    }

    #[test]
    fn trusted_remotes_are_admitted_and_revocable() {
        let link = FederationLink::new();
        assert!(!link.is_trusted_remote(7));
        link.admit_trusted_remote(7);
        assert!(link.is_trusted_remote(7));
    }

    #[test]
    fn remote_dedup_space_is_independent_of_local() {
        let link = FederationLink::new();
        let local = DedupWindow::new();
        assert!(link.insert_remote_fingerprint(fp(1)));
        // The same fingerprint is still fresh in the pipeline's own window:
        // the two spaces never share state.
        assert!(local.insert_if_new(fp(1)));
    }

    #[test]
    fn remote_dedup_rejects_its_own_duplicate() {
        let link = FederationLink::new();
        assert!(link.insert_remote_fingerprint(fp(1)));
        assert!(!link.insert_remote_fingerprint(fp(1)));
    }

    #[test]
    fn a_rejected_remote_verdict_advances_reject_counter_and_can_drop() {
        let client = Client::new(1, addr(), 42.0, 0, 0, Arc::new(RecordingTransport::default()));
        let verdict = RemoteShareVerdict {
            client_id: 1,
            workbase_id: 0,
            accepted: false,
            reject_reason: Some(ShareReject::HighHash),
        };
        apply_remote_verdict(&client, &verdict, 10);
        apply_remote_verdict(&client, &verdict, 11);
        assert_eq!(client.reject_count(), 2);
        assert!(client.is_dropped());
    }

    #[test]
    fn an_accepted_remote_verdict_does_not_touch_the_reject_counter() {
        let client = Client::new(1, addr(), 42.0, 0, 0, Arc::new(RecordingTransport::default()));
        let verdict = RemoteShareVerdict {
            client_id: 1,
            workbase_id: 0,
            accepted: true,
            reject_reason: None,
        };
        apply_remote_verdict(&client, &verdict, 10);
        assert_eq!(client.reject_count(), 0);
        assert!(!client.is_dropped());
    }
}
