//! Job fanout: turns a published [`Workbase`](crate::workbase::Workbase)
//! into a `mining.notify` broadcast across every subscribed client
//! (spec.md §4.5), tracking `clean_jobs` across prev_hash changes and
//! enforcing P6 (`mining.set_difficulty` before the `mining.notify` whose
//! job it first applies to, for any client whose diff changed this round).

use std::collections::HashMap;
use std::sync::Mutex;

use pool_common::hash::Hash;
use pool_common::hexutil::encode_hex;

use crate::protocol::{NotifyParams, Outbound};
use crate::registry::ClientRegistry;
use crate::workbase::Workbase;

/// Stateful only in the one field `clean_jobs` genuinely depends on: the
/// previous broadcast's prev_hash.
pub struct Dispatcher {
    last_prev_hash: Mutex<Option<Hash>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Dispatcher { last_prev_hash: Mutex::new(None) }
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher::default()
    }

    /// Render one workbase as wire-format `mining.notify` parameters,
    /// updating the `clean_jobs` tracking state as a side effect — this
    /// must only be called once per broadcast, since calling it twice for
    /// the same workbase would report `clean_jobs = false` the second time.
    pub fn build_notify(&self, workbase: &Workbase) -> NotifyParams {
        let mut last = self.last_prev_hash.lock().expect("dispatcher prev_hash lock poisoned");
        let clean_jobs = *last != Some(workbase.prev_hash);
        *last = Some(workbase.prev_hash);

        NotifyParams {
            job_id: workbase.id.to_string(),
            prev_hash: workbase.prev_hash.to_hex(),
            coinb1: encode_hex(&workbase.coinbase.coinb1),
            coinb2: encode_hex(&workbase.coinbase.coinb2),
            merkle_branches: workbase.merkle_branches.iter().map(Hash::to_hex).collect(),
            version: format!("{:08x}", workbase.version),
            nbits: format!("{:08x}", workbase.nbits),
            ntime: format!("{:08x}", workbase.ntime),
            clean_jobs,
        }
    }

    /// Broadcast a freshly published workbase to every subscribed client.
    ///
    /// `pending_diffs` is a per-client map of any vardiff diff change not
    /// yet delivered (keyed by client id); for each such client, this emits
    /// `mining.set_difficulty` before `mining.notify`, never after (spec.md
    /// §5 P6). Clients absent from the map get only the notify.
    pub fn broadcast(&self, workbase: &Workbase, registry: &ClientRegistry, pending_diffs: &HashMap<u64, f64>) {
        let notify = self.build_notify(workbase);
        for client in registry.subscribed_clients() {
            // Pin for the duration of the send: this client was read out of
            // the registry under no lock, so a concurrent zombie sweep must
            // not see it as unreferenced while a send is still in flight.
            client.pin();
            if let Some(&new_diff) = pending_diffs.get(&client.id) {
                client.send(Outbound::SetDifficulty(new_diff));
            }
            client.send(Outbound::Notify(notify.clone()));
            client.unpin();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::client::RecordingTransport;
    use crate::workbase::{ExtranonceLayout, Template, WorkbaseManager};
    use pool_common::config::PoolConfig;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Arc;

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3333)
    }

    fn layout() -> ExtranonceLayout {
        ExtranonceLayout { enonce1_const_len: 4, enonce1_var_len: 4, enonce2_len: 8 }
    }

    fn ingest(mgr: &WorkbaseManager, prev_hash: Hash) -> u64 {
        let cfg = PoolConfig::default();
        let template = Template {
            height: 1,
            prev_hash,
            coinbase_value_sat: 5_000_000_000,
            transaction_ids: vec![],
            version: 1,
            nbits: 0x1d00_ffff,
            ntime: 1_700_000_000,
            network_target: pool_common::difficulty::target_from_diff(1000.0).unwrap(),
        };
        let pin = mgr
            .ingest_template(
                &template,
                "1BoatSLRHtKNngkdXEeobR76b53LETtpyT",
                "3P14159f73E4gFr7JterCCQh9QjiTjiZrG",
                cfg.donation,
                layout(),
                cfg.allow_low_diff,
                0,
            )
            .unwrap();
        pin.id
    }

    #[test]
    fn clean_jobs_is_true_on_first_broadcast_and_on_prev_hash_change() {
        let dispatcher = Dispatcher::new();
        let mgr = WorkbaseManager::new(120);
        let hash_a = Hash::zero();
        let hash_b = pool_common::hash::double_sha256(b"next block");

        ingest(&mgr, hash_a);
        let first = mgr.current().unwrap();
        assert!(dispatcher.build_notify(&first).clean_jobs);

        ingest(&mgr, hash_a);
        let same_prev = mgr.current().unwrap();
        assert!(!dispatcher.build_notify(&same_prev).clean_jobs);

        ingest(&mgr, hash_b);
        let new_prev = mgr.current().unwrap();
        assert!(dispatcher.build_notify(&new_prev).clean_jobs);
    }

    #[test]
    fn broadcast_only_reaches_subscribed_clients() {
        let dispatcher = Dispatcher::new();
        let mgr = WorkbaseManager::new(120);
        ingest(&mgr, Hash::zero());
        let workbase = mgr.current().unwrap();

        let registry = ClientRegistry::new(layout());
        let subscribed_transport = Arc::new(RecordingTransport::default());
        let subscribed = registry.register(1, addr(), 42.0, 0, workbase.id, subscribed_transport.clone()).unwrap();
        registry.subscribe(&subscribed);

        let unsubscribed_transport = Arc::new(RecordingTransport::default());
        registry.register(2, addr(), 42.0, 0, workbase.id, unsubscribed_transport.clone()).unwrap();

        dispatcher.broadcast(&workbase, &registry, &HashMap::new());

        assert_eq!(subscribed_transport.sent.lock().unwrap().len(), 1);
        assert!(unsubscribed_transport.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn set_difficulty_precedes_notify_for_a_client_with_a_pending_diff_change() {
        let dispatcher = Dispatcher::new();
        let mgr = WorkbaseManager::new(120);
        ingest(&mgr, Hash::zero());
        let workbase = mgr.current().unwrap();

        let registry = ClientRegistry::new(layout());
        let transport = Arc::new(RecordingTransport::default());
        let client = registry.register(1, addr(), 42.0, 0, workbase.id, transport.clone()).unwrap();
        registry.subscribe(&client);

        let mut pending = HashMap::new();
        pending.insert(1, 128.0);
        dispatcher.broadcast(&workbase, &registry, &pending);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0], Outbound::SetDifficulty(d) if d == 128.0));
        assert!(matches!(sent[1], Outbound::Notify(_)));
    }

    #[test]
    fn a_client_with_no_pending_diff_only_gets_the_notify() {
        let dispatcher = Dispatcher::new();
        let mgr = WorkbaseManager::new(120);
        ingest(&mgr, Hash::zero());
        let workbase = mgr.current().unwrap();

        let registry = ClientRegistry::new(layout());
        let transport = Arc::new(RecordingTransport::default());
        let client = registry.register(1, addr(), 42.0, 0, workbase.id, transport.clone()).unwrap();
        registry.subscribe(&client);

        dispatcher.broadcast(&workbase, &registry, &HashMap::new());

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], Outbound::Notify(_)));
    }
}
