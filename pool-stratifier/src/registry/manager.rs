//! Client registry (spec.md §4.2): owns every connected client, the
//! subscribe -> authorising -> authorised state machine, username lookup,
//! and the pool-wide monotone extranonce1 counter.
//!
//! Grounded in `p2p::peer_list`'s `SharedPeerList` (a `DashMap`-backed
//! registry of live `Peer`s, keyed by id, with add/remove/lookup and a
//! periodic sweep for stale entries) generalised from network peers to
//! stratum clients.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::trace;
use pool_common::address::parse_username;
use pool_common::hexutil::encode_hex;
use pool_common::time::TimestampSeconds;

use crate::error::RegistryError;
use crate::registry::client::{Client, ClientTransport};
use crate::registry::user::{User, Worker};
use crate::workbase::ExtranonceLayout;

pub struct ClientRegistry {
    clients: DashMap<u64, Arc<Client>>,
    users: DashMap<String, Arc<User>>,
    next_enonce1: AtomicU64,
    layout: ExtranonceLayout,
}

impl ClientRegistry {
    pub fn new(layout: ExtranonceLayout) -> Self {
        ClientRegistry {
            clients: DashMap::new(),
            users: DashMap::new(),
            next_enonce1: AtomicU64::new(0),
            layout,
        }
    }

    /// Admit a freshly connected client (spec.md §4.2 state "new"). Not yet
    /// subscribed: any non-subscribe method will disconnect it.
    pub fn register(
        &self,
        id: u64,
        address: SocketAddr,
        start_diff: f64,
        now: TimestampSeconds,
        current_workbase_id: u64,
        transport: Arc<dyn ClientTransport>,
    ) -> Result<Arc<Client>, RegistryError> {
        if self.clients.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered);
        }
        let client = Arc::new(Client::new(id, address, start_diff, now, current_workbase_id, transport));
        self.clients.insert(id, client.clone());
        Ok(client)
    }

    pub fn get(&self, id: u64) -> Option<Arc<Client>> {
        self.clients.get(&id).map(|c| c.clone())
    }

    /// Distinct extranonce1 assignment (spec.md §4.5, P3): a pool-wide
    /// monotone counter hex-encoded to the configured constant+variable
    /// width, guaranteeing no two admitted clients ever share one.
    pub fn assign_enonce1(&self) -> Vec<u8> {
        let total_len = self.layout.enonce1_total_len();
        let counter = self.next_enonce1.fetch_add(1, Ordering::SeqCst);
        let mut bytes = counter.to_be_bytes().to_vec();
        if bytes.len() > total_len {
            bytes = bytes[bytes.len() - total_len..].to_vec();
        } else {
            let mut padded = vec![0u8; total_len - bytes.len()];
            padded.extend_from_slice(&bytes);
            bytes = padded;
        }
        bytes
    }

    pub fn enonce1_hex(bytes: &[u8]) -> String {
        encode_hex(bytes)
    }

    /// Complete `mining.subscribe` (spec.md §4.2): a client may only
    /// subscribe once.
    pub fn subscribe(&self, client: &Client) -> Vec<u8> {
        let enonce1 = self.assign_enonce1();
        client.complete_subscribe(enonce1.clone());
        enonce1
    }

    /// Validate `username[.workername]` and bind (creating as needed) the
    /// backing `User`/`Worker` records, without yet marking the client
    /// authorised (spec.md §4.2/§4.6).
    pub fn resolve_user_worker(&self, raw_username: &str) -> Result<(Arc<User>, Arc<Worker>), RegistryError> {
        let parsed = parse_username(raw_username).map_err(|_| RegistryError::NotFound)?;
        let user = self
            .users
            .entry(parsed.address.clone())
            .or_insert_with(|| Arc::new(User::new(parsed.address.clone())))
            .clone();
        let worker_name = parsed.worker.unwrap_or_else(|| "default".to_string());
        let worker = user
            .workers
            .entry(worker_name.clone())
            .or_insert_with(|| Arc::new(Worker::new(Arc::downgrade(&user), worker_name)))
            .clone();
        Ok((user, worker))
    }

    /// Finish authorising a client against its resolved user/worker,
    /// bumping the worker's `instance_count` and re-running its user-agent
    /// recalculation (spec.md §3 invariant: "instance_count must equal
    /// connected-client count").
    pub fn complete_authorise(&self, client: &Client, user: &Arc<User>, worker: &Arc<Worker>, now: TimestampSeconds) {
        client.complete_authorise(Arc::downgrade(user), Arc::downgrade(worker));
        worker.attach_client();
        user.record_successful_auth(now);
    }

    /// Remove a client entirely (spec.md §4.2/§9 zombie cleanup): only
    /// valid once `Client::is_zombie` says so. Detaches from its worker if
    /// it had completed authorise.
    pub fn remove(&self, id: u64) {
        if let Some((_, client)) = self.clients.remove(&id) {
            if let Some(worker) = client.worker().and_then(|w| w.upgrade()) {
                worker.detach_client();
            }
            trace!("registry: removed client {id}");
        }
    }

    /// Sweep every registered client and remove the ones that have become
    /// zombies, given a callback that tells us whether the out-of-scope
    /// connector still recognises an id (spec.md §4.9 watchdog pass).
    pub fn cleanup_zombies(&self, connector_knows: impl Fn(u64) -> bool) -> Vec<u64> {
        let ids: Vec<u64> = self.clients.iter().map(|e| *e.key()).collect();
        let mut removed = Vec::new();
        for id in ids {
            let zombie = match self.clients.get(&id) {
                Some(client) => client.is_zombie(connector_knows(id)),
                None => false,
            };
            if zombie {
                self.remove(id);
                removed.push(id);
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn client_ids(&self) -> Vec<u64> {
        self.clients.iter().map(|e| *e.key()).collect()
    }

    /// Every currently registered client, for fanout (spec.md §4.5
    /// `mining.notify` broadcast). Snapshot, not a live view: a client that
    /// disconnects mid-fanout simply swallows its send (`Client::send`).
    pub fn all_clients(&self) -> Vec<Arc<Client>> {
        self.clients.iter().map(|e| e.value().clone()).collect()
    }

    /// Only the subscribed clients, for `mining.notify`/`mining.set_difficulty`
    /// fanout — an unsubscribed client hasn't been handed an enonce1 yet and
    /// has nothing meaningful to do with a job.
    pub fn subscribed_clients(&self) -> Vec<Arc<Client>> {
        self.clients
            .iter()
            .map(|e| e.value().clone())
            .filter(|c| c.is_subscribed())
            .collect()
    }

    /// Every user account known to this registry, for pool-wide rollups
    /// (spec.md §4.7 hashmeter).
    pub fn all_users(&self) -> Vec<Arc<User>> {
        self.users.iter().map(|e| e.value().clone()).collect()
    }
}
