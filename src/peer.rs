use crate::{ctx::PeerSink, tasks::TaskSet, types::MsgId};
use core::fmt;
use dashmap::DashMap;
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::debug;

/// Type alias for peer identifiers. A peer picks its own id and declares
/// it in the first frame of the handshake.
pub type PeerId = String;

/// Transport metadata about the request that initiated a connection.
///
/// Carried on the peer record for logging and user callbacks only; the
/// core never reads it.
#[derive(Debug, Clone, Default)]
pub struct Origin {
    /// Remote address of the connection, when the transport knows it.
    pub remote_addr: Option<SocketAddr>,
    /// Request path of the connection upgrade, when there was one.
    pub path: Option<String>,
}

impl Origin {
    /// An origin carrying only a remote address.
    pub fn remote(addr: SocketAddr) -> Self {
        Self {
            remote_addr: Some(addr),
            path: None,
        }
    }
}

/// A live subscription owned by a peer: its stop hook and the task set
/// running its forwarding pipeline.
///
/// The producer channel itself lives inside the forwarding task; closing
/// this record cancels that task, which drops the channel, which the
/// producer observes.
pub(crate) struct SubRecord {
    stop: Option<Box<dyn FnOnce() + Send>>,
    tasks: TaskSet,
}

impl SubRecord {
    pub(crate) fn new(stop: Option<Box<dyn FnOnce() + Send>>, tasks: TaskSet) -> Self {
        Self { stop, tasks }
    }

    /// Run the stop hook and cancel the forwarding pipeline. Removal from
    /// the peer's subscription map is what makes this exactly-once: a
    /// record can only be closed by whoever removed it.
    pub(crate) fn close(mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
        self.tasks.cancel();
    }
}

impl fmt::Debug for SubRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubRecord")
            .field("has_stop", &self.stop.is_some())
            .finish_non_exhaustive()
    }
}

/// A live connection's state: identity, outbound sink, subscription
/// table, and origin metadata.
///
/// Created on successful handshake, handed to the `on_connect` and
/// `on_disconnect` callbacks, and destroyed on disconnect.
pub struct Peer {
    peer_id: PeerId,
    sink: PeerSink,
    subs: Mutex<HashMap<MsgId, SubRecord>>,
    origin: Origin,
    /// Everything running on behalf of this connection: router loop,
    /// write task, and subscription pipelines.
    pub(crate) tasks: TaskSet,
}

impl Peer {
    pub(crate) fn new(peer_id: PeerId, sink: PeerSink, origin: Origin, tasks: TaskSet) -> Self {
        Self {
            peer_id,
            sink,
            subs: Mutex::new(HashMap::new()),
            origin,
            tasks,
        }
    }

    /// The peer's self-declared identifier.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// The transport request that initiated this connection.
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// A capability to write frames to this peer.
    pub fn sink(&self) -> PeerSink {
        self.sink.clone()
    }

    /// Ids of the currently active subscriptions.
    pub fn subscription_ids(&self) -> Vec<MsgId> {
        self.subs().keys().cloned().collect()
    }

    fn subs(&self) -> MutexGuard<'_, HashMap<MsgId, SubRecord>> {
        self.subs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install a subscription record, returning any record it displaced.
    /// Two producers may not share an id, so the caller closes the
    /// displaced record.
    pub(crate) fn register_subscription(&self, id: MsgId, rec: SubRecord) -> Option<SubRecord> {
        self.subs().insert(id, rec)
    }

    /// Remove a subscription record. Returns `None` when the id is
    /// unknown, which makes unsubscription idempotent.
    pub(crate) fn remove_subscription(&self, id: &MsgId) -> Option<SubRecord> {
        self.subs().remove(id)
    }

    /// Tear down everything this peer owns: cancel the router loop, the
    /// write task, and all subscription pipelines, and run every stop
    /// hook exactly once. Idempotent.
    pub(crate) fn teardown(&self) {
        self.tasks.cancel();
        let drained: Vec<_> = self.subs().drain().collect();
        for (id, rec) in drained {
            debug!(peer_id = %self.peer_id, sub_id = %id, "closing subscription");
            rec.close();
        }
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("peer_id", &self.peer_id)
            .field("origin", &self.origin)
            .field("subscriptions", &self.subs().len())
            .finish_non_exhaustive()
    }
}

/// The listener's table of connected peers, keyed by peer id.
///
/// All updates are single-key: inserts on accept, removals on
/// disconnect. Handlers and middleware get a clone of the table through
/// the [`Ctx`](crate::Ctx) and may look peers up, but only the listener
/// mutates it.
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    inner: Arc<DashMap<PeerId, Arc<Peer>>>,
}

impl PeerTable {
    /// Look up a peer by id.
    pub fn get(&self, peer_id: &str) -> Option<Arc<Peer>> {
        self.inner.get(peer_id).map(|p| p.value().clone())
    }

    /// Whether a peer with this id is connected.
    pub fn contains(&self, peer_id: &str) -> bool {
        self.inner.contains_key(peer_id)
    }

    /// Number of connected peers.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no peers are connected.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Ids of the currently connected peers.
    pub fn ids(&self) -> Vec<PeerId> {
        self.inner.iter().map(|e| e.key().clone()).collect()
    }

    /// Install a peer record, displacing any record with the same id.
    /// The displaced connection is not torn down; its own router exits
    /// when its transport closes.
    pub(crate) fn insert(&self, peer: Arc<Peer>) -> Option<Arc<Peer>> {
        self.inner.insert(peer.peer_id().to_owned(), peer)
    }

    /// Remove a peer record by id.
    pub(crate) fn remove(&self, peer_id: &str) -> Option<Arc<Peer>> {
        self.inner.remove(peer_id).map(|(_, p)| p)
    }

    /// Remove the record for `peer_id` only if it is still `peer`. A
    /// displaced connection uses this on exit so it cannot evict its
    /// replacement.
    pub(crate) fn remove_if_same(&self, peer_id: &str, peer: &Arc<Peer>) -> Option<Arc<Peer>> {
        self.inner
            .remove_if(peer_id, |_, current| Arc::ptr_eq(current, peer))
            .map(|(_, p)| p)
    }
}
