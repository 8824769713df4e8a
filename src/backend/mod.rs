//! Replication/consistency policy contract.
//!
//! The engine is deliberately agnostic about how state spreads through the
//! network; a [Backend] decides what to store, what to fetch, and what to
//! gossip. The engine owns the peer/data tables and lends them to the backend
//! per call through a [BackendContext].

pub mod fullsync;

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::time::Duration;

use crate::cache::{CacheError, PersistCache};
use crate::common::{Action, DataRecord, Event, EventKind, Id, PeerRecord};

pub use fullsync::FullSyncBackend;

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    /// An event type outside the backend's closed taxonomy reached it. This is
    /// a protocol/version mismatch and must surface loudly, never be
    /// swallowed.
    #[error("Unhandled event type: {0:?}")]
    UnhandledEvent(EventKind),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Failed to encode gossip payload: {0}")]
    GossipEncoding(#[from] serde_bencode::Error),
}

/// Everything the engine lends a backend for the duration of one call.
///
/// The engine exclusively owns the tables; the backend mutates them only
/// through this borrow, and durable state only through the cache contract.
pub struct BackendContext<'a> {
    /// This node's own identity hash.
    pub local_id: Id,
    /// Peer table, keyed by identity hash.
    pub peers: &'a mut HashMap<Id, PeerRecord>,
    /// Data table, keyed by content address.
    pub data: &'a mut BTreeMap<String, DataRecord>,
    pub cache: &'a mut dyn PersistCache,
    next_msg_id: &'a mut u64,
}

impl<'a> BackendContext<'a> {
    pub(crate) fn new(
        local_id: Id,
        peers: &'a mut HashMap<Id, PeerRecord>,
        data: &'a mut BTreeMap<String, DataRecord>,
        cache: &'a mut dyn PersistCache,
        next_msg_id: &'a mut u64,
    ) -> Self {
        BackendContext {
            local_id,
            peers,
            data,
            cache,
            next_msg_id,
        }
    }

    /// Mint a correlation key for a fetch request. Unique for the life of the
    /// engine instance.
    pub fn next_msg_id(&mut self) -> String {
        let msg_id = *self.next_msg_id;
        *self.next_msg_id += 1;

        format!("fetch-{}", msg_id)
    }
}

/// Replication/consistency policy for a DHT engine.
///
/// Implementations mutate tables synchronously within a call and report what
/// happened (or what they need) as [Event]s for the engine to re-emit.
pub trait Backend: Send + Debug {
    /// Short policy name; used as the persistence namespace and to name
    /// scheduler triggers.
    fn name(&self) -> &'static str;

    /// How often [Backend::on_gossip] should run, if at all.
    fn gossip_interval(&self) -> Option<Duration> {
        None
    }

    /// Handle a validated action forwarded by the engine.
    fn handle_action(
        &mut self,
        ctx: &mut BackendContext<'_>,
        action: Action,
    ) -> Result<Vec<Event>, BackendError>;

    /// Handle an inbound event from a remote node (e.g. a fetch request
    /// against this node). Event types the policy does not recognize must be
    /// returned as [BackendError::UnhandledEvent].
    fn handle_event(
        &mut self,
        ctx: &mut BackendContext<'_>,
        event: Event,
    ) -> Result<Vec<Event>, BackendError>;

    /// Periodic gossip turn, driven by the engine's scheduler at
    /// [Backend::gossip_interval].
    fn on_gossip(&mut self, _ctx: &mut BackendContext<'_>) -> Result<Vec<Event>, BackendError> {
        Ok(Vec::new())
    }

    /// Release policy resources. Idempotent.
    fn destroy(&mut self) {}
}
