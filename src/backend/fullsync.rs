//! Full-sync reference backend.
//!
//! The simplest correct policy: every node holds everything. A peer hold is
//! stored locally and immediately considered held network-wide; data is
//! mirrored into the persistence cache; fetch requests are answered straight
//! from the local table. Suitable for small networks, and the baseline
//! correctness oracle for sharded/gossip backends.
//!
//! No eviction: the full-sync policy holds everything it is given. Capacity
//! management is a policy-specific extension point for other backends.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::common::{Action, DataRecord, Event, Id, PeerRecord};
use crate::location::location_of;

use super::{Backend, BackendContext, BackendError};

/// How often the full-sync backend asks the transport to gossip its held
/// addresses.
pub const DEFAULT_GOSSIP_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct FullSyncBackend {
    gossip_interval: Duration,
}

impl FullSyncBackend {
    pub fn new() -> Self {
        FullSyncBackend {
            gossip_interval: DEFAULT_GOSSIP_INTERVAL,
        }
    }

    pub fn with_gossip_interval(mut self, interval: Duration) -> Self {
        self.gossip_interval = interval;
        self
    }

    /// Insert or refresh a data record; returns the event to emit, if any.
    ///
    /// Content-addressed: identical address and data only refreshes the
    /// holder set; the same holder twice changes nothing and emits nothing.
    fn hold_data(
        &mut self,
        ctx: &mut BackendContext<'_>,
        address: String,
        data: Bytes,
        holder: Id,
    ) -> Result<Vec<Event>, BackendError> {
        if let Some(existing) = ctx.data.get_mut(&address) {
            if existing.data != data {
                debug!(
                    address = address.as_str(),
                    "Hold request data differs from held content, rejecting"
                );
                return Ok(vec![Event::Error {
                    message: format!("data mismatch for held address {}", address),
                }]);
            }

            if !existing.holders.insert(holder) {
                trace!(address = address.as_str(), "Re-hold is a no-op");
                return Ok(Vec::new());
            }

            return Ok(vec![Event::DataHoldRequest(existing.clone())]);
        }

        let mut record = DataRecord::new(address.clone(), data.clone());
        record.holders.insert(holder);

        ctx.cache.set(self.name(), &address, data.to_vec())?;
        ctx.data.insert(address, record.clone());

        Ok(vec![Event::DataHoldRequest(record)])
    }
}

impl Default for FullSyncBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for FullSyncBackend {
    fn name(&self) -> &'static str {
        "fullsync"
    }

    fn gossip_interval(&self) -> Option<Duration> {
        Some(self.gossip_interval)
    }

    fn handle_action(
        &mut self,
        ctx: &mut BackendContext<'_>,
        action: Action,
    ) -> Result<Vec<Event>, BackendError> {
        match action {
            Action::PeerHoldRequest {
                peer_hash,
                nonce,
                transport,
                data,
                timestamp,
            } => {
                let record = PeerRecord {
                    peer_hash,
                    peer_location: location_of(&peer_hash, &nonce),
                    peer_transport: transport,
                    peer_data: data,
                    timestamp,
                };

                if let Some(existing) = ctx.peers.get(&peer_hash) {
                    if !existing.superseded_by(&record) {
                        trace!(?peer_hash, "Peer hold request is not newer, ignoring");
                        return Ok(Vec::new());
                    }
                }

                ctx.peers.insert(peer_hash, record.clone());

                Ok(vec![Event::PeerHoldRequest(record)])
            }
            Action::DataHoldRequest { address, data } => {
                let holder = ctx.local_id;
                self.hold_data(ctx, address, data, holder)
            }
            Action::DataFetchResponse { address, data, .. } => {
                // The engine already settled the tracked request; full-sync
                // absorbs fetched data so the next fetch is local.
                match data {
                    Some(data) => {
                        let holder = ctx.local_id;
                        self.hold_data(ctx, address, data, holder)
                    }
                    None => Ok(Vec::new()),
                }
            }
        }
    }

    fn handle_event(
        &mut self,
        ctx: &mut BackendContext<'_>,
        event: Event,
    ) -> Result<Vec<Event>, BackendError> {
        match event {
            Event::DataFetch { msg_id, address } => {
                let data = match ctx.data.get(&address) {
                    Some(record) => Some(record.data.clone()),
                    None => ctx.cache.get(self.name(), &address)?.map(Bytes::from),
                };

                Ok(vec![Event::DataFetchResponse { msg_id, data }])
            }
            other => Err(BackendError::UnhandledEvent(other.kind())),
        }
    }

    fn on_gossip(&mut self, ctx: &mut BackendContext<'_>) -> Result<Vec<Event>, BackendError> {
        if ctx.peers.is_empty() || ctx.data.is_empty() {
            return Ok(Vec::new());
        }

        let addresses: Vec<&String> = ctx.data.keys().collect();
        let payload = Bytes::from(serde_bencode::to_bytes(&addresses)?);

        Ok(vec![Event::GossipTo {
            peers: ctx.peers.keys().copied().collect(),
            payload,
        }])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::common::Nonce;
    use std::collections::{BTreeMap, HashMap};

    struct Fixture {
        local_id: Id,
        peers: HashMap<Id, PeerRecord>,
        data: BTreeMap<String, DataRecord>,
        cache: MemoryCache,
        next_msg_id: u64,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                local_id: Id::random(),
                peers: HashMap::new(),
                data: BTreeMap::new(),
                cache: MemoryCache::new(),
                next_msg_id: 0,
            }
        }

        fn ctx(&mut self) -> BackendContext<'_> {
            BackendContext::new(
                self.local_id,
                &mut self.peers,
                &mut self.data,
                &mut self.cache,
                &mut self.next_msg_id,
            )
        }
    }

    fn hold_data_action(address: &str, data: &'static [u8]) -> Action {
        Action::DataHoldRequest {
            address: address.to_string(),
            data: Bytes::from_static(data),
        }
    }

    #[test]
    fn data_hold_then_fetch_event_answers_with_data() {
        let mut backend = FullSyncBackend::new();
        let mut fixture = Fixture::new();

        let events = backend
            .handle_action(&mut fixture.ctx(), hold_data_action("D1", b"tst"))
            .unwrap();
        assert!(matches!(events.as_slice(), [Event::DataHoldRequest(_)]));

        let events = backend
            .handle_event(
                &mut fixture.ctx(),
                Event::DataFetch {
                    msg_id: "m1".to_string(),
                    address: "D1".to_string(),
                },
            )
            .unwrap();

        assert_eq!(
            events,
            vec![Event::DataFetchResponse {
                msg_id: "m1".to_string(),
                data: Some(Bytes::from_static(b"tst")),
            }]
        );
    }

    #[test]
    fn fetch_for_missing_data_answers_absent() {
        let mut backend = FullSyncBackend::new();
        let mut fixture = Fixture::new();

        let events = backend
            .handle_event(
                &mut fixture.ctx(),
                Event::DataFetch {
                    msg_id: "m1".to_string(),
                    address: "missing".to_string(),
                },
            )
            .unwrap();

        assert_eq!(
            events,
            vec![Event::DataFetchResponse {
                msg_id: "m1".to_string(),
                data: None,
            }]
        );
    }

    #[test]
    fn data_hold_is_idempotent() {
        let mut backend = FullSyncBackend::new();
        let mut fixture = Fixture::new();

        backend
            .handle_action(&mut fixture.ctx(), hold_data_action("D1", b"tst"))
            .unwrap();
        let snapshot = fixture.data.clone();

        let events = backend
            .handle_action(&mut fixture.ctx(), hold_data_action("D1", b"tst"))
            .unwrap();

        assert!(events.is_empty(), "re-hold emits nothing");
        assert_eq!(fixture.data, snapshot, "table state unchanged");
    }

    #[test]
    fn conflicting_data_for_held_address_is_rejected() {
        let mut backend = FullSyncBackend::new();
        let mut fixture = Fixture::new();

        backend
            .handle_action(&mut fixture.ctx(), hold_data_action("D1", b"tst"))
            .unwrap();
        let events = backend
            .handle_action(&mut fixture.ctx(), hold_data_action("D1", b"other"))
            .unwrap();

        assert!(matches!(events.as_slice(), [Event::Error { .. }]));
        assert_eq!(fixture.data["D1"].data, Bytes::from_static(b"tst"));
    }

    #[test]
    fn peer_hold_last_writer_wins() {
        let mut backend = FullSyncBackend::new();
        let mut fixture = Fixture::new();

        let peer_hash = Id::random();
        let nonce = Nonce::random();

        let hold = |transport: &str, timestamp: u64| Action::PeerHoldRequest {
            peer_hash,
            nonce,
            transport: transport.to_string(),
            data: Bytes::new(),
            timestamp,
        };

        backend
            .handle_action(&mut fixture.ctx(), hold("wss://new.example", 20))
            .unwrap();
        let events = backend
            .handle_action(&mut fixture.ctx(), hold("wss://old.example", 10))
            .unwrap();

        assert!(events.is_empty(), "stale hold request ignored");
        assert_eq!(fixture.peers[&peer_hash].peer_transport, "wss://new.example");
        assert_eq!(
            fixture.peers[&peer_hash].peer_location,
            location_of(&peer_hash, &nonce)
        );
    }

    #[test]
    fn unrecognized_event_is_fatal() {
        let mut backend = FullSyncBackend::new();
        let mut fixture = Fixture::new();

        let result = backend.handle_event(
            &mut fixture.ctx(),
            Event::GossipTo {
                peers: vec![],
                payload: Bytes::new(),
            },
        );

        assert!(matches!(
            result,
            Err(BackendError::UnhandledEvent(
                crate::common::EventKind::GossipTo
            ))
        ));
    }

    #[test]
    fn gossip_lists_held_addresses_to_known_peers() {
        let mut backend = FullSyncBackend::new();
        let mut fixture = Fixture::new();

        // Nothing to say yet.
        assert!(backend.on_gossip(&mut fixture.ctx()).unwrap().is_empty());

        let peer_hash = Id::random();
        backend
            .handle_action(
                &mut fixture.ctx(),
                Action::PeerHoldRequest {
                    peer_hash,
                    nonce: Nonce::random(),
                    transport: "wss://peer.example".to_string(),
                    data: Bytes::new(),
                    timestamp: 1,
                },
            )
            .unwrap();
        backend
            .handle_action(&mut fixture.ctx(), hold_data_action("D1", b"tst"))
            .unwrap();

        let events = backend.on_gossip(&mut fixture.ctx()).unwrap();

        match events.as_slice() {
            [Event::GossipTo { peers, payload }] => {
                assert_eq!(peers, &vec![peer_hash]);
                let addresses: Vec<String> = serde_bencode::from_bytes(payload).unwrap();
                assert_eq!(addresses, vec!["D1".to_string()]);
            }
            other => panic!("expected a single GossipTo event, got {:?}", other),
        }
    }
}
