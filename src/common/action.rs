//! The closed action/event taxonomy exchanged between callers, the engine, the
//! backend, and subscribers.

use bytes::Bytes;

use super::{DataRecord, Id, Nonce, PeerRecord};

#[derive(Debug, Clone, PartialEq)]
/// Something a caller (usually the transport layer) asks the engine to do.
pub enum Action {
    /// Assert that a peer should be tracked by the table.
    ///
    /// Rejected with a [crate::EngineError::ProofOfWork] unless
    /// `sha1(peer_hash ++ nonce)` satisfies the engine's configured target.
    PeerHoldRequest {
        peer_hash: Id,
        nonce: Nonce,
        transport: String,
        data: Bytes,
        timestamp: u64,
    },
    /// Assert that a piece of content should be retained by the table.
    DataHoldRequest { address: String, data: Bytes },
    /// Answer to a previously emitted [Event::DataFetch], correlated by
    /// `msg_id`. `data: None` is an explicit "I don't have it" marker.
    DataFetchResponse {
        msg_id: String,
        address: String,
        data: Option<Bytes>,
    },
}

#[derive(Debug, Clone, PartialEq)]
/// Something the engine tells its subscribers happened, or asks them to do.
pub enum Event {
    /// A peer hold request was accepted and the table updated.
    PeerHoldRequest(PeerRecord),
    /// A data hold request was accepted and the table updated.
    DataHoldRequest(DataRecord),
    /// The backend wants data it does not hold; a subscriber should answer
    /// with an [Action::DataFetchResponse] carrying the same `msg_id`.
    DataFetch { msg_id: String, address: String },
    /// A tracked fetch settled.
    DataFetchResponse {
        msg_id: String,
        data: Option<Bytes>,
    },
    /// The backend wants `payload` propagated to `peers`. The fan-out
    /// mechanism is the transport layer's business.
    GossipTo { peers: Vec<Id>, payload: Bytes },
    /// An action was rejected. The engine keeps running.
    Error { message: String },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::PeerHoldRequest(_) => EventKind::PeerHoldRequest,
            Event::DataHoldRequest(_) => EventKind::DataHoldRequest,
            Event::DataFetch { .. } => EventKind::DataFetch,
            Event::DataFetchResponse { .. } => EventKind::DataFetchResponse,
            Event::GossipTo { .. } => EventKind::GossipTo,
            Event::Error { .. } => EventKind::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Discriminant of [Event], used for subscription filters and error reports.
pub enum EventKind {
    PeerHoldRequest,
    DataHoldRequest,
    DataFetch,
    DataFetchResponse,
    GossipTo,
    Error,
}
