//! Peer and data table records.

use std::collections::BTreeSet;

use bytes::Bytes;

use super::Id;

#[derive(Debug, Clone, PartialEq, Eq)]
/// An entry in the engine's peer table, created when a peer hold request passed
/// proof-of-work verification.
pub struct PeerRecord {
    /// The peer's identity hash.
    pub peer_hash: Id,
    /// Ring position derived from `peer_hash` and the peer's nonce.
    pub peer_location: Id,
    /// Opaque transport address string (interpreted by the transport layer).
    pub peer_transport: String,
    /// Opaque application blob carried with the hold request.
    pub peer_data: Bytes,
    /// Monotonic insertion time in milliseconds; a newer hold request for the
    /// same `peer_hash` with a strictly later timestamp wins.
    pub timestamp: u64,
}

impl PeerRecord {
    /// Returns true if `other` should replace this record (last-writer-wins).
    pub fn superseded_by(&self, other: &PeerRecord) -> bool {
        other.timestamp > self.timestamp
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// An entry in the engine's data table.
///
/// Content-addressed: holding the same address and data again is a no-op
/// beyond refreshing the holder set.
pub struct DataRecord {
    pub data_address: String,
    pub data: Bytes,
    /// Identity hashes of peers known to hold this data.
    pub holders: BTreeSet<Id>,
}

impl DataRecord {
    pub fn new(data_address: String, data: Bytes) -> Self {
        DataRecord {
            data_address,
            data,
            holders: BTreeSet::new(),
        }
    }
}
