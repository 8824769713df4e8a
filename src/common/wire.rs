//! Wire message envelope.
//!
//! The transport layer owns framing; this module only pins down the envelope
//! the engine's fetch/response events must round-trip through unchanged: a
//! named payload, bencode-encoded, optionally prefixed with a 4-byte magic
//! marker on server-originated frames.

use serde::{Deserialize, Serialize};

/// Marks a frame as server-originated.
pub const MAGIC: [u8; 4] = [0x52, 0x44, 0x48, 0x54]; // "RDHT"

/// Recognized envelope tags.
pub const TAG_JSON: &str = "json";
pub const TAG_NAMED_BINARY: &str = "namedBinary";
pub const TAG_PING: &str = "ping";
pub const TAG_PONG: &str = "pong";

#[derive(thiserror::Error, Debug)]
pub enum WireError {
    #[error("Failed to parse packet bytes: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    #[error("Expected a {expected} envelope, got {got}")]
    UnexpectedTag { expected: &'static str, got: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// A named payload: `name` is a UTF-8 tag, `data` is opaque bytes whose
/// interpretation depends on the tag.
pub struct Envelope {
    #[serde(rename = "n")]
    pub name: String,

    #[serde(rename = "d", with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl Envelope {
    pub fn new(name: &str, data: Vec<u8>) -> Self {
        Envelope {
            name: name.to_string(),
            data,
        }
    }

    /// A `json` envelope; `data` is UTF-8 JSON text produced by the caller.
    pub fn json(text: &str) -> Self {
        Self::new(TAG_JSON, text.as_bytes().to_vec())
    }

    pub fn ping(sent: u64) -> Result<Self, WireError> {
        Ok(Self::new(TAG_PING, serde_bencode::to_bytes(&Ping { sent })?))
    }

    pub fn pong(orig: u64, recv: u64) -> Result<Self, WireError> {
        Ok(Self::new(
            TAG_PONG,
            serde_bencode::to_bytes(&Pong { orig, recv })?,
        ))
    }

    /// Encode, prefixing [MAGIC] when the frame originates from a server.
    pub fn to_bytes(&self, server_originated: bool) -> Result<Vec<u8>, WireError> {
        let encoded = serde_bencode::to_bytes(self)?;

        if server_originated {
            let mut framed = Vec::with_capacity(MAGIC.len() + encoded.len());
            framed.extend_from_slice(&MAGIC);
            framed.extend_from_slice(&encoded);
            Ok(framed)
        } else {
            Ok(encoded)
        }
    }

    /// Decode an envelope, returning whether the frame carried the
    /// server-originated magic marker.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, bool), WireError> {
        let (bytes, server_originated) = match bytes.strip_prefix(&MAGIC[..]) {
            Some(rest) => (rest, true),
            None => (bytes, false),
        };

        Ok((serde_bencode::from_bytes(bytes)?, server_originated))
    }

    pub fn decode_ping(&self) -> Result<Ping, WireError> {
        if self.name != TAG_PING {
            return Err(WireError::UnexpectedTag {
                expected: TAG_PING,
                got: self.name.clone(),
            });
        }

        Ok(serde_bencode::from_bytes(&self.data)?)
    }

    pub fn decode_pong(&self) -> Result<Pong, WireError> {
        if self.name != TAG_PONG {
            return Err(WireError::UnexpectedTag {
                expected: TAG_PONG,
                got: self.name.clone(),
            });
        }

        Ok(serde_bencode::from_bytes(&self.data)?)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// `ping` payload.
pub struct Ping {
    /// Sender's clock at send time, in milliseconds.
    pub sent: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// `pong` payload.
pub struct Pong {
    /// The `sent` timestamp echoed from the ping.
    pub orig: u64,
    /// Receiver's clock when the ping arrived, in milliseconds.
    pub recv: u64,
}
