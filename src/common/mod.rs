//! Types shared across the engine, backend, and transport boundary.

mod action;
mod id;
mod record;
pub mod wire;

pub use action::{Action, Event, EventKind};
pub use id::{Id, InvalidIdSize, Nonce, ID_SIZE, NONCE_SIZE};
pub use record::{DataRecord, PeerRecord};

pub(crate) use id::{hash_concat, le_cmp};

/// Milliseconds since the unix epoch, used for record timestamps and
/// ping/pong clocks.
pub fn system_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
