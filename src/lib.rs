#![doc = include_str!("../README.md")]

pub mod backend;
pub mod cache;
mod common;
mod engine;
pub mod location;
pub mod scheduler;
pub mod tracker;

pub use crate::common::{
    system_millis, wire, Action, DataRecord, Event, EventKind, Id, InvalidIdSize, Nonce,
    PeerRecord, ID_SIZE, NONCE_SIZE,
};
pub use crate::engine::{Config, Engine, EngineError, DEFAULT_REQUEST_TIMEOUT};
pub use bytes::Bytes;

pub mod errors {
    pub use crate::backend::BackendError;
    pub use crate::cache::CacheError;
    pub use crate::engine::EngineError;
    pub use crate::location::LocationError;
    pub use crate::scheduler::SchedulerError;
    pub use crate::tracker::TrackerError;
    pub use crate::wire::WireError;
}
