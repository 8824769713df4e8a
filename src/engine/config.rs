use std::time::Duration;

use crate::common::Id;
use crate::location;

/// Default deadline for tracked fetch requests before they are rejected with
/// a timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
/// Engine configuration.
pub struct Config {
    /// This node's own identity hash.
    ///
    /// Defaults to a random Id.
    pub local_id: Id,
    /// Proof-of-work target every incoming peer hold request must satisfy.
    /// Must be [crate::common::ID_SIZE] bytes. All-0xFF disables the
    /// difficulty gate.
    ///
    /// Defaults to a mild difficulty (about one in sixteen nonces passes).
    pub target: Vec<u8>,
    /// Deadline for tracked fetch requests; `None` disables timeouts.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT].
    pub request_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_id: Id::random(),
            target: location::default_target(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

impl Config {
    /// A configuration with the difficulty gate disabled, for tests and
    /// closed networks.
    pub fn permissive() -> Self {
        Self {
            target: location::permissive_target(),
            ..Default::default()
        }
    }
}
