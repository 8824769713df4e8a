//! Request correlation: match asynchronous fetch requests to their responses.
//!
//! Each tracked key owns a one-shot settlement channel. First settlement wins;
//! the sender half is consumed on settlement, so racing retransmissions are
//! silently ignored rather than errors.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    /// Exactly one outstanding slot per key; a second `track` while the first
    /// is still pending is a programmer/protocol error.
    #[error("Duplicate track for key: {0}")]
    DuplicateTracking(String),

    /// The entry was not settled within the tracker's configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// The tracker was destroyed while this entry was pending, or `track` was
    /// called after destroy.
    #[error("Tracker is destroying")]
    Destroying,

    /// The caller rejected this entry.
    #[error("Rejected: {0}")]
    Rejected(String),
}

/// The receiving half of a tracked slot.
///
/// Settlement is observed on the waiter's own receive turn, never
/// synchronously inside `resolve`/`reject`.
#[derive(Debug)]
pub struct TrackedResponse<T> {
    receiver: flume::Receiver<Result<T, TrackerError>>,
}

impl<T> TrackedResponse<T> {
    /// Block until the slot settles.
    pub fn recv(&self) -> Result<T, TrackerError> {
        self.receiver
            .recv()
            .unwrap_or(Err(TrackerError::Destroying))
    }

    /// Returns `None` while the slot is still pending.
    pub fn try_recv(&self) -> Option<Result<T, TrackerError>> {
        self.receiver.try_recv().ok()
    }

    #[cfg(feature = "async")]
    /// Await the settlement.
    pub async fn recv_async(&self) -> Result<T, TrackerError> {
        self.receiver
            .recv_async()
            .await
            .unwrap_or(Err(TrackerError::Destroying))
    }
}

#[derive(Debug)]
struct PendingSlot<T> {
    sender: flume::Sender<Result<T, TrackerError>>,
    tracked_at: Instant,
}

#[derive(Debug)]
/// Correlates an opaque key to a single-settlement slot, with optional
/// timeout.
pub struct RequestTracker<T> {
    pending: HashMap<String, PendingSlot<T>>,
    timeout: Option<Duration>,
    destroyed: bool,
}

impl<T> Default for RequestTracker<T> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<T> RequestTracker<T> {
    pub fn new(timeout: Option<Duration>) -> Self {
        RequestTracker {
            pending: HashMap::new(),
            timeout,
            destroyed: false,
        }
    }

    /// Register a slot for `key`.
    pub fn track(&mut self, key: &str) -> Result<TrackedResponse<T>, TrackerError> {
        if self.destroyed {
            return Err(TrackerError::Destroying);
        }
        if self.pending.contains_key(key) {
            return Err(TrackerError::DuplicateTracking(key.to_string()));
        }

        let (sender, receiver) = flume::bounded(1);

        self.pending.insert(
            key.to_string(),
            PendingSlot {
                sender,
                tracked_at: Instant::now(),
            },
        );

        Ok(TrackedResponse { receiver })
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Settle `key` with a value. No-op if the key is unknown or already
    /// settled.
    pub fn resolve(&mut self, key: &str, value: T) {
        if let Some(slot) = self.pending.remove(key) {
            let _ = slot.sender.send(Ok(value));
        } else {
            trace!(key, "resolve for unknown or already settled key");
        }
    }

    /// Settle `key` with an error. No-op if the key is unknown or already
    /// settled.
    pub fn reject(&mut self, key: &str, error: TrackerError) {
        if let Some(slot) = self.pending.remove(key) {
            let _ = slot.sender.send(Err(error));
        } else {
            trace!(key, "reject for unknown or already settled key");
        }
    }

    /// Reject every entry older than the configured timeout.
    ///
    /// Timeouts are cooperative: this is driven opportunistically by the
    /// engine's scheduler, never by preemption.
    pub fn cleanup(&mut self) {
        let timeout = match self.timeout {
            Some(timeout) => timeout,
            None => return,
        };

        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, slot)| slot.tracked_at.elapsed() >= timeout)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            debug!(key = key.as_str(), "Tracked request timed out");
            self.reject(&key, TrackerError::Timeout);
        }
    }

    /// Reject everything still pending and refuse further `track` calls.
    /// Idempotent.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        for (_, slot) in self.pending.drain() {
            let _ = slot.sender.send(Err(TrackerError::Destroying));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_settlement_wins() {
        let mut tracker = RequestTracker::<&'static str>::default();

        let response = tracker.track("ned").unwrap();

        tracker.resolve("ned", "test1");
        tracker.resolve("ned", "test2");
        tracker.reject("ned", TrackerError::Rejected("late".to_string()));

        assert_eq!(response.recv(), Ok("test1"));
    }

    #[test]
    fn duplicate_track_fails() {
        let mut tracker = RequestTracker::<()>::default();

        let _pending = tracker.track("ned").unwrap();

        assert!(matches!(
            tracker.track("ned"),
            Err(TrackerError::DuplicateTracking(key)) if key == "ned"
        ));
    }

    #[test]
    fn key_is_reusable_after_settlement() {
        let mut tracker = RequestTracker::<u32>::default();

        let first = tracker.track("ned").unwrap();
        tracker.resolve("ned", 1);
        assert_eq!(first.recv(), Ok(1));

        let second = tracker.track("ned").unwrap();
        tracker.resolve("ned", 2);
        assert_eq!(second.recv(), Ok(2));
    }

    #[test]
    fn settlement_is_observed_on_a_later_turn() {
        let mut tracker = RequestTracker::<u32>::default();

        let response = tracker.track("ned").unwrap();
        assert!(response.try_recv().is_none(), "nothing settled yet");

        tracker.resolve("ned", 7);
        assert_eq!(response.try_recv(), Some(Ok(7)));
    }

    #[test]
    fn destroy_rejects_pending_and_blocks_new_tracks() {
        let mut tracker = RequestTracker::<()>::default();

        let pending = tracker.track("ned").unwrap();
        tracker.destroy();

        assert_eq!(pending.recv(), Err(TrackerError::Destroying));
        assert!(matches!(
            tracker.track("other"),
            Err(TrackerError::Destroying)
        ));

        // Double destroy is a no-op.
        tracker.destroy();
    }

    #[test]
    fn cleanup_rejects_expired_entries() {
        let mut tracker = RequestTracker::<()>::new(Some(Duration::from_millis(10)));

        let expired = tracker.track("old").unwrap();

        std::thread::sleep(Duration::from_millis(20));

        let fresh = tracker.track("new").unwrap();
        tracker.cleanup();

        assert_eq!(expired.recv(), Err(TrackerError::Timeout));
        assert!(fresh.try_recv().is_none(), "unexpired entry untouched");
        assert!(tracker.is_pending("new"));
        assert!(!tracker.is_pending("old"));
    }

    #[cfg(feature = "async")]
    #[test]
    fn recv_async_observes_settlement() {
        let mut tracker = RequestTracker::<u32>::default();

        let response = tracker.track("ned").unwrap();
        tracker.resolve("ned", 3);

        assert_eq!(futures::executor::block_on(response.recv_async()), Ok(3));
    }
}
