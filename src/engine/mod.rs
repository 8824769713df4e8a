//! The DHT engine.
//!
//! Owns the peer/data tables, validates incoming actions, forwards them to
//! the configured [Backend], and re-emits backend-originated events to
//! subscribers. All table mutation happens on the scheduler's worker thread;
//! callers on genuinely parallel threads serialize through [Engine::post].

mod config;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tracing::{debug, error, trace};

use crate::backend::{Backend, BackendContext, BackendError};
use crate::cache::PersistCache;
use crate::common::{Action, Event, EventKind, Id, PeerRecord};
use crate::location::{verify_location, LocationError};
use crate::scheduler::{Scheduler, SchedulerError};
use crate::tracker::{RequestTracker, TrackedResponse, TrackerError};

pub use config::{Config, DEFAULT_REQUEST_TIMEOUT};

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// Malformed action; rejected before it reaches the backend.
    #[error("Invalid action: {0}")]
    Validation(&'static str),

    /// The peer hold request's nonce does not satisfy the configured target.
    #[error("Proof of work does not satisfy the target")]
    ProofOfWork,

    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Engine was destroyed")]
    Destroyed,
}

type Handler = Box<dyn Fn(&Event) + Send>;

#[derive(Default)]
struct Subscribers {
    handlers: Vec<(Option<EventKind>, Handler)>,
}

struct Core {
    config: Config,
    peers: HashMap<Id, PeerRecord>,
    data: BTreeMap<String, crate::common::DataRecord>,
    cache: Box<dyn PersistCache>,
    backend: Box<dyn Backend>,
    tracker: RequestTracker<Option<Bytes>>,
    next_msg_id: u64,
    destroyed: bool,
}

impl Core {
    /// Lend the tables and cache to the backend for one call.
    ///
    /// Destructured field borrows keep `backend` callable while the context
    /// holds the rest of the state.
    fn split(&mut self) -> (&mut Box<dyn Backend>, BackendContext<'_>) {
        let Core {
            config,
            peers,
            data,
            cache,
            backend,
            next_msg_id,
            ..
        } = self;

        (
            backend,
            BackendContext::new(config.local_id, peers, data, cache.as_mut(), next_msg_id),
        )
    }
}

#[derive(Clone)]
/// A DHT engine handle. Cheap to clone; all clones share the same tables and
/// scheduler.
pub struct Engine {
    core: Arc<Mutex<Core>>,
    subscribers: Arc<Mutex<Subscribers>>,
    scheduler: Scheduler,
    gossip_trigger: Option<String>,
    cleanup_trigger: Option<String>,
}

impl Engine {
    /// Construct an engine around an explicit backend and cache.
    ///
    /// Registers the backend's gossip interval and the tracker's timeout
    /// cleanup as named scheduler triggers.
    pub fn new(
        config: Config,
        backend: Box<dyn Backend>,
        cache: Box<dyn PersistCache>,
    ) -> Result<Self, EngineError> {
        crate::location::check_target(&config.target)?;

        let request_timeout = config.request_timeout;
        let backend_name = backend.name();
        let gossip_interval = backend.gossip_interval();

        let core = Core {
            tracker: RequestTracker::new(request_timeout),
            config,
            peers: HashMap::new(),
            data: BTreeMap::new(),
            cache,
            backend,
            next_msg_id: 0,
            destroyed: false,
        };

        let mut engine = Engine {
            core: Arc::new(Mutex::new(core)),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
            scheduler: Scheduler::new(),
            gossip_trigger: None,
            cleanup_trigger: None,
        };

        if let Some(every) = gossip_interval {
            let name = format!("{}.gossip", backend_name);
            let gossip_engine = engine.clone();
            engine
                .scheduler
                .schedule(&name, every, move || gossip_engine.gossip_tick())?;
            engine.gossip_trigger = Some(name);
        }

        if let Some(timeout) = request_timeout {
            let name = "tracker.cleanup".to_string();
            let every = (timeout / 2).max(std::time::Duration::from_millis(1));
            let cleanup_engine = engine.clone();
            engine.scheduler.schedule(&name, every, move || {
                cleanup_engine.lock_core().tracker.cleanup();
            })?;
            engine.cleanup_trigger = Some(name);
        }

        Ok(engine)
    }

    // === Getters ===

    /// This node's identity hash.
    pub fn local_id(&self) -> Id {
        self.lock_core().config.local_id
    }

    /// Synchronously inspect the local data table. No network round-trip;
    /// reflects only work whose scheduled step has already run.
    pub fn fetch_data_local(&self, address: &str) -> Option<Bytes> {
        self.lock_core()
            .data
            .get(address)
            .map(|record| record.data.clone())
    }

    /// Synchronously inspect the local peer table.
    pub fn get_peer_local(&self, peer_hash: &Id) -> Option<PeerRecord> {
        self.lock_core().peers.get(peer_hash).cloned()
    }

    // === Public Methods ===

    /// Subscribe to events. `kind: None` receives everything.
    ///
    /// Handlers for posted work run on the scheduler thread, after the
    /// corresponding table mutation completed.
    pub fn on<F>(&self, kind: Option<EventKind>, handler: F)
    where
        F: Fn(&Event) + Send + 'static,
    {
        self.lock_subscribers()
            .handlers
            .push((kind, Box::new(handler)));
    }

    /// Enqueue an action for processing on a later turn. Never blocks;
    /// submission order is preserved. Rejections surface as
    /// [Event::Error], not panics.
    pub fn post(&self, action: Action) {
        let engine = self.clone();
        self.scheduler.post(move || {
            let _ = engine.act(action);
        });
    }

    /// Process an action immediately, in the caller's turn.
    ///
    /// Use only when queue ordering against [Engine::post] is not required.
    pub fn act(&self, action: Action) -> Result<(), EngineError> {
        let result = {
            let mut core = self.lock_core();
            process_action(&mut core, action)
        };

        self.finish_dispatch(result)
    }

    /// Enqueue an inbound remote event (e.g. a fetch request against this
    /// node) for the backend.
    pub fn post_event(&self, event: Event) {
        let engine = self.clone();
        self.scheduler.post(move || {
            let _ = engine.act_event(event);
        });
    }

    /// Route an inbound remote event to the backend immediately.
    pub fn act_event(&self, event: Event) -> Result<(), EngineError> {
        let result = {
            let mut core = self.lock_core();
            process_event(&mut core, event)
        };

        self.finish_dispatch(result)
    }

    /// Fetch data by address: a local hit settles immediately, otherwise a
    /// [Event::DataFetch] is emitted for a subscriber to answer with
    /// [Action::DataFetchResponse].
    pub fn fetch_data(
        &self,
        address: &str,
    ) -> Result<TrackedResponse<Option<Bytes>>, EngineError> {
        let (response, fetch_event) = {
            let mut core = self.lock_core();

            if core.destroyed {
                return Err(EngineError::Destroyed);
            }

            let msg_id = {
                let (_, mut ctx) = core.split();
                ctx.next_msg_id()
            };

            let response = core.tracker.track(&msg_id)?;

            match core.data.get(address) {
                Some(record) => {
                    let data = record.data.clone();
                    core.tracker.resolve(&msg_id, Some(data));
                    (response, None)
                }
                None => (
                    response,
                    Some(Event::DataFetch {
                        msg_id,
                        address: address.to_string(),
                    }),
                ),
            }
        };

        if let Some(event) = fetch_event {
            self.emit(vec![event]);
        }

        Ok(response)
    }

    /// Block until everything queued before this call has been processed.
    pub fn drain(&self) {
        self.scheduler.drain();
    }

    /// Tear down the backend, tracker, and scheduler. Idempotent; pending
    /// tracked fetches are rejected with a destroying error.
    pub fn destroy(&self) {
        {
            let mut core = self.lock_core();
            if core.destroyed {
                return;
            }
            core.destroyed = true;
            core.backend.destroy();
            core.tracker.destroy();
        }

        if let Some(name) = &self.gossip_trigger {
            self.scheduler.unschedule(name);
        }
        if let Some(name) = &self.cleanup_trigger {
            self.scheduler.unschedule(name);
        }

        self.scheduler.destroy();
    }

    // === Private Methods ===

    fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Emit events outside the core lock, report rejections as error events.
    fn finish_dispatch(&self, result: Result<Vec<Event>, EngineError>) -> Result<(), EngineError> {
        match result {
            Ok(events) => {
                self.emit(events);
                Ok(())
            }
            Err(EngineError::Destroyed) => Err(EngineError::Destroyed),
            Err(err) => {
                match &err {
                    EngineError::Backend(BackendError::UnhandledEvent(kind)) => {
                        error!(?kind, "Backend cannot handle event type");
                    }
                    recoverable => {
                        debug!(error = %recoverable, "Rejected");
                    }
                }

                self.emit(vec![Event::Error {
                    message: err.to_string(),
                }]);

                Err(err)
            }
        }
    }

    fn emit(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }

        let subscribers = self.lock_subscribers();

        for event in events {
            trace!(kind = ?event.kind(), "Emitting event");

            for (filter, handler) in &subscribers.handlers {
                if filter.map(|kind| kind == event.kind()).unwrap_or(true) {
                    handler(&event);
                }
            }
        }
    }

    fn gossip_tick(&self) {
        let result = {
            let mut core = self.lock_core();

            if core.destroyed {
                return;
            }

            let (backend, mut ctx) = core.split();
            backend.on_gossip(&mut ctx)
        };

        match result {
            Ok(events) => self.emit(events),
            Err(err) => debug!(error = %err, "Gossip turn failed"),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.lock_core();
        f.debug_struct("Engine")
            .field("local_id", &core.config.local_id)
            .field("peers", &core.peers.len())
            .field("data", &core.data.len())
            .field("destroyed", &core.destroyed)
            .finish()
    }
}

/// Validate and normalize an action, then forward it to the backend.
fn process_action(core: &mut Core, action: Action) -> Result<Vec<Event>, EngineError> {
    if core.destroyed {
        return Err(EngineError::Destroyed);
    }

    // A DataFetchResponse settles its tracked request and is re-emitted as an
    // event; remember the correlation before the action moves to the backend.
    let mut settled: Option<(String, Option<Bytes>)> = None;

    match &action {
        Action::PeerHoldRequest {
            peer_hash,
            nonce,
            transport,
            ..
        } => {
            if transport.is_empty() {
                return Err(EngineError::Validation("peer transport must not be empty"));
            }

            if !verify_location(peer_hash, nonce, &core.config.target)? {
                debug!(?peer_hash, "Peer hold request failed proof-of-work");
                return Err(EngineError::ProofOfWork);
            }
        }
        Action::DataHoldRequest { address, .. } => {
            if address.is_empty() {
                return Err(EngineError::Validation("data address must not be empty"));
            }
        }
        Action::DataFetchResponse { msg_id, data, .. } => {
            if msg_id.is_empty() {
                return Err(EngineError::Validation("msg id must not be empty"));
            }

            // First settlement wins; retransmissions are no-ops.
            core.tracker.resolve(msg_id, data.clone());
            settled = Some((msg_id.clone(), data.clone()));
        }
    }

    let mut events = {
        let (backend, mut ctx) = core.split();
        backend.handle_action(&mut ctx, action)?
    };

    // Track backend-initiated fetches so their responses correlate. The
    // receiving half is dropped; settlement arrives as a DataFetchResponse
    // action and is re-emitted below.
    for event in &events {
        if let Event::DataFetch { msg_id, .. } = event {
            if let Err(err) = core.tracker.track(msg_id) {
                debug!(error = %err, "Could not track backend fetch");
            }
        }
    }

    if let Some((msg_id, data)) = settled {
        events.insert(0, Event::DataFetchResponse { msg_id, data });
    }

    Ok(events)
}

/// Route an inbound remote event to the backend.
fn process_event(core: &mut Core, event: Event) -> Result<Vec<Event>, EngineError> {
    if core.destroyed {
        return Err(EngineError::Destroyed);
    }

    let (backend, mut ctx) = core.split();

    Ok(backend.handle_event(&mut ctx, event)?)
}
