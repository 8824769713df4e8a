//! Cooperative task scheduler.
//!
//! A single worker thread drains a FIFO task queue; one task runs to
//! completion before the next is picked up, which is what makes the engine's
//! single-writer table model safe. Periodic triggers are sampled
//! opportunistically: every processing turn checks elapsed time per trigger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

/// The maximum duration the worker blocks waiting for a message when the
/// queue is empty. Lower values make idle periodic triggers more punctual at
/// the cost of CPU.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

type Task = Box<dyn FnOnce() + Send + 'static>;
type IntervalFn = Box<dyn FnMut() + Send + 'static>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    /// A name must be unscheduled before it can be scheduled again.
    #[error("Interval already scheduled: {0}")]
    AlreadyScheduled(String),
}

enum WorkerMessage {
    Task(Task),
    Schedule {
        name: String,
        every: Duration,
        tick: IntervalFn,
        ack: flume::Sender<Result<(), SchedulerError>>,
    },
    Unschedule(String),
    Drain(flume::Sender<()>),
    Shutdown(flume::Sender<()>),
}

#[derive(Debug, Clone)]
/// Handle to the worker thread. Cheap to clone; all clones feed the same
/// queue.
pub struct Scheduler {
    sender: flume::Sender<WorkerMessage>,
    /// Tasks posted but not yet finished executing. Queue length and in-flight
    /// work in one counter, so drain can observe true quiescence.
    pending_tasks: Arc<AtomicUsize>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        let pending_tasks = Arc::new(AtomicUsize::new(0));

        let worker_sender = sender.clone();
        let worker_pending = pending_tasks.clone();

        thread::spawn(move || run(receiver, worker_sender, worker_pending));

        Scheduler {
            sender,
            pending_tasks,
        }
    }

    /// Enqueue a task for FIFO execution on a later turn. Silently ignored
    /// after [Scheduler::destroy].
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending_tasks.fetch_add(1, Ordering::SeqCst);

        if self.sender.send(WorkerMessage::Task(Box::new(task))).is_err() {
            // Worker is gone; late posts from components mid-teardown are fine.
            self.pending_tasks.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Register a named periodic trigger firing roughly every `every` while
    /// the scheduler is alive. Re-registering a live name is an error;
    /// silently ignored after destroy.
    pub fn schedule<F>(&self, name: &str, every: Duration, tick: F) -> Result<(), SchedulerError>
    where
        F: FnMut() + Send + 'static,
    {
        let (ack, ack_receiver) = flume::bounded(1);

        let sent = self.sender.send(WorkerMessage::Schedule {
            name: name.to_string(),
            every,
            tick: Box::new(tick),
            ack,
        });

        if sent.is_err() {
            return Ok(());
        }

        ack_receiver.recv().unwrap_or(Ok(()))
    }

    /// Remove a periodic trigger. No-op if the name is not registered or the
    /// scheduler is destroyed.
    pub fn unschedule(&self, name: &str) {
        let _ = self
            .sender
            .send(WorkerMessage::Unschedule(name.to_string()));
    }

    /// Block until everything queued before this call has completed and no
    /// task is mid-execution.
    ///
    /// Gives no guarantee about work queued concurrently with the call.
    pub fn drain(&self) {
        let (ack, ack_receiver) = flume::bounded(1);

        if self.sender.send(WorkerMessage::Drain(ack)).is_ok() {
            let _ = ack_receiver.recv();
        }
    }

    /// Stop the worker. Idempotent; subsequent `post`/`schedule`/`unschedule`
    /// calls are silently ignored.
    pub fn destroy(&self) {
        let (ack, ack_receiver) = flume::bounded(1);

        if self.sender.send(WorkerMessage::Shutdown(ack)).is_ok() {
            let _ = ack_receiver.recv();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

struct IntervalEntry {
    every: Duration,
    last_fired: Instant,
    tick: IntervalFn,
}

fn run(
    receiver: flume::Receiver<WorkerMessage>,
    self_sender: flume::Sender<WorkerMessage>,
    pending_tasks: Arc<AtomicUsize>,
) {
    let mut intervals: HashMap<String, IntervalEntry> = HashMap::new();

    loop {
        match receiver.recv_timeout(IDLE_BACKOFF) {
            Ok(WorkerMessage::Task(task)) => {
                task();
                pending_tasks.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(WorkerMessage::Schedule {
                name,
                every,
                tick,
                ack,
            }) => {
                if intervals.contains_key(&name) {
                    let _ = ack.send(Err(SchedulerError::AlreadyScheduled(name)));
                } else {
                    trace!(name = name.as_str(), ?every, "Scheduling interval");
                    intervals.insert(
                        name,
                        IntervalEntry {
                            every,
                            last_fired: Instant::now(),
                            tick,
                        },
                    );
                    let _ = ack.send(Ok(()));
                }
            }
            Ok(WorkerMessage::Unschedule(name)) => {
                intervals.remove(&name);
            }
            Ok(WorkerMessage::Drain(ack)) => {
                if pending_tasks.load(Ordering::SeqCst) == 0 {
                    let _ = ack.send(());
                } else {
                    // Still work ahead of us; park the barrier behind it.
                    let _ = self_sender.send(WorkerMessage::Drain(ack));
                }
            }
            Ok(WorkerMessage::Shutdown(ack)) => {
                debug!("Scheduler worker shutting down");
                let _ = ack.send(());
                break;
            }
            Err(flume::RecvTimeoutError::Timeout) => {}
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }

        // Opportunistic sampling: fire whatever is due on this turn.
        for entry in intervals.values_mut() {
            if entry.last_fired.elapsed() >= entry.every {
                entry.last_fired = Instant::now();
                (entry.tick)();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn tasks_run_in_fifo_order() {
        let scheduler = Scheduler::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let seen = seen.clone();
            scheduler.post(move || seen.lock().unwrap().push(i));
        }

        scheduler.drain();

        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
        scheduler.destroy();
    }

    #[test]
    fn drain_is_a_barrier() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = counter.clone();
            scheduler.post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        scheduler.drain();

        assert_eq!(counter.load(Ordering::SeqCst), 100);
        scheduler.destroy();
    }

    #[test]
    fn interval_fires_while_busy() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        scheduler
            .schedule("x", Duration::from_millis(2), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        for _ in 0..15 {
            scheduler.post(|| {});
            thread::sleep(Duration::from_millis(1));
        }

        scheduler.drain();

        assert!(
            fired.load(Ordering::SeqCst) > 2,
            "expected more than two firings, got {}",
            fired.load(Ordering::SeqCst)
        );
        scheduler.destroy();
    }

    #[test]
    fn unscheduled_interval_never_fires() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        scheduler
            .schedule("x", Duration::from_millis(2), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        scheduler.unschedule("x");
        scheduler.drain();

        for _ in 0..15 {
            scheduler.post(|| {});
            thread::sleep(Duration::from_millis(1));
        }

        scheduler.drain();

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        scheduler.destroy();
    }

    #[test]
    fn double_schedule_fails() {
        let scheduler = Scheduler::new();

        scheduler
            .schedule("x", Duration::from_secs(1), || {})
            .unwrap();

        assert_eq!(
            scheduler.schedule("x", Duration::from_secs(1), || {}),
            Err(SchedulerError::AlreadyScheduled("x".to_string()))
        );

        // Unscheduling frees the name; unscheduling the unknown is a no-op.
        scheduler.unschedule("x");
        scheduler.unschedule("never-registered");
        scheduler.drain();
        scheduler
            .schedule("x", Duration::from_secs(1), || {})
            .unwrap();

        scheduler.destroy();
    }

    #[test]
    fn destroy_is_idempotent_and_silences_late_calls() {
        let scheduler = Scheduler::new();

        scheduler.destroy();
        scheduler.destroy();

        // All silently ignored.
        scheduler.post(|| panic!("must never run"));
        assert_eq!(scheduler.schedule("x", Duration::from_millis(1), || {}), Ok(()));
        scheduler.unschedule("x");
        scheduler.drain();
    }
}
