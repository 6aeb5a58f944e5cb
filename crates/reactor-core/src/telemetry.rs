use crate::snapshot::Snapshot;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

struct Subscriber {
    tx: Sender<Arc<Snapshot>>,
    dropped: Arc<AtomicU64>,
}

/// Bounded history of published snapshots plus push delivery to
/// subscribers. Publishing never waits on a consumer: a subscriber whose
/// queue is full misses that snapshot and can catch up with [`since`].
///
/// [`since`]: TelemetryBuffer::since
pub struct TelemetryBuffer {
    capacity: usize,
    queue_depth: usize,
    history: Mutex<VecDeque<Arc<Snapshot>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    published: AtomicU64,
}

impl TelemetryBuffer {
    /// `capacity` and `queue_depth` are raised to at least one.
    pub fn new(capacity: usize, queue_depth: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            queue_depth: queue_depth.max(1),
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            subscribers: Mutex::new(Vec::new()),
            published: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.history().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history().is_empty()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Called by the tick thread once per tick.
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        {
            let mut history = self.history();
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(Arc::clone(&snapshot));
        }
        self.published.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers();
        subscribers.retain(|sub| match sub.tx.try_send(Arc::clone(&snapshot)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                sub.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        snapshot
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.history().back().cloned()
    }

    /// Retained snapshots with a sequence number greater than `sequence`,
    /// oldest first.
    pub fn since(&self, sequence: u64) -> Vec<Arc<Snapshot>> {
        let history = self.history();
        let start = history.partition_point(|s| s.sequence <= sequence);
        history.range(start..).cloned().collect()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = bounded(self.queue_depth);
        let dropped = Arc::new(AtomicU64::new(0));
        self.subscribers().push(Subscriber {
            tx,
            dropped: Arc::clone(&dropped),
        });
        Subscription { rx, dropped }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    fn history(&self) -> MutexGuard<'_, VecDeque<Arc<Snapshot>>> {
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Push feed of newly published snapshots, in publish order, each
/// delivered at most once. Dropping it unsubscribes.
pub struct Subscription {
    rx: Receiver<Arc<Snapshot>>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Block until the next snapshot. `None` once the engine is gone.
    pub fn recv(&self) -> Option<Arc<Snapshot>> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Arc<Snapshot>, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<Arc<Snapshot>, TryRecvError> {
        self.rx.try_recv()
    }

    /// Snapshots this subscriber missed because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Iterator for Subscription {
    type Item = Arc<Snapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}
