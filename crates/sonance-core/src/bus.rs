//! Bounded event bus merging all adapters into one ordered stream.
//!
//! Publishing never blocks: when the queue is full the oldest event is
//! dropped. Blocking an adapter (the LIRC reader in particular) would let
//! the hardware decoder fall out of sync.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::Error;
use crate::event::{EventKind, InputEvent};

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 64;

struct Shared {
    queue: Mutex<VecDeque<InputEvent>>,
    capacity: usize,
    available: Notify,
    dropped: AtomicU64,
    /// Only changed while `queue` is locked
    closed: AtomicBool,
}

/// Consumer side of the bus. There is exactly one.
pub struct EventBus {
    shared: Arc<Shared>,
}

/// Producer handle, cloned into every adapter.
#[derive(Clone)]
pub struct BusPublisher {
    shared: Arc<Shared>,
}

impl EventBus {
    /// Create a bus holding at most `capacity` pending events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                available: Notify::new(),
                dropped: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Get a new publisher handle.
    #[must_use]
    pub fn publisher(&self) -> BusPublisher {
        BusPublisher { shared: Arc::clone(&self.shared) }
    }

    /// Wait for the next event.
    pub async fn next_event(&self) -> InputEvent {
        loop {
            if let Some(event) = self.try_next() {
                return event;
            }
            // notify_one stores a permit, so a publish racing this await is not lost
            self.shared.available.notified().await;
        }
    }

    /// Take the next event if one is queued.
    #[must_use]
    pub fn try_next(&self) -> Option<InputEvent> {
        self.shared.queue.lock().pop_front()
    }

    /// Stop accepting events and take everything still queued.
    ///
    /// Later direct commands are answered with [`Error::CommandDropped`]
    /// as soon as they are published.
    pub fn close(&self) -> Vec<InputEvent> {
        let mut queue = self.shared.queue.lock();
        self.shared.closed.store(true, Ordering::Relaxed);
        queue.drain(..).collect()
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of events dropped due to overflow.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusPublisher").field("capacity", &self.shared.capacity).finish_non_exhaustive()
    }
}

impl BusPublisher {
    /// Queue an event for the dispatcher.
    ///
    /// If the queue is full the oldest event is discarded and a
    /// `QueueOverflow` diagnostic is logged. A discarded direct command is
    /// answered with that error so its caller does not wait forever. Once
    /// the bus is closed every event is rejected.
    pub fn publish(&self, event: InputEvent) {
        let evicted = {
            let mut queue = self.shared.queue.lock();
            if self.shared.closed.load(Ordering::Relaxed) {
                drop(queue);
                debug!(source = %event.source, kind = ?event.kind, "Bus closed, rejecting event");
                if let EventKind::Direct(_, Some(reply)) = event.kind {
                    let _ = reply.send(Err(Error::CommandDropped));
                }
                return;
            }
            let evicted =
                if queue.len() >= self.shared.capacity { queue.pop_front() } else { None };
            queue.push_back(event);
            evicted
        };
        self.shared.available.notify_one();

        if let Some(old) = evicted {
            let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let err = Error::QueueOverflow { dropped };
            warn!(source = %old.source, kind = ?old.kind, error = %err, "Dropped oldest event");
            if let EventKind::Direct(_, Some(reply)) = old.kind {
                let _ = reply.send(Err(err));
            }
        }
    }
}
