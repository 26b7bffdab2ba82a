//! In-process lifecycle feed over bounded channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::bus::{EventBus, PublishReport, Subscription};

/// Per-subscriber buffer used by [`InMemoryEventBus::new`].
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 1_024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InMemoryBusError {
    #[error("subscriber list lock poisoned")]
    Poisoned,
}

#[derive(Debug)]
struct Subscriber<M> {
    sender: SyncSender<M>,
    missed: Arc<AtomicU64>,
}

/// In-memory pub/sub bus.
///
/// Each subscriber gets its own bounded buffer; `publish` uses `try_send`
/// and never waits. Dropped subscriptions are pruned on the next publish.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<Subscriber<M>>>,
    buffer: usize,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            buffer: buffer.max(1),
        }
    }

    pub fn buffer(&self) -> usize {
        self.buffer
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<PublishReport, Self::Error> {
        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| InMemoryBusError::Poisoned)?;

        let mut report = PublishReport::default();
        subs.retain(|sub| match sub.sender.try_send(message.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                sub.missed.fetch_add(1, Ordering::Relaxed);
                report.missed += 1;
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                report.pruned += 1;
                false
            }
        });

        Ok(report)
    }

    fn subscribe(&self) -> Subscription<M> {
        let (sender, receiver) = mpsc::sync_channel(self.buffer);
        let missed = Arc::new(AtomicU64::new(0));

        // A poisoned lock still yields a (silent) subscription.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(Subscriber {
                sender,
                missed: missed.clone(),
            });
        }

        Subscription::with_miss_counter(receiver, missed)
    }
}
