//! Lifecycle feed: publish/subscribe for job events leaving a delivery.
//!
//! Observers (log shippers, dashboards) subscribe here instead of being wired
//! into the worker. Status history and the failure ledger have their own
//! sinks; the feed only distributes.
//!
//! A delivery must never wait on an observer, so publishing does not block.
//! A subscriber whose buffer is full misses the event, and the miss is
//! counted on its [`Subscription`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Outcome of a single publish across all current subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers that buffered the message.
    pub delivered: usize,
    /// Subscribers that were full and skipped it.
    pub missed: usize,
    /// Dropped subscriptions removed during this publish.
    pub pruned: usize,
}

/// A subscription to the lifecycle feed.
///
/// Receiving blocks; consume from a dedicated thread
/// (`tokio::task::spawn_blocking`), one consumer per subscription.
///
/// ```ignore
/// let subscription = bus.subscribe();
/// loop {
///     match subscription.recv_timeout(Duration::from_secs(1)) {
///         Ok(event) => observe(event),
///         Err(RecvTimeoutError::Timeout) => continue,
///         Err(RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
    missed: Arc<AtomicU64>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self::with_miss_counter(receiver, Arc::default())
    }

    /// Share `missed` with the publisher side so it can count skipped messages.
    pub fn with_miss_counter(receiver: Receiver<M>, missed: Arc<AtomicU64>) -> Self {
        Self { receiver, missed }
    }

    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }

    /// Messages skipped so far because this subscription's buffer was full.
    pub fn missed(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }

    /// Read and reset the miss counter.
    pub fn take_missed(&self) -> u64 {
        self.missed.swap(0, Ordering::Relaxed)
    }
}

/// Pub/sub transport for lifecycle events.
///
/// Messages from one publisher reach each subscriber in publish order, minus
/// any it missed. `publish()` fails only when the transport itself is broken;
/// slow subscribers show up in the [`PublishReport`].
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Display + core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<PublishReport, Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<PublishReport, Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
