use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::payloads::SnapshotBatch;

/// Default per-consumer queue depth for snapshot channels.
pub const DEFAULT_SINK_CAPACITY: usize = 16;

/// Destination for computed snapshot lists.
///
/// Delivery must never block the broadcaster: implementations hand the batch
/// off without awaiting the consumer and silently drop it when the consumer
/// cannot take it.
pub trait SnapshotSink: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    /// Hand the batch to every attached consumer.
    fn deliver(&self, batch: &SnapshotBatch);
}

/// Single best-effort consumer, typically the desktop UI.
///
/// Attaching a new consumer replaces the previous one.
#[derive(Default)]
pub struct UiSink {
    slot: Mutex<Option<mpsc::Sender<SnapshotBatch>>>,
}

impl UiSink {
    /// Construct a sink with no consumer attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the UI consumer, returning the receiving half.
    #[must_use]
    pub fn attach(&self) -> mpsc::Receiver<SnapshotBatch> {
        let (tx, rx) = mpsc::channel(DEFAULT_SINK_CAPACITY);
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    /// Whether a live consumer is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

impl SnapshotSink for UiSink {
    fn name(&self) -> &'static str {
        "ui"
    }

    fn deliver(&self, batch: &SnapshotBatch) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = slot.as_ref() else {
            return;
        };
        match tx.try_send(batch.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("ui consumer busy; snapshot skipped"),
            Err(TrySendError::Closed(_)) => {
                *slot = None;
            }
        }
    }
}

/// Zero-or-more real-time subscribers (SSE clients and similar).
#[derive(Default)]
pub struct SubscriptionSink {
    subscribers: Mutex<Vec<mpsc::Sender<SnapshotBatch>>>,
}

impl SubscriptionSink {
    /// Construct a sink with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber with the default queue depth.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with_capacity(DEFAULT_SINK_CAPACITY)
    }

    /// Register a subscriber with an explicit queue depth.
    #[must_use]
    pub fn subscribe_with_capacity(&self, capacity: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        Subscription { receiver: rx }
    }

    /// Number of subscribers still registered.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl SnapshotSink for SubscriptionSink {
    fn name(&self) -> &'static str {
        "subscriptions"
    }

    fn deliver(&self, batch: &SnapshotBatch) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| match tx.try_send(batch.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("subscriber queue full; snapshot skipped for this consumer");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

/// Receiving half handed to a subscriber.
pub struct Subscription {
    receiver: mpsc::Receiver<SnapshotBatch>,
}

impl Subscription {
    /// Wait for the next snapshot list; `None` once the sink is gone.
    pub async fn next(&mut self) -> Option<SnapshotBatch> {
        self.receiver.recv().await
    }

    /// Unwrap the underlying channel receiver.
    #[must_use]
    pub fn into_inner(self) -> mpsc::Receiver<SnapshotBatch> {
        self.receiver
    }
}
