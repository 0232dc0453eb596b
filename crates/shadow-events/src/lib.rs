#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs)]

//! Domain event bus and shared identifiers for the Shadow session layer.
//!
//! The bus provides a typed event enum, sequential identifiers, and support for
//! replaying recent events when subscribers reconnect (e.g. SSE clients that
//! supply `Last-Event-ID`). Internally it uses `tokio::broadcast` with a bounded
//! buffer; when the channel overflows, the oldest events are dropped.
//!
//! Snapshot payloads and the snapshot fan-out sinks live in [`payloads`] and
//! [`sinks`] respectively.

/// Snapshot payloads computed for each managed job.
pub mod payloads;
/// Snapshot fan-out sinks (UI and subscription channels).
pub mod sinks;

pub use payloads::{FileSnapshot, Snapshot, SnapshotBatch};
pub use sinks::{SnapshotSink, Subscription, SubscriptionSink, UiSink};

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};

/// Identifier assigned to each event emitted by the session layer.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Content fingerprint identifying a transfer job (the torrent info hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wrap a fingerprint string without normalisation.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw fingerprint.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle states a managed job moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Submitted to the engine, acceptance pending.
    Requested,
    /// Actively transferring.
    Active,
    /// Paused by the user, a restore, or a force-stop.
    Paused,
    /// Complete and uploading to peers.
    Seeding,
    /// All content present on disk.
    Completed,
    /// Teardown in progress.
    Removing,
    /// Teardown finished; the job is gone.
    Removed,
    /// Unrecoverable engine failure.
    Failed,
}

impl JobState {
    /// Stable lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Seeding => "seeding",
            Self::Completed => "completed",
            Self::Removing => "removing",
            Self::Removed => "removed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed domain events surfaced across the system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A job was accepted by the engine and registered.
    JobAdded {
        /// Job identifier.
        job_id: JobId,
        /// Display name known at admission time.
        name: String,
    },
    /// A job moved to a new lifecycle state.
    StateChanged {
        /// Job identifier.
        job_id: JobId,
        /// New lifecycle state.
        state: JobState,
    },
    /// The engine finished downloading all content for a job.
    JobCompleted {
        /// Job identifier.
        job_id: JobId,
        /// Display name of the completed job.
        name: String,
    },
    /// The engine reported an unrecoverable failure for a job.
    JobFailed {
        /// Job identifier.
        job_id: JobId,
        /// Engine-provided failure detail.
        message: String,
    },
    /// Teardown finished and the job left the registry.
    JobRemoved {
        /// Job identifier.
        job_id: JobId,
        /// Non-fatal warnings collected during teardown.
        warnings: Vec<String>,
    },
    /// A teardown stage failed without blocking removal.
    TeardownWarning {
        /// Job identifier.
        job_id: JobId,
        /// Teardown stage that failed.
        stage: String,
        /// Failure detail.
        message: String,
    },
    /// A persisted job was not restored.
    RestoreSkipped {
        /// Job identifier.
        job_id: JobId,
        /// Reason the record was skipped.
        reason: String,
    },
    /// The engine reported a non-fatal or engine-level error.
    EngineError {
        /// Affected job, when the error is job scoped.
        job_id: Option<JobId>,
        /// Engine-provided failure detail.
        message: String,
    },
    /// Configuration was replaced and the engine reinitialised.
    SettingsChanged {
        /// Human readable description of the change.
        description: String,
    },
    /// Set of degraded components changed.
    HealthChanged {
        /// Components currently degraded.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator for SSE consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::JobAdded { .. } => "job_added",
            Self::StateChanged { .. } => "state_changed",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobFailed { .. } => "job_failed",
            Self::JobRemoved { .. } => "job_removed",
            Self::TeardownWarning { .. } => "teardown_warning",
            Self::RestoreSkipped { .. } => "restore_skipped",
            Self::EngineError { .. } => "engine_error",
            Self::SettingsChanged { .. } => "settings_changed",
            Self::HealthChanged { .. } => "health_changed",
        }
    }

    /// Job the event refers to, if any.
    #[must_use]
    pub const fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::JobAdded { job_id, .. }
            | Self::StateChanged { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobRemoved { job_id, .. }
            | Self::TeardownWarning { job_id, .. }
            | Self::RestoreSkipped { job_id, .. } => Some(job_id),
            Self::EngineError { job_id, .. } => job_id.as_ref(),
            Self::SettingsChanged { .. } | Self::HealthChanged { .. } => None,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// The broadcast channel uses the same capacity as the in-memory replay
    /// buffer, so dropped events impact both structures consistently. A zero
    /// capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying any buffered events newer than `since_id`.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        // Subscribe before copying the backlog so nothing published in between is lost;
        // duplicates are filtered by id in `next`.
        let receiver = self.sender.subscribe();
        if let Some(since) = since_id {
            let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            backlog.extend(buffer.iter().filter(|item| item.id > since).cloned());
        }

        EventStream {
            backlog,
            receiver,
            last_seen: since_id,
        }
    }

    /// Returns the last assigned identifier, if any events have been published.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.back().map(|event| event.id)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from the
/// live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
    last_seen: Option<EventId>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            self.last_seen = Some(event.id);
            return Some(event);
        }

        loop {
            let envelope = match self.receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event stream lagged; skipping ahead");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            };
            if self.last_seen.is_some_and(|seen| envelope.id <= seen) {
                continue;
            }
            self.last_seen = Some(envelope.id);
            return Some(envelope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::task;
    use tokio::time::timeout;

    const PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

    fn sample_state_event(id: usize) -> Event {
        Event::StateChanged {
            job_id: JobId::new(format!("{id:040x}")),
            state: JobState::Active,
        }
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() -> anyhow::Result<()> {
        let bus = EventBus::with_capacity(16);

        let mut last_id = 0;
        for i in 0..5 {
            last_id = bus.publish(sample_state_event(i));
        }
        assert_eq!(last_id, 5);
        assert_eq!(bus.last_event_id(), Some(5));

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = timeout(PUBLISH_TIMEOUT, stream.next()).await? {
                received.push(event.id);
            }
        }

        assert_eq!(received, vec![3, 4, 5]);
        Ok(())
    }

    #[tokio::test]
    async fn replay_does_not_duplicate_live_events() -> anyhow::Result<()> {
        let bus = EventBus::with_capacity(16);
        let _ = bus.publish(sample_state_event(0));
        let mut stream = bus.subscribe(Some(0));
        let _ = bus.publish(sample_state_event(1));

        let first = timeout(PUBLISH_TIMEOUT, stream.next()).await?;
        let second = timeout(PUBLISH_TIMEOUT, stream.next()).await?;
        assert_eq!(first.map(|env| env.id), Some(1));
        assert_eq!(second.map(|env| env.id), Some(2));
        assert!(
            timeout(Duration::from_millis(50), stream.next())
                .await
                .is_err()
        );
        Ok(())
    }

    #[test]
    fn event_kind_and_job_id_accessors() {
        let id = JobId::new("abc");
        let event = Event::JobCompleted {
            job_id: id.clone(),
            name: "ubuntu.iso".into(),
        };
        assert_eq!(event.kind(), "job_completed");
        assert_eq!(event.job_id(), Some(&id));

        let settings = Event::SettingsChanged {
            description: "engine reinitialised".into(),
        };
        assert_eq!(settings.job_id(), None);
    }

    #[test]
    fn job_id_serialises_transparently() -> anyhow::Result<()> {
        let id = JobId::new("AAAA");
        assert_eq!(serde_json::to_string(&id)?, "\"AAAA\"");
        assert_eq!(serde_json::to_string(&JobState::Seeding)?, "\"seeding\"");
        Ok(())
    }

    #[tokio::test]
    async fn load_test_does_not_stall_publishers() -> anyhow::Result<()> {
        let bus = Arc::new(EventBus::with_capacity(512));
        let mut stream = bus.subscribe(None);

        let publisher = {
            let bus = bus.clone();
            task::spawn(async move {
                for i in 0..500 {
                    let publish_bus = bus.clone();
                    let _ = timeout(PUBLISH_TIMEOUT, async move {
                        let _ = publish_bus.publish(sample_state_event(i));
                    })
                    .await;
                }
            })
        };

        let consumer = task::spawn(async move {
            let mut ids = HashSet::new();
            while ids.len() < 500 {
                if let Some(event) = stream.next().await {
                    ids.insert(event.id);
                }
            }
            ids
        });

        publisher.await?;
        let ids = consumer.await?;
        assert_eq!(ids.len(), 500);
        Ok(())
    }
}
