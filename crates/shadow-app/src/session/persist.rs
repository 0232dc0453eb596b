//! Time-based throttling for progress-driven session writes.

use std::time::Duration;

use tokio::time::Instant;

/// Decides when progress activity warrants a session write.
///
/// Lifecycle commands write immediately and only call [`mark_written`]; engine
/// progress calls [`note_activity`] and writes when it returns `true`. Activity
/// suppressed by the window stays dirty until the next broadcast tick flushes it.
///
/// [`mark_written`]: PersistThrottle::mark_written
/// [`note_activity`]: PersistThrottle::note_activity
#[derive(Debug)]
pub(crate) struct PersistThrottle {
    interval: Duration,
    last_write: Option<Instant>,
    dirty: bool,
}

impl PersistThrottle {
    pub(crate) const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_write: None,
            dirty: false,
        }
    }

    pub(crate) fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub(crate) fn note_activity(&mut self, now: Instant) -> bool {
        self.dirty = true;
        self.last_write
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Flag state that changed outside engine events, such as progress first
    /// observed while building a snapshot.
    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_written(&mut self, now: Instant) {
        self.last_write = Some(now);
        self.dirty = false;
    }
}
