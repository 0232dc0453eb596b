//! Shared HTTP constants (headers, event names, stream defaults).

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";
pub(crate) const HEADER_LAST_EVENT_ID: &str = "last-event-id";
pub(crate) const SSE_KEEP_ALIVE_SECS: u64 = 20;

/// Name of the SSE event carrying a full snapshot list.
pub(crate) const TORRENTS_UPDATE_EVENT: &str = "torrents_update";

pub(crate) const STREAM_CONTENT_TYPE: &str = "application/octet-stream";

pub(crate) const EVENT_KIND_WHITELIST: &[&str] = &[
    TORRENTS_UPDATE_EVENT,
    "job_added",
    "state_changed",
    "job_completed",
    "job_failed",
    "job_removed",
    "teardown_warning",
    "restore_skipped",
    "engine_error",
    "settings_changed",
    "health_changed",
];
