//! Default values for configuration records.
//!
//! # Design
//! - Keep numeric defaults in one place so model and validation agree.

/// File name of the JSON store inside the data directory.
pub(crate) const STORE_FILE_NAME: &str = "shadow-store.json";
/// Download directory used when none is configured.
pub(crate) const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
/// Global connection cap.
pub(crate) const DEFAULT_MAX_CONNECTIONS: u32 = 200;
/// Bounded wait between pause and destroy during teardown.
pub(crate) const DEFAULT_GRACE_PERIOD_MS: u64 = 500;
/// Fixed broadcast interval.
pub(crate) const DEFAULT_BROADCAST_INTERVAL_MS: u64 = 1_000;
/// Minimum spacing between progress-driven persistence writes.
pub(crate) const DEFAULT_PERSIST_INTERVAL_MS: u64 = 2_000;
/// Consecutive restore refusals after which a persisted job is dropped.
pub const MAX_RESTORE_FAILURES: u32 = 3;

/// Inclusive bounds enforced by validation.
pub(crate) const MAX_CONNECTIONS_RANGE: (u32, u32) = (1, 10_000);
pub(crate) const MAX_GRACE_PERIOD_MS: u64 = 60_000;
pub(crate) const BROADCAST_INTERVAL_RANGE_MS: (u64, u64) = (50, 60_000);
pub(crate) const PERSIST_INTERVAL_RANGE_MS: (u64, u64) = (100, 600_000);
/// Largest accepted rate limit, in KiB/s (roughly 10 GiB/s).
pub(crate) const MAX_RATE_LIMIT_KIB: u64 = 10 * 1024 * 1024;
