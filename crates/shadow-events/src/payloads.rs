use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{JobId, JobState};

/// Point-in-time view of one job, recomputed on every broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Job fingerprint.
    pub id: JobId,
    /// Display name.
    pub name: String,
    /// Lifecycle state.
    pub state: JobState,
    /// Completion fraction in `[0, 1]`.
    pub progress: f64,
    /// Bytes downloaded; never decreases while the job stays registered.
    pub downloaded_bytes: u64,
    /// Bytes uploaded.
    pub uploaded_bytes: u64,
    /// Current download rate in bytes per second.
    pub download_rate_bps: u64,
    /// Current upload rate in bytes per second.
    pub upload_rate_bps: u64,
    /// Connected peers.
    pub peer_count: u32,
    /// Upload/download ratio, `0` when nothing has been downloaded.
    pub ratio: f64,
    /// Estimated seconds remaining; `None` when unbounded.
    pub eta_seconds: Option<u64>,
    /// Total content size in bytes.
    pub total_bytes: u64,
    /// Per-file breakdown.
    pub files: Vec<FileSnapshot>,
    /// Last committed pause flag.
    pub paused: bool,
    /// Whether every piece is present.
    pub done: bool,
    /// Set when peers were severed by a force-stop.
    pub force_stopped: bool,
}

/// Per-file entry inside a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSnapshot {
    /// Path relative to the job's target directory.
    pub name: String,
    /// File size in bytes.
    pub size: u64,
    /// Bytes of this file present on disk.
    pub downloaded_bytes: u64,
    /// Completion fraction in `[0, 1]`.
    pub progress: f64,
}

/// One computed snapshot list, shared by every sink that receives it.
pub type SnapshotBatch = Arc<Vec<Snapshot>>;

/// Compute `part / whole` clamped to `[0, 1]`, or `0` when `whole` is zero.
#[must_use]
#[expect(
    clippy::cast_precision_loss,
    reason = "byte counts are reported as approximate fractions"
)]
pub fn fraction(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64).clamp(0.0, 1.0)
    }
}

/// Upload/download ratio; `0` when nothing has been downloaded.
#[must_use]
#[expect(
    clippy::cast_precision_loss,
    reason = "ratios are reported as approximate fractions"
)]
pub fn ratio(uploaded: u64, downloaded: u64) -> f64 {
    if downloaded == 0 {
        0.0
    } else {
        uploaded as f64 / downloaded as f64
    }
}
