//! Core transfer domain types and DTOs shared across the workspace.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use shadow_events::JobId;

use crate::descriptor::Descriptor;

/// Optional knobs that accompany an add command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddJobOptions {
    /// Destination directory; falls back to the configured download path.
    #[serde(default)]
    pub target_path: Option<PathBuf>,
    /// Pause immediately after the engine accepts the job.
    #[serde(default)]
    pub start_paused: bool,
    /// Friendly name to display before metadata is fetched.
    #[serde(default)]
    pub name_hint: Option<String>,
}

/// Fully resolved admission request handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineAddRequest {
    /// How the transfer should be located.
    pub descriptor: Descriptor,
    /// Destination directory.
    pub target_path: PathBuf,
    /// Optional display name override.
    pub name_hint: Option<String>,
}

/// Handle returned by the engine once it accepts a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    /// Content fingerprint assigned by the engine.
    pub id: JobId,
    /// Display name known at admission time.
    pub name: String,
}

/// Optional engine features, declared once when the engine is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCapabilities {
    /// Engine can pause an individual transfer.
    pub pause: bool,
    /// Engine can resume a paused transfer.
    pub resume: bool,
    /// Engine can sever all peer connections and stop discovery for a transfer.
    pub disconnect_peers: bool,
}

impl EngineCapabilities {
    /// Every optional feature available.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            pause: true,
            resume: true,
            disconnect_peers: true,
        }
    }

    /// No optional feature available.
    #[must_use]
    pub const fn minimal() -> Self {
        Self {
            pause: false,
            resume: false,
            disconnect_peers: false,
        }
    }
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self::full()
    }
}

/// Runtime options applied when constructing an engine instance.
///
/// Rate limits are expressed in bytes per second; `None` disables the limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineRuntimeConfig {
    /// Default destination for new transfers.
    pub download_root: PathBuf,
    /// Global connection cap.
    pub max_connections: u32,
    /// Upload limit in bytes per second.
    pub upload_rate_limit_bps: Option<u64>,
    /// Download limit in bytes per second.
    pub download_rate_limit_bps: Option<u64>,
    /// Enable the distributed hash table.
    pub enable_dht: bool,
    /// Enable the uTP transport.
    pub enable_utp: bool,
    /// Enable peer exchange.
    pub enable_pex: bool,
    /// Enable local service discovery.
    pub enable_lsd: bool,
    /// Suppress identifying client information.
    pub anonymous_mode: bool,
}

impl Default for EngineRuntimeConfig {
    fn default() -> Self {
        Self {
            download_root: PathBuf::from("downloads"),
            max_connections: 200,
            upload_rate_limit_bps: None,
            download_rate_limit_bps: None,
            enable_dht: true,
            enable_utp: true,
            enable_pex: false,
            enable_lsd: false,
            anonymous_mode: true,
        }
    }
}

/// File entry reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineFileStatus {
    /// Path relative to the job's target directory.
    pub path: PathBuf,
    /// File size in bytes.
    pub size: u64,
    /// Bytes of this file present on disk.
    pub downloaded: u64,
}

/// Raw per-transfer statistics reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineJobStatus {
    /// Content fingerprint.
    pub id: JobId,
    /// Display name.
    pub name: String,
    /// Destination directory.
    pub target_path: PathBuf,
    /// Completion fraction in `[0, 1]`.
    pub progress: f64,
    /// Bytes downloaded.
    pub downloaded_bytes: u64,
    /// Bytes uploaded.
    pub uploaded_bytes: u64,
    /// Current download rate.
    pub download_rate_bps: u64,
    /// Current upload rate.
    pub upload_rate_bps: u64,
    /// Connected peers.
    pub peer_count: u32,
    /// Total content size.
    pub total_bytes: u64,
    /// Estimated seconds remaining; `None` when unbounded.
    pub eta_seconds: Option<u64>,
    /// Engine-side pause flag.
    pub paused: bool,
    /// Every piece present.
    pub done: bool,
    /// Per-file breakdown.
    pub files: Vec<EngineFileStatus>,
}

impl EngineJobStatus {
    /// Status for a freshly admitted transfer with no progress yet.
    #[must_use]
    pub fn pending(id: JobId, name: impl Into<String>, target_path: PathBuf) -> Self {
        Self {
            id,
            name: name.into(),
            target_path,
            progress: 0.0,
            downloaded_bytes: 0,
            uploaded_bytes: 0,
            download_rate_bps: 0,
            upload_rate_bps: 0,
            peer_count: 0,
            total_bytes: 0,
            eta_seconds: None,
            paused: false,
            done: false,
            files: Vec::new(),
        }
    }
}

/// Events emitted by an engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Metadata resolved; the name may have changed.
    Added {
        /// Job identifier.
        job_id: JobId,
        /// Resolved display name.
        name: String,
    },
    /// Download progress advanced.
    Progress {
        /// Job identifier.
        job_id: JobId,
    },
    /// Data was uploaded to peers.
    Upload {
        /// Job identifier.
        job_id: JobId,
    },
    /// Every piece is present on disk.
    Done {
        /// Job identifier.
        job_id: JobId,
    },
    /// A job-scoped or engine-level error.
    Error {
        /// Affected job; `None` for engine-level errors.
        job_id: Option<JobId>,
        /// Engine-provided detail.
        message: String,
        /// Whether the job cannot continue.
        fatal: bool,
    },
}

/// Engine event tagged with the generation of the engine instance that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEnvelope {
    /// Engine generation, bumped on every reinitialisation.
    pub generation: u64,
    /// Event payload.
    pub event: EngineEvent,
}

/// File resolved for byte-range serving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedFile {
    /// Owning job.
    pub job_id: JobId,
    /// Index within the job's file list.
    pub index: usize,
    /// Path relative to the job's target directory.
    pub name: String,
    /// Absolute on-disk path.
    pub path: PathBuf,
    /// Declared file size in bytes.
    pub size: u64,
}

/// Teardown stage a warning originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownStage {
    /// Pausing before destroy.
    Pause,
    /// Resolving on-disk files before destroy.
    FetchFiles,
    /// Engine destroy.
    Destroy,
    /// Removing a content file.
    DeleteFile,
    /// Removing an emptied directory.
    DeleteDirectory,
    /// The teardown task itself failed.
    Task,
}

impl TeardownStage {
    /// Stable label used in events and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::FetchFiles => "fetch_files",
            Self::Destroy => "destroy",
            Self::DeleteFile => "delete_file",
            Self::DeleteDirectory => "delete_directory",
            Self::Task => "task",
        }
    }
}

/// Non-fatal failure collected while tearing a job down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownWarning {
    /// Stage that failed.
    pub stage: TeardownStage,
    /// Failure detail.
    pub message: String,
    /// Path involved, for file-system stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl TeardownWarning {
    /// Construct a warning without a path.
    #[must_use]
    pub fn new(stage: TeardownStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            path: None,
        }
    }

    /// Construct a warning tied to a path.
    #[must_use]
    pub fn at_path(stage: TeardownStage, path: PathBuf, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            path: Some(path),
        }
    }
}

impl fmt::Display for TeardownWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {} ({})", self.stage.as_str(), self.message, path.display()),
            None => write!(f, "{}: {}", self.stage.as_str(), self.message),
        }
    }
}

/// Outcome of a completed removal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalReport {
    /// Warnings collected during teardown; removal happened regardless.
    pub warnings: Vec<TeardownWarning>,
}

/// Outcome of one restore pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    /// Records re-added to the engine.
    pub restored: usize,
    /// Completed records whose artifact was missing.
    pub skipped: usize,
    /// Records the engine refused.
    pub failed: usize,
}
