//! Typed configuration and persisted session records.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shadow_events::JobId;
use shadow_torrent_core::{Descriptor, EngineRuntimeConfig};

use crate::defaults::{
    DEFAULT_BROADCAST_INTERVAL_MS, DEFAULT_DOWNLOAD_DIR, DEFAULT_GRACE_PERIOD_MS,
    DEFAULT_MAX_CONNECTIONS, DEFAULT_PERSIST_INTERVAL_MS, MAX_RESTORE_FAILURES,
};

/// User configuration applied to the engine and the session layer.
///
/// Missing fields fall back to their defaults when a stored document is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Default destination for new jobs.
    pub download_path: PathBuf,
    /// Global connection cap.
    pub max_connections: u32,
    /// Upload limit in KiB/s; `0` means unlimited.
    pub upload_limit_kib: u64,
    /// Download limit in KiB/s; `0` means unlimited.
    pub download_limit_kib: u64,
    /// Enable the distributed hash table.
    pub enable_dht: bool,
    /// Enable the uTP transport.
    pub enable_utp: bool,
    /// Peer discovery and identity settings.
    pub privacy: PrivacySettings,
    /// Presentation preferences stored on behalf of the UI.
    pub ui: UiPreferences,
    /// Session layer timing knobs.
    pub tuning: SessionTuning,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            download_path: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            upload_limit_kib: 0,
            download_limit_kib: 0,
            enable_dht: true,
            enable_utp: true,
            privacy: PrivacySettings::default(),
            ui: UiPreferences::default(),
            tuning: SessionTuning::default(),
        }
    }
}

impl SessionConfig {
    /// Map the user-facing settings onto engine runtime options.
    #[must_use]
    pub fn engine_runtime(&self) -> EngineRuntimeConfig {
        EngineRuntimeConfig {
            download_root: self.download_path.clone(),
            max_connections: self.max_connections,
            upload_rate_limit_bps: kib_limit_to_bps(self.upload_limit_kib),
            download_rate_limit_bps: kib_limit_to_bps(self.download_limit_kib),
            enable_dht: self.enable_dht,
            enable_utp: self.enable_utp,
            enable_pex: self.privacy.enable_pex,
            enable_lsd: self.privacy.enable_lsd,
            anonymous_mode: self.privacy.anonymous_mode,
        }
    }
}

const fn kib_limit_to_bps(limit_kib: u64) -> Option<u64> {
    if limit_kib == 0 {
        None
    } else {
        Some(limit_kib.saturating_mul(1024))
    }
}

/// Peer discovery and identity settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacySettings {
    /// Enable peer exchange.
    pub enable_pex: bool,
    /// Enable local service discovery.
    pub enable_lsd: bool,
    /// Suppress identifying client information.
    pub anonymous_mode: bool,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            enable_pex: false,
            enable_lsd: false,
            anonymous_mode: true,
        }
    }
}

/// Colour theme preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    /// Dark palette.
    #[default]
    Dark,
    /// Light palette.
    Light,
}

/// Presentation preferences. The session layer stores them but never reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiPreferences {
    /// Colour theme.
    pub theme: Theme,
    /// Dense list layout.
    pub compact_mode: bool,
    /// Desktop notifications on completion and failure.
    pub show_notifications: bool,
    /// Accept dropped descriptors anywhere in the window.
    pub enable_drag_everywhere: bool,
}

impl Default for UiPreferences {
    fn default() -> Self {
        Self {
            theme: Theme::Dark,
            compact_mode: false,
            show_notifications: true,
            enable_drag_everywhere: true,
        }
    }
}

/// Session layer timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTuning {
    /// Bounded wait between pause and destroy during teardown.
    pub grace_period_ms: u64,
    /// Fixed broadcast timer.
    pub broadcast_interval_ms: u64,
    /// Minimum spacing between progress-driven persistence writes.
    pub persist_interval_ms: u64,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            broadcast_interval_ms: DEFAULT_BROADCAST_INTERVAL_MS,
            persist_interval_ms: DEFAULT_PERSIST_INTERVAL_MS,
        }
    }
}

impl SessionTuning {
    /// Grace period as a duration.
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Broadcast interval as a duration.
    #[must_use]
    pub const fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    /// Persistence throttle interval as a duration.
    #[must_use]
    pub const fn persist_interval(&self) -> Duration {
        Duration::from_millis(self.persist_interval_ms)
    }
}

/// Durable record of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedJob {
    /// Descriptor used to re-add the job.
    pub descriptor: Descriptor,
    /// Job fingerprint.
    pub id: JobId,
    /// Display name; also the expected on-disk artifact under `target_path`.
    pub name: String,
    /// Last committed pause flag.
    pub paused: bool,
    /// Destination directory.
    pub target_path: PathBuf,
    /// Last observed completion fraction.
    pub progress: f64,
    /// Restores in a row the engine refused; omitted while zero.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub restore_failures: u32,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl PersistedJob {
    /// Count one refused restore. Returns `false` once the record has reached
    /// [`MAX_RESTORE_FAILURES`] and should be dropped instead of retried.
    pub fn note_restore_failure(&mut self) -> bool {
        self.restore_failures = self.restore_failures.saturating_add(1);
        self.restore_failures < MAX_RESTORE_FAILURES
    }

    /// Whether the record describes a finished download.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0
    }

    /// Expected on-disk artifact of a finished download.
    #[must_use]
    pub fn artifact_path(&self) -> PathBuf {
        self.target_path.join(&self.name)
    }
}

/// Persisted session: every job that should come back after a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    /// Jobs in admission order, unique by id.
    pub jobs: Vec<PersistedJob>,
}

impl SessionState {
    /// Look up a record by id.
    #[must_use]
    pub fn get(&self, id: &JobId) -> Option<&PersistedJob> {
        self.jobs.iter().find(|job| &job.id == id)
    }
}

/// On-disk document holding configuration and session state together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct StoreDocument {
    pub(crate) config: SessionConfig,
    pub(crate) session: SessionState,
}
