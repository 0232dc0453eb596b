//! Error types for the simulated engine.

use std::path::PathBuf;

use shadow_events::JobId;
use thiserror::Error;

/// Failures reported by the simulated engine.
#[derive(Debug, Error)]
pub enum SimEngineError {
    /// The engine already holds a transfer with this fingerprint.
    #[error("torrent already added")]
    Duplicate {
        /// Duplicate fingerprint.
        id: JobId,
    },
    /// No transfer with this fingerprint.
    #[error("unknown torrent")]
    UnknownJob {
        /// Requested fingerprint.
        id: JobId,
    },
    /// Descriptor could not be interpreted.
    #[error("descriptor rejected: {reason}")]
    InvalidDescriptor {
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// The engine does not declare this capability.
    #[error("operation not supported by this engine")]
    Unsupported {
        /// Operation identifier.
        operation: &'static str,
    },
    /// The worker task has stopped.
    #[error("engine worker unavailable")]
    WorkerGone {
        /// Operation identifier.
        operation: &'static str,
    },
    /// Writing content files failed.
    #[error("failed to write content file")]
    Materialize {
        /// File being written.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
}
