//! Error types for session commands.
//!
//! # Design
//! - Messages stay constant; context travels in fields.
//! - `NotFound` renders the exact text delivery surfaces hand back to callers.

use std::error::Error;

use shadow_events::{JobId, JobState};
use thiserror::Error;

/// Boxed source error carried by engine and persistence failures.
pub type BoxedSource = Box<dyn Error + Send + Sync>;

/// Primary error type for session commands.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Descriptor syntax was rejected before reaching the engine.
    #[error("invalid descriptor")]
    InvalidDescriptor {
        /// Machine-readable reason for the rejection.
        reason: &'static str,
    },
    /// Add options failed validation.
    #[error("invalid job options")]
    InvalidOptions {
        /// Offending field.
        field: &'static str,
        /// Machine-readable reason for the rejection.
        reason: &'static str,
    },
    /// Replacement configuration failed validation.
    #[error("invalid configuration")]
    InvalidConfig {
        /// Underlying validation error.
        #[source]
        source: BoxedSource,
    },
    /// No registered job matches the identifier.
    #[error("Torrent not found")]
    NotFound {
        /// Missing job identifier.
        job_id: JobId,
    },
    /// The job exists but has no file at the requested index.
    #[error("File not found")]
    FileNotFound {
        /// Owning job.
        job_id: JobId,
        /// Requested file index.
        index: usize,
    },
    /// A job with the same fingerprint is already registered.
    #[error("torrent already exists")]
    AlreadyExists {
        /// Duplicate job identifier.
        job_id: JobId,
    },
    /// The requested command is not valid from the job's current state.
    #[error("invalid lifecycle transition")]
    InvalidTransition {
        /// Job identifier.
        job_id: JobId,
        /// Current state.
        from: JobState,
        /// Requested state.
        to: JobState,
    },
    /// The engine refused the descriptor.
    #[error("engine rejected torrent")]
    EngineRejected {
        /// Engine-provided failure.
        #[source]
        source: BoxedSource,
    },
    /// The engine failed while executing a command.
    #[error("engine operation failed")]
    Engine {
        /// Operation identifier.
        operation: &'static str,
        /// Job identifier when available.
        job_id: Option<JobId>,
        /// Engine-provided failure.
        #[source]
        source: BoxedSource,
    },
    /// The engine does not declare the capability the command needs.
    #[error("engine operation not supported")]
    Unsupported {
        /// Operation identifier.
        operation: &'static str,
    },
    /// No engine instance is currently available.
    #[error("engine unavailable")]
    EngineUnavailable,
    /// Writing session state or configuration failed.
    #[error("session persistence failed")]
    Persistence {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying store failure.
        #[source]
        source: BoxedSource,
    },
}

/// Convenience alias for session command results.
pub type SessionResult<T> = Result<T, SessionError>;

impl SessionError {
    /// Wrap an engine failure for the given operation.
    #[must_use]
    pub fn engine(operation: &'static str, job_id: Option<JobId>, err: anyhow::Error) -> Self {
        Self::Engine {
            operation,
            job_id,
            source: err.into(),
        }
    }

    /// Wrap an engine refusal to admit a descriptor.
    #[must_use]
    pub fn rejected(err: anyhow::Error) -> Self {
        Self::EngineRejected { source: err.into() }
    }

    /// Wrap a store failure for the given operation.
    #[must_use]
    pub fn persistence(operation: &'static str, err: impl Into<BoxedSource>) -> Self {
        Self::Persistence {
            operation,
            source: err.into(),
        }
    }

    /// Wrap a configuration validation failure.
    #[must_use]
    pub fn invalid_config(err: impl Into<BoxedSource>) -> Self {
        Self::InvalidConfig { source: err.into() }
    }

    /// Stable discriminator used for metrics labels and problem types.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidDescriptor { .. } => "invalid_descriptor",
            Self::InvalidOptions { .. } => "invalid_options",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::NotFound { .. } => "not_found",
            Self::FileNotFound { .. } => "file_not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::EngineRejected { .. } => "engine_rejected",
            Self::Engine { .. } => "engine",
            Self::Unsupported { .. } => "unsupported",
            Self::EngineUnavailable => "engine_unavailable",
            Self::Persistence { .. } => "persistence",
        }
    }

    /// Message handed back to command callers, including context where it helps.
    #[must_use]
    pub fn detail(&self) -> String {
        let mut message = self.to_string();
        match self {
            Self::InvalidDescriptor { reason } => {
                message.push_str(": ");
                message.push_str(reason);
            }
            Self::InvalidOptions { field, reason } => {
                message.push_str(&format!(": {field} {reason}"));
            }
            Self::InvalidTransition { from, to, .. } => {
                message.push_str(&format!(": {from} -> {to}"));
            }
            Self::Unsupported { operation } => {
                message.push_str(": ");
                message.push_str(operation);
            }
            _ => {}
        }
        if let Some(source) = self.source() {
            message.push_str(": ");
            message.push_str(&source.to_string());
        }
        message
    }
}
