//! Error types for configuration operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Field contained an invalid value.
    #[error("invalid value for '{field}' in '{section}': {reason}")]
    InvalidField {
        /// Section that failed validation.
        section: &'static str,
        /// Field that failed validation.
        field: &'static str,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// File system operation failed.
    #[error("filesystem operation '{operation}' failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// Stored document could not be parsed.
    #[error("failed to parse configuration store")]
    Parse {
        /// Store path.
        path: PathBuf,
        /// Source parse error.
        source: serde_json::Error,
    },
    /// Document could not be serialised.
    #[error("failed to serialise configuration store")]
    Serialize {
        /// Source serialisation error.
        source: serde_json::Error,
    },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    pub(crate) fn invalid(
        section: &'static str,
        field: &'static str,
        value: impl ToString,
        reason: &'static str,
    ) -> Self {
        Self::InvalidField {
            section,
            field,
            value: Some(value.to_string()),
            reason,
        }
    }

    pub(crate) const fn io(operation: &'static str, path: PathBuf, source: io::Error) -> Self {
        Self::Io {
            operation,
            path,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn io_errors_keep_source() {
        let err = ConfigError::io("store.write", PathBuf::from("/tmp/x"), io::Error::other("disk"));
        assert_eq!(err.to_string(), "filesystem operation 'store.write' failed");
        assert!(err.source().is_some());
    }

    #[test]
    fn invalid_field_records_value() {
        let err = ConfigError::invalid("engine", "max_connections", 0, "out_of_range");
        match err {
            ConfigError::InvalidField {
                field, value, reason, ..
            } => {
                assert_eq!(field, "max_connections");
                assert_eq!(value.as_deref(), Some("0"));
                assert_eq!(reason, "out_of_range");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
