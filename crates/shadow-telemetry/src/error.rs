//! Error types for telemetry setup and metrics rendering.

use thiserror::Error;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised while installing logging or maintaining the metrics registry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global tracing subscriber was already installed, or installation failed.
    #[error("failed to install tracing subscriber")]
    Subscriber {
        /// Underlying subscriber error.
        #[source]
        source: tracing_subscriber::util::TryInitError,
    },
    /// A session metric could not be built or registered.
    #[error("metric '{name}' could not be {stage}")]
    Metric {
        /// Metric name.
        name: &'static str,
        /// `built` or `registered`.
        stage: &'static str,
        /// Underlying Prometheus error.
        #[source]
        source: prometheus::Error,
    },
    /// The registry could not be rendered as Prometheus text.
    #[error("failed to render metrics")]
    Render {
        /// Underlying Prometheus error.
        #[source]
        source: prometheus::Error,
    },
    /// Rendered metrics were not UTF-8.
    #[error("rendered metrics were not valid utf-8")]
    RenderUtf8 {
        /// Underlying conversion error.
        #[source]
        source: std::string::FromUtf8Error,
    },
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn metric_errors_name_the_metric_and_stage() {
        let err = TelemetryError::Metric {
            name: "shadow_jobs_active",
            stage: "registered",
            source: prometheus::Error::AlreadyReg,
        };
        assert_eq!(
            err.to_string(),
            "metric 'shadow_jobs_active' could not be registered"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn render_errors_keep_their_source() {
        let utf8 = String::from_utf8(vec![0, 159]).expect_err("invalid utf-8");
        let err = TelemetryError::RenderUtf8 { source: utf8 };
        assert_eq!(err.to_string(), "rendered metrics were not valid utf-8");
        assert!(err.source().is_some());
    }
}
