//! Error replies in the discriminated `{success: false, error}` shape.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use shadow_torrent_core::{CommandReply, SessionError};
use tracing::warn;

/// Failed request carrying the status code and caller-facing message.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) kind: &'static str,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            detail: detail.into(),
        }
    }

    pub(crate) fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", detail)
    }

    pub(crate) fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", detail)
    }

    pub(crate) fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", detail)
    }
}

/// HTTP status for a command failure.
pub(crate) const fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::InvalidDescriptor { .. }
        | SessionError::InvalidOptions { .. }
        | SessionError::InvalidConfig { .. } => StatusCode::BAD_REQUEST,
        SessionError::NotFound { .. } | SessionError::FileNotFound { .. } => StatusCode::NOT_FOUND,
        SessionError::AlreadyExists { .. } | SessionError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        SessionError::EngineRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::Engine { .. } => StatusCode::BAD_GATEWAY,
        SessionError::Unsupported { .. } => StatusCode::NOT_IMPLEMENTED,
        SessionError::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::Persistence { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self::new(status_for(&err), err.kind(), err.detail())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = self.status.as_u16(), kind = self.kind, detail = %self.detail, "request failed");
        }
        let reply = CommandReply::<()> {
            success: false,
            payload: None,
            error: Some(self.detail),
        };
        (self.status, Json(reply)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadow_torrent_core::JobId;

    #[test]
    fn session_errors_map_to_statuses() {
        let cases = [
            (
                SessionError::NotFound {
                    job_id: JobId::new("x"),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                SessionError::AlreadyExists {
                    job_id: JobId::new("x"),
                },
                StatusCode::CONFLICT,
            ),
            (
                SessionError::InvalidDescriptor { reason: "bad" },
                StatusCode::BAD_REQUEST,
            ),
            (
                SessionError::Unsupported { operation: "pause" },
                StatusCode::NOT_IMPLEMENTED,
            ),
            (SessionError::EngineUnavailable, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }

    #[test]
    fn not_found_keeps_caller_message() {
        let err = ApiError::from(SessionError::NotFound {
            job_id: JobId::new("unknown-id"),
        });
        assert_eq!(err.kind, "not_found");
        assert_eq!(err.detail, "Torrent not found");
    }
}
