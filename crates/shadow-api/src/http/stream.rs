//! Byte-range serving of job files: `GET /stream/{id}/{file_index}`.

use std::io::SeekFrom;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path as AxumPath, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use shadow_torrent_core::JobId;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::http::constants::STREAM_CONTENT_TYPE;
use crate::http::errors::ApiError;
use crate::state::ApiState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParsedRange {
    StartEnd {
        start: u64,
        end_inclusive: Option<u64>,
    },
    Suffix {
        len: u64,
    },
}

/// Parse a single-range `Range` header value:
/// - `bytes=start-end`
/// - `bytes=start-`
/// - `bytes=-suffix_len`
///
/// Returns `None` for anything else (including multi-range requests and
/// reversed bounds), which callers treat as if no header was sent.
pub(crate) fn parse_range_header(value: &str) -> Option<ParsedRange> {
    let rest = value.trim().strip_prefix("bytes=")?;
    if rest.contains(',') {
        return None;
    }
    let (start_str, end_str) = rest.split_once('-')?;
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    if start_str.is_empty() {
        let len = end_str.parse().ok()?;
        return Some(ParsedRange::Suffix { len });
    }
    let start = start_str.parse().ok()?;
    let end_inclusive = if end_str.is_empty() {
        None
    } else {
        let end = end_str.parse::<u64>().ok()?;
        // Reversed bounds are malformed, not unsatisfiable.
        if end < start {
            return None;
        }
        Some(end)
    };
    Some(ParsedRange::StartEnd {
        start,
        end_inclusive,
    })
}

/// Resolve a parsed range against the file length into an inclusive
/// `(start, end)` pair, or `None` when it cannot be satisfied.
pub(crate) fn resolve_range(range: ParsedRange, total: u64) -> Option<(u64, u64)> {
    if total == 0 {
        return None;
    }
    let last = total - 1;
    match range {
        ParsedRange::StartEnd {
            start,
            end_inclusive,
        } => {
            let end = end_inclusive.map_or(last, |end| end.min(last));
            (start <= end).then_some((start, end))
        }
        ParsedRange::Suffix { len } => (len > 0).then(|| (total.saturating_sub(len), last)),
    }
}

pub(crate) async fn stream_file(
    State(state): State<Arc<ApiState>>,
    AxumPath((id, index)): AxumPath<(String, usize)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let id = JobId::new(id);
    let located = state.torrent.inspector().locate_file(&id, index).await?;

    let mut file = match tokio::fs::File::open(&located.path).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("File not found"));
        }
        Err(err) => {
            warn!(job_id = %id, path = %located.path.display(), error = %err, "failed to open file for streaming");
            return Err(ApiError::internal("failed to open file"));
        }
    };
    let total = file
        .metadata()
        .await
        .map_err(|err| {
            warn!(job_id = %id, error = %err, "failed to stat file for streaming");
            ApiError::internal("failed to read file metadata")
        })?
        .len();

    let requested = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_range_header);

    let Some(range) = requested else {
        debug!(job_id = %id, index, total, "streaming full file");
        let body = Body::from_stream(ReaderStream::new(file));
        return Ok(file_response(StatusCode::OK, total, None, body));
    };

    let Some((start, end)) = resolve_range(range, total) else {
        return Ok((
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{total}"))],
        )
            .into_response());
    };

    file.seek(SeekFrom::Start(start)).await.map_err(|err| {
        warn!(job_id = %id, error = %err, "failed to seek file for streaming");
        ApiError::internal("failed to seek file")
    })?;
    let length = end - start + 1;
    debug!(job_id = %id, index, start, end, total, "streaming file range");
    let body = Body::from_stream(ReaderStream::new(file.take(length)));
    Ok(file_response(
        StatusCode::PARTIAL_CONTENT,
        length,
        Some(format!("bytes {start}-{end}/{total}")),
        body,
    ))
}

fn file_response(
    status: StatusCode,
    length: u64,
    content_range: Option<String>,
    body: Body,
) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(STREAM_CONTENT_TYPE));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Some(value) = content_range.and_then(|value| HeaderValue::from_str(&value).ok()) {
        headers.insert(header::CONTENT_RANGE, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_forms() {
        assert_eq!(
            parse_range_header("bytes=0-99"),
            Some(ParsedRange::StartEnd {
                start: 0,
                end_inclusive: Some(99)
            })
        );
        assert_eq!(
            parse_range_header("bytes=100-"),
            Some(ParsedRange::StartEnd {
                start: 100,
                end_inclusive: None
            })
        );
        assert_eq!(
            parse_range_header("bytes=-500"),
            Some(ParsedRange::Suffix { len: 500 })
        );
    }

    #[test]
    fn ignores_unsupported_forms() {
        for value in [
            "items=0-1",
            "bytes=0-1,4-5",
            "bytes=abc-",
            "bytes=",
            "bytes=-x",
            "bytes=50-10",
        ] {
            assert_eq!(parse_range_header(value), None, "{value}");
        }
    }

    #[test]
    fn resolves_against_file_length() {
        let range = |value: &str| parse_range_header(value).expect("parses");
        assert_eq!(resolve_range(range("bytes=0-99"), 1000), Some((0, 99)));
        assert_eq!(resolve_range(range("bytes=900-2000"), 1000), Some((900, 999)));
        assert_eq!(resolve_range(range("bytes=10-"), 1000), Some((10, 999)));
        assert_eq!(resolve_range(range("bytes=-100"), 1000), Some((900, 999)));
        assert_eq!(resolve_range(range("bytes=-5000"), 1000), Some((0, 999)));
    }

    #[test]
    fn unsatisfiable_ranges_resolve_to_none() {
        let range = |value: &str| parse_range_header(value).expect("parses");
        assert_eq!(resolve_range(range("bytes=1000-"), 1000), None);
        assert_eq!(resolve_range(range("bytes=-0"), 1000), None);
        assert_eq!(resolve_range(range("bytes=0-"), 0), None);
    }
}
