//! `x-request-id` handling for the session HTTP surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::{HeaderValue, Request};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};

/// Issues `shadow-<n>` ids, unique for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct SequentialRequestId {
    next: Arc<AtomicU64>,
}

impl MakeRequestId for SequentialRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        HeaderValue::from_str(&format!("shadow-{id}"))
            .ok()
            .map(RequestId::new)
    }
}

/// Assigns an id to requests that arrive without one.
#[must_use]
pub fn set_request_id_layer() -> SetRequestIdLayer<SequentialRequestId> {
    SetRequestIdLayer::x_request_id(SequentialRequestId::default())
}

/// Copies the request id onto the response.
#[must_use]
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}
