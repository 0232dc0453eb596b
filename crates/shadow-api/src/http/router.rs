//! Router construction and server host for the API.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::{HeaderName, Method, Request, header::CONTENT_TYPE, header::RANGE},
    routing::{delete, get, post},
};
use shadow_events::{EventBus, SubscriptionSink};
use shadow_telemetry::{Metrics, build_sha};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{Span, info};

use crate::TorrentHandles;
use crate::config::SharedConfig;
use crate::error::{ApiServerError, ApiServerResult};
use crate::http::constants::{HEADER_LAST_EVENT_ID, HEADER_REQUEST_ID};
use crate::http::health::{health, metrics};
use crate::http::settings::{get_settings, put_settings};
use crate::http::sse::stream_events;
use crate::http::stream::stream_file;
use crate::http::telemetry::HttpMetricsLayer;
use crate::http::torrents::{action_job, create_job, delete_job, list_jobs};
use crate::state::ApiState;

/// Axum router wrapper that hosts the session API.
pub struct ApiServer {
    router: Router,
    state: Arc<ApiState>,
}

impl ApiServer {
    /// Wire the shared dependencies into application state and build the router.
    #[must_use]
    pub fn new(
        config: SharedConfig,
        events: EventBus,
        torrent: TorrentHandles,
        subscriptions: Arc<SubscriptionSink>,
        telemetry: Metrics,
    ) -> Self {
        let state = Arc::new(ApiState::new(
            config,
            events,
            torrent,
            subscriptions,
            telemetry.clone(),
        ));
        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([CONTENT_TYPE, RANGE, HeaderName::from_static(HEADER_LAST_EVENT_ID)]);
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(HEADER_REQUEST_ID)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    route = %request.uri().path(),
                    request_id = %request_id,
                    build_sha = %build_sha(),
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty
                )
            })
            .on_response(
                |response: &axum::response::Response, latency: Duration, span: &Span| {
                    span.record("status_code", response.status().as_u16());
                    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                    span.record("latency_ms", latency_ms);
                },
            );
        let layered = ServiceBuilder::new()
            .layer(shadow_telemetry::set_request_id_layer())
            .layer(shadow_telemetry::propagate_request_id_layer())
            .layer(trace_layer)
            .layer(HttpMetricsLayer::new(telemetry));

        let router = Self::build_router()
            .layer(cors_layer)
            .route_layer(layered)
            .with_state(Arc::clone(&state));

        Self { router, state }
    }

    fn build_router() -> Router<Arc<ApiState>> {
        Router::new()
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .route("/api/torrents", get(list_jobs).post(create_job))
            .route("/api/torrents/{id}", delete(delete_job))
            .route("/api/torrents/{id}/{action}", post(action_job))
            .route("/api/settings", get(get_settings).put(put_settings))
            .route("/api/events", get(stream_events))
            .route("/stream/{id}/{file_index}", get(stream_file))
    }

    /// Clone of the fully layered router, for embedding or in-process requests.
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind `addr` and serve until `shutdown` resolves. Open event streams are
    /// closed once shutdown begins so in-flight connections can drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound or the server fails.
    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> ApiServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ApiServerError::Bind { addr, source })?;
        let bound = listener.local_addr().unwrap_or(addr);
        info!(addr = %bound, "API listening");

        let state = self.state;
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                state.begin_shutdown();
            })
            .await
            .map_err(|source| ApiServerError::Serve { source })
    }
}
