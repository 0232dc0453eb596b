//! Subscription channel: snapshot lists plus domain notifications over SSE.
//!
//! Every broadcast tick arrives as a `torrents_update` event whose data is the
//! snapshot list. Bus events are forwarded under their kind with the bus id as
//! the SSE id, so reconnecting clients resume through `Last-Event-ID`.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::sse::{self, Sse},
};
use futures_util::{StreamExt, future, stream as futures_stream};
use serde::Deserialize;
use shadow_events::{EventBus, EventEnvelope, EventId, JobId, Snapshot, Subscription};
use tokio_stream::wrappers::ReceiverStream;
use tracing::error;

use crate::http::constants::{
    EVENT_KIND_WHITELIST, HEADER_LAST_EVENT_ID, SSE_KEEP_ALIVE_SECS, TORRENTS_UPDATE_EVENT,
};
use crate::http::errors::ApiError;
use crate::state::ApiState;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SseQuery {
    #[serde(default)]
    pub(crate) job: Option<String>,
    #[serde(default)]
    pub(crate) event: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SseFilter {
    pub(crate) job_ids: HashSet<JobId>,
    pub(crate) event_kinds: HashSet<String>,
}

impl SseFilter {
    fn wants_kind(&self, kind: &str) -> bool {
        self.event_kinds.is_empty() || self.event_kinds.contains(kind)
    }

    fn wants_job(&self, id: &JobId) -> bool {
        self.job_ids.is_empty() || self.job_ids.contains(id)
    }
}

pub(crate) async fn stream_events(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<SseQuery>,
) -> Result<Sse<impl futures_core::Stream<Item = Result<sse::Event, Infallible>> + Send>, ApiError>
{
    let last_id = headers
        .get(HEADER_LAST_EVENT_ID)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<EventId>().ok());
    let filter = Arc::new(build_sse_filter(&query)?);

    // Both sources subscribe here, before the response is returned.
    let subscription = filter
        .wants_kind(TORRENTS_UPDATE_EVENT)
        .then(|| state.subscriptions.subscribe());
    let updates = snapshot_sse_stream(subscription, Arc::clone(&filter));
    let events = event_sse_stream(state.events.clone(), last_id, filter);
    let merged = futures_stream::select(updates, events).take_until(state.shutdown_requested());

    Ok(Sse::new(merged).keep_alive(
        sse::KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS))
            .text("keep-alive"),
    ))
}

pub(crate) fn build_sse_filter(query: &SseQuery) -> Result<SseFilter, ApiError> {
    let mut filter = SseFilter::default();

    if let Some(jobs) = query.job.as_deref() {
        filter
            .job_ids
            .extend(split_comma_separated(jobs).into_iter().map(JobId::new));
    }

    if let Some(events) = query.event.as_deref() {
        for value in split_comma_separated(events) {
            if !EVENT_KIND_WHITELIST.contains(&value.as_str()) {
                return Err(ApiError::bad_request(format!(
                    "event filter '{value}' is not recognised"
                )));
            }
            filter.event_kinds.insert(value);
        }
    }

    Ok(filter)
}

fn split_comma_separated(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn matches_sse_filter(envelope: &EventEnvelope, filter: &SseFilter) -> bool {
    if !filter.wants_kind(envelope.event.kind()) {
        return false;
    }
    if filter.job_ids.is_empty() {
        return true;
    }
    envelope
        .event
        .job_id()
        .is_some_and(|id| filter.job_ids.contains(id))
}

fn snapshot_sse_stream(
    subscription: Option<Subscription>,
    filter: Arc<SseFilter>,
) -> impl futures_core::Stream<Item = Result<sse::Event, Infallible>> + Send {
    let batches = futures_stream::iter(subscription)
        .flat_map(|subscription| ReceiverStream::new(subscription.into_inner()));
    batches.filter_map(move |batch| {
        let filter = Arc::clone(&filter);
        async move {
            let visible: Vec<&Snapshot> = batch
                .iter()
                .filter(|snapshot| filter.wants_job(&snapshot.id))
                .collect();
            match serde_json::to_string(&visible) {
                Ok(payload) => Some(Ok(sse::Event::default()
                    .event(TORRENTS_UPDATE_EVENT)
                    .data(payload))),
                Err(err) => {
                    error!(error = %err, "failed to serialise snapshot list");
                    None
                }
            }
        }
    })
}

fn event_replay_stream(
    bus: EventBus,
    since: Option<EventId>,
) -> impl futures_core::Stream<Item = EventEnvelope> + Send {
    let mut events = bus.subscribe(since);
    stream! {
        while let Some(envelope) = events.next().await {
            yield envelope;
        }
    }
}

pub(crate) fn event_sse_stream(
    bus: EventBus,
    since: Option<EventId>,
    filter: Arc<SseFilter>,
) -> impl futures_core::Stream<Item = Result<sse::Event, Infallible>> + Send {
    event_replay_stream(bus, since)
        .filter(move |envelope| future::ready(matches_sse_filter(envelope, &filter)))
        .filter_map(|envelope| async move {
            match serde_json::to_string(&envelope) {
                Ok(payload) => Some(Ok(sse::Event::default()
                    .id(envelope.id.to_string())
                    .event(envelope.event.kind())
                    .data(payload))),
                Err(err) => {
                    error!(error = %err, "failed to serialise SSE event payload");
                    None
                }
            }
        })
}
