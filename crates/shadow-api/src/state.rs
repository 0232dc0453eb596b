//! Shared state handed to every handler.

use std::future::Future;
use std::sync::Arc;

use shadow_events::{EventBus, SubscriptionSink};
use shadow_telemetry::Metrics;
use tokio::sync::watch;

use crate::TorrentHandles;
use crate::config::SharedConfig;

pub(crate) struct ApiState {
    pub(crate) config: SharedConfig,
    pub(crate) events: EventBus,
    pub(crate) torrent: TorrentHandles,
    pub(crate) subscriptions: Arc<SubscriptionSink>,
    pub(crate) telemetry: Metrics,
    shutdown: watch::Sender<bool>,
}

impl ApiState {
    pub(crate) fn new(
        config: SharedConfig,
        events: EventBus,
        torrent: TorrentHandles,
        subscriptions: Arc<SubscriptionSink>,
        telemetry: Metrics,
    ) -> Self {
        Self {
            config,
            events,
            torrent,
            subscriptions,
            telemetry,
            shutdown: watch::Sender::new(false),
        }
    }

    /// Ask long-lived responses (event streams) to finish so graceful
    /// shutdown can drain connections.
    pub(crate) fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Resolves once [`Self::begin_shutdown`] has been called.
    pub(crate) fn shutdown_requested(
        &self,
    ) -> impl Future<Output = ()> + Send + 'static + use<> {
        let mut receiver = self.shutdown.subscribe();
        async move {
            let _ = receiver.wait_for(|stopping| *stopping).await;
        }
    }
}
