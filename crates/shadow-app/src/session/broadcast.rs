//! Periodic and on-demand snapshot fan-out.
//!
//! One task owns the ticker. Explicit triggers that pile up while a batch is
//! being computed collapse into a single extra batch, and every sink sees
//! batches in the order they were computed.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use shadow_events::{Snapshot, SnapshotBatch, SnapshotSink};
use shadow_telemetry::Metrics;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace};

/// Something that can produce the current snapshot list.
#[async_trait]
pub(crate) trait BroadcastSource: Send + Sync {
    async fn snapshots(&self) -> Vec<Snapshot>;

    /// Runs after each timer-driven batch has been delivered.
    async fn on_tick(&self);
}

pub(crate) struct BroadcastHandle {
    trigger: mpsc::UnboundedSender<()>,
    interval: watch::Sender<Duration>,
    task: JoinHandle<()>,
}

impl BroadcastHandle {
    /// Request an immediate batch.
    pub(crate) fn trigger(&self) {
        let _ = self.trigger.send(());
    }

    pub(crate) fn set_interval(&self, interval: Duration) {
        self.interval.send_replace(interval);
    }

    pub(crate) async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

fn ticker(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Spawn the broadcaster. The task ends once `source` is dropped.
pub(crate) fn spawn_broadcaster<S>(
    source: Weak<S>,
    sinks: Vec<Arc<dyn SnapshotSink>>,
    interval: Duration,
    metrics: Metrics,
) -> BroadcastHandle
where
    S: BroadcastSource + 'static,
{
    let (trigger, mut triggers) = mpsc::unbounded_channel::<()>();
    let (interval_tx, mut interval_rx) = watch::channel(interval);

    let task = tokio::spawn(async move {
        let mut timer = ticker(interval);
        loop {
            let from_timer = tokio::select! {
                received = triggers.recv() => {
                    if received.is_none() {
                        break;
                    }
                    while triggers.try_recv().is_ok() {}
                    false
                }
                _ = timer.tick() => true,
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let period = *interval_rx.borrow_and_update();
                    debug!(interval_ms = period.as_millis(), "broadcast interval updated");
                    timer = ticker(period);
                    continue;
                }
            };

            let Some(source) = source.upgrade() else {
                break;
            };
            let batch: SnapshotBatch = Arc::new(source.snapshots().await);
            for sink in &sinks {
                trace!(sink = sink.name(), jobs = batch.len(), "delivering snapshot batch");
                sink.deliver(&batch);
            }
            metrics.inc_broadcast();
            if from_timer {
                source.on_tick().await;
            }
        }
        debug!("snapshot broadcaster stopped");
    });

    BroadcastHandle {
        trigger,
        interval: interval_tx,
        task,
    }
}
