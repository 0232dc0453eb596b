//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges the session layer updates.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    commands_total: IntCounterVec,
    restore_outcomes_total: IntCounterVec,
    jobs_active: IntGauge,
    broadcasts_total: IntCounter,
    teardown_warnings_total: IntCounter,
    persist_writes_total: IntCounter,
    persist_failures_total: IntCounter,
    engine_generation: IntGauge,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Number of jobs currently registered.
    pub jobs_active: i64,
    /// Broadcast ticks delivered to sinks.
    pub broadcasts_total: u64,
    /// Non-fatal teardown problems recorded.
    pub teardown_warnings_total: u64,
    /// Successful session writes.
    pub persist_writes_total: u64,
    /// Failed session writes.
    pub persist_failures_total: u64,
    /// Current engine generation.
    pub engine_generation: i64,
}

fn collector<T>(name: &'static str, built: prometheus::Result<T>) -> Result<T> {
    built.map_err(|source| TelemetryError::Metric {
        name,
        stage: "built",
        source,
    })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::Metric {
            name,
            stage: "registered",
            source,
        })
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = collector(
            "http_requests_total",
            IntCounterVec::new(
                Opts::new("http_requests_total", "Total HTTP requests received"),
                &["route", "code"],
            ),
        )?;
        let commands_total = collector(
            "session_commands_total",
            IntCounterVec::new(
                Opts::new(
                    "session_commands_total",
                    "Session commands handled by outcome",
                ),
                &["command", "outcome"],
            ),
        )?;
        let restore_outcomes_total = collector(
            "session_restore_outcomes_total",
            IntCounterVec::new(
                Opts::new(
                    "session_restore_outcomes_total",
                    "Persisted jobs processed during restore by outcome",
                ),
                &["outcome"],
            ),
        )?;
        let jobs_active = collector(
            "session_jobs_active",
            IntGauge::with_opts(Opts::new("session_jobs_active", "Registered jobs")),
        )?;
        let broadcasts_total = collector(
            "session_broadcasts_total",
            IntCounter::with_opts(Opts::new(
                "session_broadcasts_total",
                "Snapshot batches delivered to sinks",
            )),
        )?;
        let teardown_warnings_total = collector(
            "session_teardown_warnings_total",
            IntCounter::with_opts(Opts::new(
                "session_teardown_warnings_total",
                "Non-fatal problems recorded while tearing down jobs",
            )),
        )?;
        let persist_writes_total = collector(
            "session_persist_writes_total",
            IntCounter::with_opts(Opts::new(
                "session_persist_writes_total",
                "Session state writes",
            )),
        )?;
        let persist_failures_total = collector(
            "session_persist_failures_total",
            IntCounter::with_opts(Opts::new(
                "session_persist_failures_total",
                "Session state writes that failed",
            )),
        )?;
        let engine_generation = collector(
            "engine_generation",
            IntGauge::with_opts(Opts::new(
                "engine_generation",
                "Generation of the live transfer engine",
            )),
        )?;

        register(&registry, "http_requests_total", &http_requests_total)?;
        register(&registry, "session_commands_total", &commands_total)?;
        register(
            &registry,
            "session_restore_outcomes_total",
            &restore_outcomes_total,
        )?;
        register(&registry, "session_jobs_active", &jobs_active)?;
        register(&registry, "session_broadcasts_total", &broadcasts_total)?;
        register(
            &registry,
            "session_teardown_warnings_total",
            &teardown_warnings_total,
        )?;
        register(&registry, "session_persist_writes_total", &persist_writes_total)?;
        register(
            &registry,
            "session_persist_failures_total",
            &persist_failures_total,
        )?;
        register(&registry, "engine_generation", &engine_generation)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                http_requests_total,
                commands_total,
                restore_outcomes_total,
                jobs_active,
                broadcasts_total,
                teardown_warnings_total,
                persist_writes_total,
                persist_failures_total,
                engine_generation,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Count a session command and whether it succeeded.
    pub fn inc_command(&self, command: &str, success: bool) {
        let outcome = if success { "ok" } else { "error" };
        self.inner
            .commands_total
            .with_label_values(&[command, outcome])
            .inc();
    }

    /// Count one restore outcome (`restored`, `skipped`, or `failed`).
    pub fn inc_restore_outcome(&self, outcome: &str) {
        self.inner
            .restore_outcomes_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Set the registered job gauge.
    pub fn set_jobs_active(&self, count: usize) {
        self.inner
            .jobs_active
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Increment the broadcast counter.
    pub fn inc_broadcast(&self) {
        self.inner.broadcasts_total.inc();
    }

    /// Add teardown warnings to the running total.
    pub fn add_teardown_warnings(&self, count: usize) {
        self.inner
            .teardown_warnings_total
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Record the outcome of a session write.
    pub fn record_persist(&self, success: bool) {
        if success {
            self.inner.persist_writes_total.inc();
        } else {
            self.inner.persist_failures_total.inc();
        }
    }

    /// Record the generation of the live engine.
    pub fn set_engine_generation(&self, generation: u64) {
        self.inner
            .engine_generation
            .set(i64::try_from(generation).unwrap_or(i64::MAX));
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::Render { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::RenderUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_active: self.inner.jobs_active.get(),
            broadcasts_total: self.inner.broadcasts_total.get(),
            teardown_warnings_total: self.inner.teardown_warnings_total.get(),
            persist_writes_total: self.inner.persist_writes_total.get(),
            persist_failures_total: self.inner.persist_failures_total.get(),
            engine_generation: self.inner.engine_generation.get(),
        }
    }
}
