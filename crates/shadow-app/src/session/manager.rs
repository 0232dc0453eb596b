//! The session manager: one engine, one registry, every command.
//!
//! # Design
//! - The engine lives in a slot behind an async `RwLock`. Commands hold a read
//!   guard for their engine calls; a configuration swap takes the write guard,
//!   so commands issued mid-swap wait for it to finish.
//! - Removal runs as its own task holding a cloned engine handle, never the
//!   guard, so a slow teardown cannot hold up a swap or other jobs. Dropping
//!   the caller's future does not interrupt it.
//! - Each engine instance gets a generation number. Events are stamped with it
//!   and anything from an older generation is dropped on arrival.
//! - Engine events are processed sequentially by a single task.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use shadow_api::ConfigFacade;
use shadow_config::{ConfigStore, PersistedJob, SessionConfig, SessionState, validate_config};
use shadow_events::{
    Event, EventBus, JobId, JobState, Snapshot, SnapshotSink, SubscriptionSink, UiSink,
};
use shadow_telemetry::Metrics;
use shadow_torrent_core::{
    AddJobOptions, Descriptor, EngineAddRequest, EngineCapabilities, EngineEnvelope, EngineEvent,
    EngineEventSender, EngineFactory, EngineJobStatus, JobInspector, JobWorkflow, LocatedFile,
    RemovalReport, RestoreReport, SessionError, SessionResult, TeardownStage, TeardownWarning,
    TransferEngine,
};
use tokio::sync::{RwLock, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::broadcast::{BroadcastHandle, BroadcastSource, spawn_broadcaster};
use super::lifecycle::{GraceSignals, GraceWait, JobLocks, Teardown, check_transition};
use super::persist::PersistThrottle;
use super::registry::{JobRecord, JobRegistry, Observation};
use super::restore::{RestoreContext, restore_jobs};
use super::snapshot::build_snapshot;

struct EngineSlot {
    engine: Option<Arc<dyn TransferEngine>>,
    capabilities: EngineCapabilities,
}

impl EngineSlot {
    fn live(&self) -> SessionResult<&Arc<dyn TransferEngine>> {
        self.engine.as_ref().ok_or(SessionError::EngineUnavailable)
    }
}

struct SessionInner {
    store: ConfigStore,
    factory: Arc<dyn EngineFactory>,
    config: RwLock<SessionConfig>,
    engine: RwLock<EngineSlot>,
    generation: AtomicU64,
    engine_ready: AtomicBool,
    event_tx: mpsc::UnboundedSender<EngineEnvelope>,
    registry: JobRegistry,
    locks: JobLocks,
    grace: GraceSignals,
    events: EventBus,
    metrics: Metrics,
    ui: Arc<UiSink>,
    subscriptions: Arc<SubscriptionSink>,
    throttle: Mutex<PersistThrottle>,
    persist_lock: tokio::sync::Mutex<()>,
    retained: Mutex<Vec<PersistedJob>>,
    last_restore: Mutex<RestoreReport>,
    broadcaster: Mutex<Option<BroadcastHandle>>,
    shutting_down: AtomicBool,
}

/// Owns the transfer engine and the job registry, and executes every command.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Construct the engine from the stored configuration, restore persisted
    /// jobs, and start the broadcaster.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Engine`] when the engine cannot be constructed.
    #[instrument(name = "session.initialize", skip_all)]
    pub async fn initialize(
        store: ConfigStore,
        factory: Arc<dyn EngineFactory>,
        events: EventBus,
        metrics: Metrics,
    ) -> SessionResult<Self> {
        let config = store.config().await;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(SessionInner {
            store,
            factory,
            throttle: Mutex::new(PersistThrottle::new(config.tuning.persist_interval())),
            config: RwLock::new(config.clone()),
            engine: RwLock::new(EngineSlot {
                engine: None,
                capabilities: EngineCapabilities::default(),
            }),
            generation: AtomicU64::new(0),
            engine_ready: AtomicBool::new(false),
            event_tx,
            registry: JobRegistry::default(),
            locks: JobLocks::default(),
            grace: GraceSignals::default(),
            events,
            metrics,
            ui: Arc::new(UiSink::new()),
            subscriptions: Arc::new(SubscriptionSink::new()),
            persist_lock: tokio::sync::Mutex::new(()),
            retained: Mutex::new(Vec::new()),
            last_restore: Mutex::new(RestoreReport::default()),
            broadcaster: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        });
        spawn_event_loop(Arc::downgrade(&inner), event_rx);

        {
            let mut slot = inner.engine.write().await;
            inner.start_engine(&mut slot, &config).await?;
            inner.restore_persisted(&slot, &HashSet::new()).await;
        }
        inner.persist_now("session.initialize").await;

        let sinks: Vec<Arc<dyn SnapshotSink>> =
            vec![inner.ui.clone(), inner.subscriptions.clone()];
        let handle = spawn_broadcaster(
            Arc::downgrade(&inner),
            sinks,
            config.tuning.broadcast_interval(),
            inner.metrics.clone(),
        );
        handle.trigger();
        *inner
            .broadcaster
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(Self { inner })
    }

    /// Admit a new job and return its fingerprint.
    ///
    /// # Errors
    ///
    /// Fails on invalid input, duplicates, engine refusal, or a missing engine.
    pub async fn add_job(
        &self,
        descriptor: Descriptor,
        options: AddJobOptions,
    ) -> SessionResult<JobId> {
        let result = self.inner.add_job(descriptor, options).await;
        self.inner.record_command("add", &result);
        result
    }

    /// Tear a job down and unregister it.
    ///
    /// The removal runs on its own task and completes even when the returned
    /// future is dropped. Records the engine refused at restore are removed
    /// from the persisted session directly.
    ///
    /// # Errors
    ///
    /// Fails when the id is unknown or the job cannot enter `Removing`.
    /// Teardown stage failures are reported as warnings instead.
    pub async fn remove_job(&self, id: &JobId, delete_files: bool) -> SessionResult<RemovalReport> {
        let inner = Arc::clone(&self.inner);
        let job_id = id.clone();
        let removal = tokio::spawn(async move {
            let result = inner.remove_job(&job_id, delete_files).await;
            inner.record_command("remove", &result);
            result
        });
        match removal.await {
            Ok(result) => result,
            Err(err) => {
                error!(job_id = %id, error = %err, "removal task did not complete");
                Err(SessionError::engine(
                    "remove",
                    Some(id.clone()),
                    anyhow::Error::new(err),
                ))
            }
        }
    }

    /// Pause a job. Pausing a paused job is a no-op.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids, unsupported engines, or engine failures; the
    /// pause flag is left untouched on failure.
    pub async fn pause_job(&self, id: &JobId) -> SessionResult<()> {
        let result = self.inner.pause_job(id).await;
        self.inner.record_command("pause", &result);
        result
    }

    /// Resume a paused job. Resuming a running job is a no-op.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids, unsupported engines, or engine failures.
    pub async fn resume_job(&self, id: &JobId) -> SessionResult<()> {
        let result = self.inner.resume_job(id).await;
        self.inner.record_command("resume", &result);
        result
    }

    /// Sever every peer of a job and stop discovery.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids or when the engine supports neither peer
    /// disconnection nor pausing.
    pub async fn force_stop_job(&self, id: &JobId) -> SessionResult<()> {
        let result = self.inner.force_stop_job(id).await;
        self.inner.record_command("force_stop", &result);
        result
    }

    /// Current snapshot of every registered job.
    pub async fn get_all(&self) -> Vec<Snapshot> {
        self.inner.snapshots().await
    }

    /// Resolve the on-disk path of file `index` of job `id`.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids or indexes.
    pub async fn locate_file(&self, id: &JobId, index: usize) -> SessionResult<LocatedFile> {
        self.inner.locate_file(id, index).await
    }

    /// Active configuration.
    pub async fn config(&self) -> SessionConfig {
        self.inner.config.read().await.clone()
    }

    /// Validate and persist `config`, then replace the engine and restore jobs
    /// into the new instance.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, store failures, or when the new engine
    /// cannot be constructed; in the last case later commands report
    /// [`SessionError::EngineUnavailable`].
    pub async fn update_config(&self, config: SessionConfig) -> SessionResult<()> {
        let result = self.inner.update_config(config).await;
        self.inner.record_command("update_config", &result);
        result
    }

    /// Sink feeding the desktop window, when one is attached.
    #[must_use]
    pub fn ui_sink(&self) -> Arc<UiSink> {
        Arc::clone(&self.inner.ui)
    }

    /// Sink feeding remote snapshot subscribers.
    #[must_use]
    pub fn subscriptions(&self) -> Arc<SubscriptionSink> {
        Arc::clone(&self.inner.subscriptions)
    }

    /// Domain event bus shared with the HTTP surface.
    #[must_use]
    pub fn events(&self) -> EventBus {
        self.inner.events.clone()
    }

    /// Counts from the most recent restore pass.
    #[must_use]
    pub fn last_restore_report(&self) -> RestoreReport {
        *self
            .inner
            .last_restore
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Generation of the current engine instance.
    #[must_use]
    pub fn engine_generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Persist the session, stop broadcasting, and destroy the engine.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let handle = self
            .inner
            .broadcaster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.stop().await;
        }

        let mut slot = self.inner.engine.write().await;
        self.inner.persist_now("session.shutdown").await;
        self.inner.engine_ready.store(false, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(engine) = slot.engine.take() {
            if let Err(err) = engine.destroy_all().await {
                warn!(error = %err, "engine shutdown reported an error");
            }
        }
        info!("session shut down");
    }
}

fn spawn_event_loop(inner: Weak<SessionInner>, mut rx: mpsc::UnboundedReceiver<EngineEnvelope>) {
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.handle_engine_event(envelope).await;
        }
        debug!("engine event loop stopped");
    });
}

fn validate_options(options: &AddJobOptions) -> SessionResult<()> {
    if options
        .target_path
        .as_ref()
        .is_some_and(|path| path.as_os_str().is_empty())
    {
        return Err(SessionError::InvalidOptions {
            field: "target_path",
            reason: "must not be empty",
        });
    }
    if let Some(name) = &options.name_hint {
        let plain = !name.trim().is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if !plain {
            return Err(SessionError::InvalidOptions {
                field: "name_hint",
                reason: "must be a plain file name",
            });
        }
    }
    Ok(())
}

impl SessionInner {
    fn record_command<T>(&self, command: &'static str, result: &SessionResult<T>) {
        self.metrics.inc_command(command, result.is_ok());
        if let Err(err) = result {
            debug!(command, kind = err.kind(), error = %err.detail(), "session command failed");
        }
    }

    fn broadcast(&self) {
        if let Some(handle) = self
            .broadcaster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            handle.trigger();
        }
    }

    async fn refresh_job_gauge(&self) {
        self.metrics.set_jobs_active(self.registry.len().await);
    }

    async fn start_engine(&self, slot: &mut EngineSlot, config: &SessionConfig) -> SessionResult<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.set_engine_generation(generation);
        let sender = EngineEventSender::new(generation, self.event_tx.clone());
        let engine = self
            .factory
            .construct(&config.engine_runtime(), sender)
            .await
            .map_err(|err| SessionError::engine("engine.construct", None, err))?;
        slot.capabilities = engine.capabilities();
        slot.engine = Some(engine);
        self.engine_ready.store(true, Ordering::SeqCst);
        info!(generation, capabilities = ?slot.capabilities, "engine ready");
        Ok(())
    }

    async fn restore_persisted(&self, slot: &EngineSlot, exclude: &HashSet<JobId>) {
        let Some(engine) = slot.engine.as_deref() else {
            return;
        };
        let jobs = self.store.session().await.jobs;
        let ctx = RestoreContext {
            engine,
            capabilities: slot.capabilities,
            registry: &self.registry,
            events: &self.events,
            metrics: &self.metrics,
        };
        let outcome = restore_jobs(&ctx, jobs, exclude).await;
        *self.retained.lock().unwrap_or_else(PoisonError::into_inner) = outcome.retained;
        *self
            .last_restore
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = outcome.report;
        self.refresh_job_gauge().await;
    }

    /// Write the registry to the store. Failures are logged, never returned:
    /// the in-memory session stays authoritative until the next write.
    async fn persist_now(&self, reason: &'static str) {
        if !self.engine_ready.load(Ordering::SeqCst) {
            debug!(reason, "engine unavailable; session write skipped");
            return;
        }
        let _write = self.persist_lock.lock().await;
        let mut jobs = self.registry.persisted().await;
        {
            let retained = self.retained.lock().unwrap_or_else(PoisonError::into_inner);
            let live: HashSet<&JobId> = jobs.iter().map(|job| &job.id).collect();
            let missing: Vec<PersistedJob> = retained
                .iter()
                .filter(|job| !live.contains(&job.id))
                .cloned()
                .collect();
            jobs.extend(missing);
        }

        match self.store.save_session(SessionState { jobs }).await {
            Ok(()) => {
                self.metrics.record_persist(true);
                self.throttle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .mark_written(Instant::now());
            }
            Err(err) => {
                self.metrics.record_persist(false);
                error!(reason, error = %err, "failed to persist session state");
            }
        }
    }

    async fn note_progress(&self) {
        let due = self
            .throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .note_activity(Instant::now());
        if due {
            self.persist_now("engine.progress").await;
        }
    }

    async fn handle_engine_event(self: Arc<Self>, envelope: EngineEnvelope) {
        let current = self.generation.load(Ordering::SeqCst);
        if envelope.generation != current {
            debug!(
                event_generation = envelope.generation,
                current, "dropping event from a previous engine instance"
            );
            return;
        }

        match envelope.event {
            EngineEvent::Added { job_id, name } => {
                let renamed = self
                    .registry
                    .update(&job_id, |record| {
                        if name.trim().is_empty() || record.name == name {
                            false
                        } else {
                            record.name = name;
                            true
                        }
                    })
                    .await
                    .unwrap_or(false);
                if renamed {
                    self.persist_now("engine.added").await;
                }
                self.broadcast();
            }
            EngineEvent::Progress { job_id } => {
                if self.registry.contains(&job_id).await {
                    self.note_progress().await;
                    self.broadcast();
                }
            }
            EngineEvent::Upload { job_id } => {
                let seeding = self
                    .registry
                    .update(&job_id, |record| {
                        let seeding = record.state == JobState::Completed;
                        if seeding {
                            record.state = JobState::Seeding;
                        }
                        seeding
                    })
                    .await;
                if seeding == Some(true) {
                    self.events.publish(Event::StateChanged {
                        job_id,
                        state: JobState::Seeding,
                    });
                }
                if seeding.is_some() {
                    self.note_progress().await;
                    self.broadcast();
                }
            }
            EngineEvent::Done { job_id } => {
                let outcome = self
                    .registry
                    .update(&job_id, |record| {
                        let first = !record.done;
                        record.done = true;
                        record.progress = 1.0;
                        let moved = matches!(record.state, JobState::Active | JobState::Requested);
                        if moved {
                            record.state = JobState::Completed;
                        }
                        (first, moved, record.name.clone())
                    })
                    .await;
                if let Some((first, moved, name)) = outcome {
                    if moved {
                        self.events.publish(Event::StateChanged {
                            job_id: job_id.clone(),
                            state: JobState::Completed,
                        });
                    }
                    if first {
                        info!(job_id = %job_id, "download complete");
                        self.events.publish(Event::JobCompleted { job_id, name });
                    }
                    self.persist_now("engine.done").await;
                    self.broadcast();
                }
            }
            EngineEvent::Error {
                job_id: Some(job_id),
                message,
                fatal: true,
            } => {
                let generation = envelope.generation;
                tokio::spawn(async move {
                    self.fail_job(job_id, message, generation).await;
                });
            }
            EngineEvent::Error { job_id, message, .. } => {
                warn!(job_id = ?job_id.as_ref().map(JobId::as_str), error = %message, "engine reported an error");
                self.events.publish(Event::EngineError { job_id, message });
                self.broadcast();
            }
        }
    }

    async fn fail_job(&self, id: JobId, message: String, generation: u64) {
        let _guard = self.locks.acquire(&id).await;
        let slot = self.engine.read().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let Some(record) = self.registry.get(&id).await else {
            return;
        };
        if check_transition(&id, record.state, JobState::Failed).is_err() {
            debug!(job_id = %id, state = %record.state, "fatal error ignored in current state");
            return;
        }

        error!(job_id = %id, error = %message, "job failed; purging from session");
        self.registry.remove(&id).await;
        self.events.publish(Event::StateChanged {
            job_id: id.clone(),
            state: JobState::Failed,
        });
        self.events.publish(Event::JobFailed {
            job_id: id.clone(),
            message,
        });
        if let Some(engine) = slot.engine.as_ref() {
            if let Err(err) = engine.destroy(&id).await {
                warn!(job_id = %id, error = %err, "engine could not destroy failed job");
            }
        }
        drop(slot);
        self.refresh_job_gauge().await;
        self.persist_now("job.failed").await;
        self.broadcast();
    }

    async fn add_job(&self, descriptor: Descriptor, options: AddJobOptions) -> SessionResult<JobId> {
        descriptor.validate()?;
        validate_options(&options)?;
        let target_path = match options.target_path {
            Some(path) => path,
            None => self.config.read().await.download_path.clone(),
        };

        let fingerprint = descriptor.fingerprint();
        let _guard = match &fingerprint {
            Some(id) => Some(self.locks.acquire(id).await),
            None => None,
        };
        if let Some(id) = &fingerprint {
            if self.registry.contains(id).await {
                return Err(SessionError::AlreadyExists { job_id: id.clone() });
            }
        }

        let slot = self.engine.read().await;
        let engine = slot.live()?;
        let handle = engine
            .add(EngineAddRequest {
                descriptor: descriptor.clone(),
                target_path: target_path.clone(),
                name_hint: options.name_hint.clone(),
            })
            .await
            .map_err(SessionError::rejected)?;
        let id = handle.id.clone();

        let mut record = JobRecord::new(id.clone(), descriptor, handle.name, target_path);
        check_transition(&id, record.state, JobState::Active)?;
        record.state = JobState::Active;
        if options.start_paused {
            if slot.capabilities.pause {
                match engine.pause(&id).await {
                    Ok(()) => {
                        record.paused = true;
                        record.state = JobState::Paused;
                    }
                    Err(err) => warn!(job_id = %id, error = %err, "could not start job paused"),
                }
            } else {
                warn!(job_id = %id, "engine cannot pause; job started running");
            }
        }
        drop(slot);

        let name = record.name.clone();
        let paused = record.paused;
        if !self.registry.insert(record).await {
            return Err(SessionError::AlreadyExists { job_id: id });
        }
        info!(job_id = %id, name = %name, paused, "job added");
        self.events.publish(Event::JobAdded {
            job_id: id.clone(),
            name,
        });
        self.events.publish(Event::StateChanged {
            job_id: id.clone(),
            state: JobState::Active,
        });
        if paused {
            self.events.publish(Event::StateChanged {
                job_id: id.clone(),
                state: JobState::Paused,
            });
        }
        self.refresh_job_gauge().await;
        self.persist_now("job.add").await;
        self.broadcast();
        Ok(id)
    }

    async fn remove_job(&self, id: &JobId, delete_files: bool) -> SessionResult<RemovalReport> {
        let registration = self.grace.register(id);
        let token = registration.token();
        let result = self.tear_down(id, delete_files, registration.wait).await;
        self.grace.finish(id, token);
        result
    }

    async fn tear_down(
        &self,
        id: &JobId,
        delete_files: bool,
        wait: GraceWait,
    ) -> SessionResult<RemovalReport> {
        let _guard = self.locks.acquire(id).await;
        let Some(record) = self.registry.get(id).await else {
            return self.drop_retained(id).await;
        };
        check_transition(id, record.state, JobState::Removing)?;

        let (engine, capabilities) = {
            let slot = self.engine.read().await;
            (Arc::clone(slot.live()?), slot.capabilities)
        };
        self.registry
            .update(id, |record| record.state = JobState::Removing)
            .await;
        self.events.publish(Event::StateChanged {
            job_id: id.clone(),
            state: JobState::Removing,
        });
        self.broadcast();

        let teardown = Teardown {
            engine,
            capabilities,
            id: id.clone(),
            name: record.name.clone(),
            target_path: record.target_path.clone(),
            already_paused: record.paused,
            delete_files,
            grace_period: self.config.read().await.tuning.grace_period(),
        };
        let warnings = match tokio::spawn(teardown.run(wait)).await {
            Ok(warnings) => warnings,
            Err(err) => vec![TeardownWarning::new(TeardownStage::Task, err.to_string())],
        };

        for warning in &warnings {
            warn!(job_id = %id, stage = warning.stage.as_str(), warning = %warning, "teardown warning");
            self.events.publish(Event::TeardownWarning {
                job_id: id.clone(),
                stage: warning.stage.as_str().to_string(),
                message: warning.to_string(),
            });
        }
        self.registry.remove(id).await;
        self.events.publish(Event::StateChanged {
            job_id: id.clone(),
            state: JobState::Removed,
        });
        self.events.publish(Event::JobRemoved {
            job_id: id.clone(),
            warnings: warnings.iter().map(ToString::to_string).collect(),
        });
        info!(job_id = %id, delete_files, warnings = warnings.len(), "job removed");
        self.metrics.add_teardown_warnings(warnings.len());
        self.refresh_job_gauge().await;
        self.persist_now("job.remove").await;
        self.broadcast();
        Ok(RemovalReport { warnings })
    }

    /// Forget a persisted record the engine refused at restore. It has no
    /// engine resources, so there is nothing to tear down.
    async fn drop_retained(&self, id: &JobId) -> SessionResult<RemovalReport> {
        let dropped = {
            let mut retained = self.retained.lock().unwrap_or_else(PoisonError::into_inner);
            let before = retained.len();
            retained.retain(|job| &job.id != id);
            retained.len() != before
        };
        if !dropped {
            return Err(SessionError::NotFound { job_id: id.clone() });
        }
        info!(job_id = %id, "unrestored job record removed");
        self.events.publish(Event::JobRemoved {
            job_id: id.clone(),
            warnings: Vec::new(),
        });
        self.persist_now("job.remove").await;
        Ok(RemovalReport::default())
    }

    async fn pause_job(&self, id: &JobId) -> SessionResult<()> {
        let _guard = self.locks.acquire(id).await;
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| SessionError::NotFound { job_id: id.clone() })?;
        if record.paused {
            return Ok(());
        }
        check_transition(id, record.state, JobState::Paused)?;

        let slot = self.engine.read().await;
        let engine = slot.live()?;
        if !slot.capabilities.pause {
            return Err(SessionError::Unsupported { operation: "pause" });
        }
        engine
            .pause(id)
            .await
            .map_err(|err| SessionError::engine("pause", Some(id.clone()), err))?;
        drop(slot);

        self.registry
            .update(id, |record| {
                record.paused = true;
                record.state = JobState::Paused;
            })
            .await;
        self.events.publish(Event::StateChanged {
            job_id: id.clone(),
            state: JobState::Paused,
        });
        self.persist_now("job.pause").await;
        self.broadcast();
        Ok(())
    }

    async fn resume_job(&self, id: &JobId) -> SessionResult<()> {
        let _guard = self.locks.acquire(id).await;
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| SessionError::NotFound { job_id: id.clone() })?;
        if !record.paused {
            return Ok(());
        }
        let target = if record.done {
            JobState::Completed
        } else {
            JobState::Active
        };
        check_transition(id, record.state, target)?;

        let slot = self.engine.read().await;
        let engine = slot.live()?;
        if !slot.capabilities.resume {
            return Err(SessionError::Unsupported {
                operation: "resume",
            });
        }
        engine
            .resume(id)
            .await
            .map_err(|err| SessionError::engine("resume", Some(id.clone()), err))?;
        drop(slot);

        self.registry
            .update(id, |record| {
                record.paused = false;
                record.force_stopped = false;
                record.state = target;
            })
            .await;
        self.events.publish(Event::StateChanged {
            job_id: id.clone(),
            state: target,
        });
        self.persist_now("job.resume").await;
        self.broadcast();
        Ok(())
    }

    async fn force_stop_job(&self, id: &JobId) -> SessionResult<()> {
        if self.grace.cancel(id) {
            info!(job_id = %id, "force-stop cut short a pending teardown");
            return Ok(());
        }

        let _guard = self.locks.acquire(id).await;
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| SessionError::NotFound { job_id: id.clone() })?;
        if record.force_stopped || record.state == JobState::Removing {
            return Ok(());
        }
        if record.state != JobState::Paused {
            check_transition(id, record.state, JobState::Paused)?;
        }

        let slot = self.engine.read().await;
        let engine = slot.live()?;
        let capabilities = slot.capabilities;
        if !capabilities.disconnect_peers && !capabilities.pause {
            return Err(SessionError::Unsupported {
                operation: "force_stop",
            });
        }
        if capabilities.disconnect_peers {
            engine
                .disconnect_peers(id)
                .await
                .map_err(|err| SessionError::engine("disconnect_peers", Some(id.clone()), err))?;
        }
        // Disconnecting peers does not halt the transfer by itself.
        if capabilities.pause && !record.paused {
            engine
                .pause(id)
                .await
                .map_err(|err| SessionError::engine("pause", Some(id.clone()), err))?;
        }
        drop(slot);

        self.registry
            .update(id, |record| {
                record.paused = true;
                record.force_stopped = true;
                record.state = JobState::Paused;
            })
            .await;
        if record.state != JobState::Paused {
            self.events.publish(Event::StateChanged {
                job_id: id.clone(),
                state: JobState::Paused,
            });
        }
        info!(job_id = %id, "job force-stopped");
        self.persist_now("job.force_stop").await;
        self.broadcast();
        Ok(())
    }

    async fn snapshots(&self) -> Vec<Snapshot> {
        let records = self.registry.list().await;
        if records.is_empty() {
            return Vec::new();
        }
        let statuses: Vec<EngineJobStatus> = {
            let slot = self.engine.read().await;
            match slot.engine.as_ref() {
                Some(engine) => engine.list().await.unwrap_or_else(|err| {
                    debug!(error = %err, "engine status unavailable for snapshot");
                    Vec::new()
                }),
                None => Vec::new(),
            }
        };

        let snapshots: Vec<Snapshot> = records
            .iter()
            .map(|record| {
                let status = statuses.iter().find(|status| status.id == record.id);
                build_snapshot(record, status)
            })
            .collect();
        let progressed = self
            .registry
            .observe(
                snapshots
                    .iter()
                    .map(|snapshot| Observation {
                        id: snapshot.id.clone(),
                        downloaded_bytes: snapshot.downloaded_bytes,
                        progress: snapshot.progress,
                    })
                    .collect(),
            )
            .await;
        if progressed {
            self.throttle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .mark_dirty();
        }
        snapshots
    }

    async fn locate_file(&self, id: &JobId, index: usize) -> SessionResult<LocatedFile> {
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| SessionError::NotFound { job_id: id.clone() })?;
        let slot = self.engine.read().await;
        let status = slot
            .live()?
            .get(id)
            .await
            .map_err(|err| SessionError::engine("get", Some(id.clone()), err))?
            .ok_or_else(|| SessionError::NotFound { job_id: id.clone() })?;
        let file = status
            .files
            .get(index)
            .filter(|file| {
                !file
                    .path
                    .components()
                    .any(|c| !matches!(c, std::path::Component::Normal(_)))
            })
            .ok_or_else(|| SessionError::FileNotFound {
                job_id: id.clone(),
                index,
            })?;
        Ok(LocatedFile {
            job_id: id.clone(),
            index,
            name: file.path.to_string_lossy().into_owned(),
            path: record.target_path.join(&file.path),
            size: file.size,
        })
    }

    #[instrument(name = "session.update_config", skip_all)]
    async fn update_config(&self, config: SessionConfig) -> SessionResult<()> {
        validate_config(&config).map_err(SessionError::invalid_config)?;

        let mut slot = self.engine.write().await;
        // Teardowns in flight finish against the old engine; cut their grace
        // waits short and keep their records out of the new one.
        let removing: HashSet<JobId> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|record| record.state == JobState::Removing)
            .map(|record| record.id)
            .collect();
        for id in &removing {
            self.grace.cancel(id);
        }
        self.persist_now("config.before_swap").await;
        self.store
            .set_config(config.clone())
            .await
            .map_err(|err| SessionError::persistence("config.save", err))?;
        *self.config.write().await = config.clone();
        self.throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_interval(config.tuning.persist_interval());

        self.engine_ready.store(false, Ordering::SeqCst);
        if let Some(previous) = slot.engine.take() {
            if let Err(err) = previous.destroy_all().await {
                warn!(error = %err, "previous engine reported an error while shutting down");
            }
        }
        let dropped = self.registry.clear().await;
        debug!(dropped, "registry cleared for engine swap");

        if let Err(err) = self.start_engine(&mut slot, &config).await {
            error!(error = %err.detail(), "engine reconstruction failed; commands unavailable");
            self.events.publish(Event::HealthChanged {
                degraded: vec!["engine".to_string()],
            });
            self.refresh_job_gauge().await;
            self.broadcast();
            return Err(err);
        }
        self.restore_persisted(&slot, &removing).await;
        let generation = self.generation.load(Ordering::SeqCst);
        drop(slot);

        if let Some(handle) = self
            .broadcaster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            handle.set_interval(config.tuning.broadcast_interval());
        }
        self.events.publish(Event::SettingsChanged {
            description: format!("configuration applied; engine generation {generation}"),
        });
        self.persist_now("config.after_swap").await;
        self.broadcast();
        Ok(())
    }
}

#[async_trait]
impl BroadcastSource for SessionInner {
    async fn snapshots(&self) -> Vec<Snapshot> {
        Self::snapshots(self).await
    }

    async fn on_tick(&self) {
        let dirty = self
            .throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_dirty();
        if dirty {
            self.persist_now("broadcast.flush").await;
        }
    }
}

#[async_trait]
impl JobWorkflow for SessionManager {
    async fn add_job(&self, descriptor: Descriptor, options: AddJobOptions) -> SessionResult<JobId> {
        Self::add_job(self, descriptor, options).await
    }

    async fn remove_job(&self, id: &JobId, delete_files: bool) -> SessionResult<RemovalReport> {
        Self::remove_job(self, id, delete_files).await
    }

    async fn pause_job(&self, id: &JobId) -> SessionResult<()> {
        Self::pause_job(self, id).await
    }

    async fn resume_job(&self, id: &JobId) -> SessionResult<()> {
        Self::resume_job(self, id).await
    }

    async fn force_stop_job(&self, id: &JobId) -> SessionResult<()> {
        Self::force_stop_job(self, id).await
    }
}

#[async_trait]
impl JobInspector for SessionManager {
    async fn get_all(&self) -> Vec<Snapshot> {
        Self::get_all(self).await
    }

    async fn locate_file(&self, id: &JobId, index: usize) -> SessionResult<LocatedFile> {
        Self::locate_file(self, id, index).await
    }
}

#[async_trait]
impl ConfigFacade for SessionManager {
    async fn current(&self) -> SessionConfig {
        self.config().await
    }

    async fn update(&self, config: SessionConfig) -> SessionResult<()> {
        self.update_config(config).await
    }
}
