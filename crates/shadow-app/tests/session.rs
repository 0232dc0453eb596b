use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use shadow_app::SessionManager;
use shadow_config::{ConfigStore, PersistedJob, SessionConfig, SessionState, SessionTuning};
use shadow_events::{Event, EventBus, EventStream, JobId, JobState, Snapshot};
use shadow_telemetry::Metrics;
use shadow_test_support::assert::eventually;
use shadow_test_support::fixtures::{magnet_uri, sample_hash};
use shadow_test_support::mocks::{EngineCall, ScriptedEngine, ScriptedFactory};
use shadow_torrent_core::{
    AddJobOptions, Descriptor, EngineCapabilities, EngineEvent, SessionError, TeardownStage,
};
use tempfile::TempDir;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    manager: SessionManager,
    factory: Arc<ScriptedFactory>,
    store: ConfigStore,
    events: EventBus,
    downloads: PathBuf,
    _dir: TempDir,
}

fn fast_config(downloads: &Path, grace_period_ms: u64) -> SessionConfig {
    SessionConfig {
        download_path: downloads.to_path_buf(),
        tuning: SessionTuning {
            grace_period_ms,
            broadcast_interval_ms: 50,
            persist_interval_ms: 100,
        },
        ..SessionConfig::default()
    }
}

async fn start(
    dir: TempDir,
    factory: Arc<ScriptedFactory>,
    grace_period_ms: u64,
    persisted: Vec<PersistedJob>,
) -> Result<Harness> {
    let downloads = dir.path().join("downloads");
    let store = ConfigStore::open_in_dir(dir.path().join("state")).await?;
    store.set_config(fast_config(&downloads, grace_period_ms)).await?;
    if !persisted.is_empty() {
        store.save_session(SessionState { jobs: persisted }).await?;
    }
    let events = EventBus::new();
    let manager = SessionManager::initialize(
        store.clone(),
        factory.clone(),
        events.clone(),
        Metrics::new()?,
    )
    .await?;
    Ok(Harness {
        manager,
        factory,
        store,
        events,
        downloads,
        _dir: dir,
    })
}

async fn harness() -> Result<Harness> {
    start(tempfile::tempdir()?, ScriptedFactory::new(), 20, Vec::new()).await
}

impl Harness {
    fn engine(&self) -> Result<Arc<ScriptedEngine>> {
        self.factory.last_engine().context("engine constructed")
    }

    async fn add(&self, seed: u8, name: &str) -> Result<JobId> {
        let descriptor = Descriptor::magnet(magnet_uri(&sample_hash(seed), name));
        Ok(self
            .manager
            .add_job(descriptor, AddJobOptions::default())
            .await?)
    }

    async fn snapshot(&self, id: &JobId) -> Option<Snapshot> {
        self.manager
            .get_all()
            .await
            .into_iter()
            .find(|snapshot| &snapshot.id == id)
    }

    async fn persisted(&self, id: &JobId) -> Option<PersistedJob> {
        self.store.session().await.get(id).cloned()
    }

    async fn wait_for_state(&self, id: &JobId, state: JobState) -> Result<()> {
        eventually(&format!("job reaches {state}"), WAIT, move || async move {
            self.snapshot(id)
                .await
                .is_some_and(|snapshot| snapshot.state == state)
        })
        .await
    }
}

async fn next_matching(
    stream: &mut EventStream,
    matches: impl Fn(&Event) -> bool,
) -> Result<Event> {
    timeout(WAIT, async {
        while let Some(envelope) = stream.next().await {
            if matches(&envelope.event) {
                return Ok(envelope.event);
            }
        }
        Err(anyhow!("event stream closed"))
    })
    .await?
}

#[tokio::test]
async fn added_job_appears_in_next_broadcast() -> Result<()> {
    let h = harness().await?;
    let mut subscription = h.manager.subscriptions().subscribe();
    let id = h.add(1, "album").await?;
    assert_eq!(id.as_str(), sample_hash(1));

    let snapshot = timeout(WAIT, async {
        while let Some(batch) = subscription.next().await {
            if let Some(found) = batch.iter().find(|s| s.id == id) {
                return Some(found.clone());
            }
        }
        None
    })
    .await?
    .context("batch containing the new job")?;
    assert!(snapshot.progress.abs() < f64::EPSILON);
    assert!(!snapshot.paused);
    assert_eq!(snapshot.state, JobState::Active);
    assert_eq!(snapshot.name, "album");
    assert!(h.persisted(&id).await.is_some(), "add persists immediately");
    Ok(())
}

#[tokio::test]
async fn duplicate_and_invalid_adds_are_rejected() -> Result<()> {
    let h = harness().await?;
    let id = h.add(2, "dup").await?;
    let err = h.add(2, "dup").await.expect_err("duplicate");
    let err = err.downcast::<SessionError>()?;
    assert!(matches!(err, SessionError::AlreadyExists { job_id } if job_id == id));

    let err = h
        .manager
        .add_job(
            Descriptor::magnet("magnet:?dn=missing-hash"),
            AddJobOptions::default(),
        )
        .await
        .expect_err("invalid descriptor");
    assert_eq!(err.kind(), "invalid_descriptor");

    h.factory.script().reject(&JobId::new(sample_hash(3)));
    let err = h.add(3, "refused").await.expect_err("engine refusal");
    assert_eq!(err.downcast::<SessionError>()?.kind(), "engine_rejected");
    assert_eq!(h.manager.get_all().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn start_paused_and_custom_target() -> Result<()> {
    let h = harness().await?;
    let target = h.downloads.join("custom");
    let id = h
        .manager
        .add_job(
            Descriptor::magnet(magnet_uri(&sample_hash(4), "later")),
            AddJobOptions {
                target_path: Some(target.clone()),
                start_paused: true,
                name_hint: None,
            },
        )
        .await?;
    let snapshot = h.snapshot(&id).await.context("snapshot")?;
    assert!(snapshot.paused);
    assert_eq!(snapshot.state, JobState::Paused);
    let persisted = h.persisted(&id).await.context("persisted")?;
    assert!(persisted.paused);
    assert_eq!(persisted.target_path, target);
    Ok(())
}

#[tokio::test]
async fn removing_unknown_job_reports_not_found() -> Result<()> {
    let h = harness().await?;
    let err = h
        .manager
        .remove_job(&JobId::new("unknown-id"), false)
        .await
        .expect_err("unknown id");
    assert_eq!(err.detail(), "Torrent not found");
    let err = h
        .manager
        .pause_job(&JobId::new("unknown-id"))
        .await
        .expect_err("unknown id");
    assert!(matches!(err, SessionError::NotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn pause_and_resume_are_idempotent_and_persisted() -> Result<()> {
    let h = harness().await?;
    let id = h.add(5, "pausable").await?;

    h.manager.pause_job(&id).await?;
    h.manager.pause_job(&id).await?;
    let engine = h.engine()?;
    assert_eq!(engine.count(&EngineCall::Pause(id.clone())), 1);
    assert!(h.persisted(&id).await.context("persisted")?.paused);
    assert!(h.snapshot(&id).await.context("snapshot")?.paused);

    h.manager.resume_job(&id).await?;
    h.manager.resume_job(&id).await?;
    assert_eq!(engine.count(&EngineCall::Resume(id.clone())), 1);
    assert!(!h.persisted(&id).await.context("persisted")?.paused);
    let snapshot = h.snapshot(&id).await.context("snapshot")?;
    assert!(!snapshot.paused);
    assert_eq!(snapshot.state, JobState::Active);
    Ok(())
}

#[tokio::test]
async fn failed_pause_leaves_flag_unchanged() -> Result<()> {
    let h = harness().await?;
    let id = h.add(6, "stubborn").await?;
    h.factory.script().fail_pause(true);

    let err = h.manager.pause_job(&id).await.expect_err("scripted failure");
    assert_eq!(err.kind(), "engine");
    assert!(!h.snapshot(&id).await.context("snapshot")?.paused);
    assert!(!h.persisted(&id).await.context("persisted")?.paused);
    Ok(())
}

#[tokio::test]
async fn unsupported_pause_is_reported() -> Result<()> {
    let factory = ScriptedFactory::new();
    factory.script().capabilities(EngineCapabilities::minimal());
    let h = start(tempfile::tempdir()?, factory, 20, Vec::new()).await?;
    let id = h.add(7, "minimal").await?;

    let err = h.manager.pause_job(&id).await.expect_err("no pause support");
    assert!(matches!(err, SessionError::Unsupported { operation: "pause" }));
    let err = h.manager.force_stop_job(&id).await.expect_err("no fallback");
    assert_eq!(err.kind(), "unsupported");

    // Removal still works without pause support.
    h.manager.remove_job(&id, false).await?;
    assert!(h.manager.get_all().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn force_stop_twice_succeeds() -> Result<()> {
    let h = harness().await?;
    let id = h.add(8, "noisy").await?;

    h.manager.force_stop_job(&id).await?;
    h.manager.force_stop_job(&id).await?;
    let engine = h.engine()?;
    assert_eq!(engine.count(&EngineCall::DisconnectPeers(id.clone())), 1);
    assert_eq!(engine.count(&EngineCall::Pause(id.clone())), 1);

    let snapshot = h.snapshot(&id).await.context("snapshot")?;
    assert!(snapshot.force_stopped);
    assert!(snapshot.paused);
    assert_eq!(snapshot.peer_count, 0);
    assert!(h.persisted(&id).await.context("persisted")?.paused);

    h.manager.resume_job(&id).await?;
    assert!(!h.snapshot(&id).await.context("snapshot")?.force_stopped);
    Ok(())
}

#[tokio::test]
async fn force_stop_falls_back_to_pause() -> Result<()> {
    let factory = ScriptedFactory::new();
    factory.script().capabilities(EngineCapabilities {
        disconnect_peers: false,
        ..EngineCapabilities::full()
    });
    let h = start(tempfile::tempdir()?, factory, 20, Vec::new()).await?;
    let id = h.add(9, "fallback").await?;

    h.manager.force_stop_job(&id).await?;
    let engine = h.engine()?;
    assert_eq!(engine.count(&EngineCall::Pause(id.clone())), 1);
    assert_eq!(engine.count(&EngineCall::DisconnectPeers(id.clone())), 0);
    assert!(h.snapshot(&id).await.context("snapshot")?.force_stopped);
    Ok(())
}

#[tokio::test]
async fn destroy_failure_still_unregisters() -> Result<()> {
    let h = harness().await?;
    let id = h.add(10, "sticky").await?;
    let mut stream = h.events.subscribe(None);
    h.factory.script().fail_destroy(true);

    let report = h.manager.remove_job(&id, false).await?;
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].stage, TeardownStage::Destroy);
    assert!(h.manager.get_all().await.is_empty());
    assert!(h.persisted(&id).await.is_none());

    let warning = next_matching(&mut stream, |e| matches!(e, Event::TeardownWarning { .. })).await?;
    assert!(matches!(warning, Event::TeardownWarning { stage, .. } if stage == "destroy"));
    let removed = next_matching(&mut stream, |e| matches!(e, Event::JobRemoved { .. })).await?;
    assert!(matches!(removed, Event::JobRemoved { warnings, .. } if warnings.len() == 1));
    Ok(())
}

#[tokio::test]
async fn remove_pauses_before_destroy_and_deletes_content() -> Result<()> {
    let h = harness().await?;
    let id = h.add(11, "content").await?;
    let job_dir = h.downloads.join("content");
    tokio::fs::create_dir_all(&job_dir).await?;
    let file = job_dir.join("content.bin");
    tokio::fs::write(&file, vec![0_u8; 64]).await?;
    let unrelated = h.downloads.join("unrelated.txt");
    tokio::fs::write(&unrelated, b"keep").await?;

    let report = h.manager.remove_job(&id, true).await?;
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert!(!file.exists());
    assert!(!job_dir.exists());
    assert!(unrelated.exists());

    let engine = h.engine()?;
    let calls = engine.calls();
    let pause_at = calls
        .iter()
        .position(|call| call == &EngineCall::Pause(id.clone()))
        .context("pause recorded")?;
    let destroy_at = calls
        .iter()
        .position(|call| call == &EngineCall::Destroy(id.clone()))
        .context("destroy recorded")?;
    assert!(pause_at < destroy_at);
    assert!(!engine.has_job(&id));
    Ok(())
}

#[tokio::test]
async fn remove_without_delete_keeps_content() -> Result<()> {
    let h = harness().await?;
    let id = h.add(12, "kept").await?;
    let file = h.downloads.join("kept").join("kept.bin");
    tokio::fs::create_dir_all(file.parent().context("parent")?).await?;
    tokio::fs::write(&file, b"data").await?;

    h.manager.remove_job(&id, false).await?;
    assert!(file.exists());
    Ok(())
}

#[tokio::test]
async fn force_stop_cuts_grace_period_short() -> Result<()> {
    let h = start(tempfile::tempdir()?, ScriptedFactory::new(), 60_000, Vec::new()).await?;
    let id = h.add(13, "slow").await?;

    let remover = {
        let manager = h.manager.clone();
        let id = id.clone();
        tokio::spawn(async move { manager.remove_job(&id, false).await })
    };
    h.wait_for_state(&id, JobState::Removing).await?;

    h.manager.force_stop_job(&id).await?;
    let report = timeout(WAIT, remover).await???;
    assert!(report.warnings.is_empty());
    assert!(h.manager.get_all().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn dropped_remove_call_still_completes() -> Result<()> {
    let h = start(tempfile::tempdir()?, ScriptedFactory::new(), 1000, Vec::new()).await?;
    let id = h.add(15, "abandoned").await?;

    let cut_short = timeout(Duration::from_millis(100), h.manager.remove_job(&id, false)).await;
    assert!(cut_short.is_err(), "grace period outlasts the caller");

    let (harness, job) = (&h, &id);
    eventually("removal finishes without its caller", WAIT, move || async move {
        harness.manager.get_all().await.is_empty() && harness.persisted(job).await.is_none()
    })
    .await?;
    assert_eq!(h.engine()?.count(&EngineCall::Destroy(id.clone())), 1);
    let err = h.manager.remove_job(&id, false).await.expect_err("already removed");
    assert!(matches!(err, SessionError::NotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn config_swap_does_not_wait_out_a_teardown() -> Result<()> {
    let h = start(tempfile::tempdir()?, ScriptedFactory::new(), 3000, Vec::new()).await?;
    let leaving = h.add(16, "leaving").await?;
    let staying = h.add(17, "staying").await?;

    let remover = {
        let manager = h.manager.clone();
        let id = leaving.clone();
        tokio::spawn(async move { manager.remove_job(&id, false).await })
    };
    h.wait_for_state(&leaving, JobState::Removing).await?;

    let swapper = {
        let manager = h.manager.clone();
        tokio::spawn(async move {
            let mut config = manager.config().await;
            config.max_connections = 42;
            manager.update_config(config).await
        })
    };
    timeout(Duration::from_millis(500), h.manager.get_all())
        .await
        .context("reads are not held up by the teardown")?;

    timeout(Duration::from_secs(1), swapper).await???;
    timeout(Duration::from_secs(1), remover).await???;

    let engines = h.factory.engines();
    assert_eq!(engines.len(), 2);
    assert!(!engines[1].has_job(&leaving));
    assert!(engines[1].has_job(&staying));
    let ids: Vec<JobId> = h.manager.get_all().await.into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![staying]);
    assert!(h.persisted(&leaving).await.is_none());
    Ok(())
}

#[tokio::test]
async fn removing_job_rejects_pause() -> Result<()> {
    let h = start(tempfile::tempdir()?, ScriptedFactory::new(), 300, Vec::new()).await?;
    let id = h.add(14, "leaving").await?;
    let remover = {
        let manager = h.manager.clone();
        let id = id.clone();
        tokio::spawn(async move { manager.remove_job(&id, false).await })
    };
    h.wait_for_state(&id, JobState::Removing).await?;

    // Serialized behind the teardown, then finds the job gone.
    let err = h.manager.pause_job(&id).await.expect_err("job removed");
    assert!(matches!(err, SessionError::NotFound { .. }));
    timeout(WAIT, remover).await???;
    Ok(())
}

#[tokio::test]
async fn done_event_completes_job_and_upload_marks_seeding() -> Result<()> {
    let h = harness().await?;
    let id = h.add(15, "finisher").await?;
    let mut stream = h.events.subscribe(None);
    let engine = h.engine()?;

    engine.set_downloaded(&id, shadow_test_support::mocks::SCRIPTED_FILE_SIZE);
    assert!(engine.emit(EngineEvent::Done { job_id: id.clone() }));
    let completed = next_matching(&mut stream, |e| matches!(e, Event::JobCompleted { .. })).await?;
    assert!(matches!(completed, Event::JobCompleted { name, .. } if name == "finisher"));

    let snapshot = h.snapshot(&id).await.context("snapshot")?;
    assert_eq!(snapshot.state, JobState::Completed);
    assert!(snapshot.done);
    assert!((snapshot.progress - 1.0).abs() < f64::EPSILON);
    let (store, job) = (&h.store, &id);
    eventually("completion persisted", WAIT, move || async move {
        store
            .session()
            .await
            .get(job)
            .is_some_and(PersistedJob::is_complete)
    })
    .await?;

    assert!(engine.emit(EngineEvent::Upload { job_id: id.clone() }));
    h.wait_for_state(&id, JobState::Seeding).await?;
    Ok(())
}

#[tokio::test]
async fn fatal_engine_error_purges_job() -> Result<()> {
    let h = harness().await?;
    let id = h.add(16, "doomed").await?;
    let mut stream = h.events.subscribe(None);
    let engine = h.engine()?;

    assert!(engine.emit(EngineEvent::Error {
        job_id: Some(id.clone()),
        message: "disk full".to_string(),
        fatal: true,
    }));
    let failed = next_matching(&mut stream, |e| matches!(e, Event::JobFailed { .. })).await?;
    assert!(matches!(failed, Event::JobFailed { message, .. } if message == "disk full"));
    let (harness, job, engine) = (&h, &id, &engine);
    eventually("job purged", WAIT, move || async move {
        harness.manager.get_all().await.is_empty()
    })
    .await?;
    eventually("engine destroy attempted", WAIT, move || async move {
        engine.count(&EngineCall::Destroy(job.clone())) == 1
    })
    .await?;
    eventually("record dropped from store", WAIT, move || async move {
        harness.persisted(job).await.is_none()
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn non_fatal_engine_error_is_published() -> Result<()> {
    let h = harness().await?;
    let id = h.add(17, "wobbly").await?;
    let mut stream = h.events.subscribe(None);
    assert!(h.engine()?.emit(EngineEvent::Error {
        job_id: Some(id.clone()),
        message: "tracker unreachable".to_string(),
        fatal: false,
    }));
    let event = next_matching(&mut stream, |e| matches!(e, Event::EngineError { .. })).await?;
    assert_eq!(event.job_id(), Some(&id));
    assert!(h.snapshot(&id).await.is_some(), "job stays registered");
    Ok(())
}

#[tokio::test]
async fn downloaded_bytes_never_decrease() -> Result<()> {
    let h = harness().await?;
    let id = h.add(18, "steady").await?;
    let engine = h.engine()?;

    engine.set_downloaded(&id, 600);
    assert_eq!(h.snapshot(&id).await.context("snapshot")?.downloaded_bytes, 600);
    engine.set_downloaded(&id, 100);
    let snapshot = h.snapshot(&id).await.context("snapshot")?;
    assert_eq!(snapshot.downloaded_bytes, 600);
    assert!(snapshot.progress > 0.5);
    Ok(())
}

#[tokio::test]
async fn locate_file_resolves_paths_under_target() -> Result<()> {
    let h = harness().await?;
    let id = h.add(19, "movie").await?;
    let located = h.manager.locate_file(&id, 0).await?;
    assert_eq!(located.name, "movie/movie.bin");
    assert_eq!(located.path, h.downloads.join("movie").join("movie.bin"));

    let err = h.manager.locate_file(&id, 3).await.expect_err("no such file");
    assert_eq!(err.kind(), "file_not_found");
    let err = h
        .manager
        .locate_file(&JobId::new("nope"), 0)
        .await
        .expect_err("no such job");
    assert_eq!(err.detail(), "Torrent not found");
    Ok(())
}

fn persisted_job(seed: u8, name: &str, target: &Path, paused: bool, progress: f64) -> PersistedJob {
    let hash = sample_hash(seed);
    PersistedJob {
        descriptor: Descriptor::magnet(magnet_uri(&hash, name)),
        id: JobId::new(hash),
        name: name.to_string(),
        paused,
        target_path: target.to_path_buf(),
        progress,
        restore_failures: 0,
    }
}

#[tokio::test]
async fn restore_skips_completed_jobs_without_artifacts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let downloads = dir.path().join("downloads");
    let finished_here = downloads.join("present");
    tokio::fs::create_dir_all(&finished_here).await?;
    let jobs = vec![
        persisted_job(20, "vanished", &downloads, false, 1.0),
        persisted_job(21, "partial", &downloads, true, 0.4),
        persisted_job(22, "present", &downloads, false, 1.0),
        persisted_job(21, "partial", &downloads, true, 0.4),
    ];
    let h = start(dir, ScriptedFactory::new(), 20, jobs).await?;

    let report = h.manager.last_restore_report();
    assert_eq!(report.restored, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);

    let vanished = JobId::new(sample_hash(20));
    let partial = JobId::new(sample_hash(21));
    let present = JobId::new(sample_hash(22));
    assert!(h.snapshot(&vanished).await.is_none());
    assert!(h.persisted(&vanished).await.is_none());

    let snapshot = h.snapshot(&partial).await.context("partial restored")?;
    assert!(snapshot.paused);
    assert_eq!(snapshot.state, JobState::Paused);
    assert_eq!(h.engine()?.count(&EngineCall::Pause(partial.clone())), 1);

    let snapshot = h.snapshot(&present).await.context("present restored")?;
    assert_eq!(snapshot.state, JobState::Completed);
    assert!(snapshot.done);
    Ok(())
}

#[tokio::test]
async fn refused_restore_records_are_retained() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let downloads = dir.path().join("downloads");
    let factory = ScriptedFactory::new();
    factory.script().reject(&JobId::new(sample_hash(23)));
    let jobs = vec![
        persisted_job(23, "refused", &downloads, false, 0.2),
        persisted_job(24, "fine", &downloads, false, 0.2),
    ];
    let h = start(dir, factory, 20, jobs).await?;

    let report = h.manager.last_restore_report();
    assert_eq!((report.restored, report.failed), (1, 1));
    assert!(h.snapshot(&JobId::new(sample_hash(23))).await.is_none());
    assert!(
        h.persisted(&JobId::new(sample_hash(23))).await.is_some(),
        "refused record kept for the next restore"
    );
    Ok(())
}

#[tokio::test]
async fn repeatedly_refused_records_are_dropped() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let downloads = dir.path().join("downloads");
    let refused = JobId::new(sample_hash(28));
    let factory = ScriptedFactory::new();
    factory.script().reject(&refused);
    let h = start(dir, factory, 20, vec![persisted_job(28, "stubborn", &downloads, false, 0.1)]).await?;
    let failures = |job: Option<PersistedJob>| job.map(|job| job.restore_failures);
    assert_eq!(failures(h.persisted(&refused).await), Some(1));

    let mut stream = h.events.subscribe(None);
    let mut config = h.manager.config().await;
    config.max_connections = 60;
    h.manager.update_config(config.clone()).await?;
    assert_eq!(failures(h.persisted(&refused).await), Some(2));

    config.max_connections = 61;
    h.manager.update_config(config).await?;
    assert!(h.persisted(&refused).await.is_none());
    let skipped = next_matching(&mut stream, |e| matches!(e, Event::RestoreSkipped { .. })).await?;
    assert!(matches!(skipped, Event::RestoreSkipped { job_id, .. } if job_id == refused));
    Ok(())
}

#[tokio::test]
async fn refused_record_can_be_removed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let downloads = dir.path().join("downloads");
    let refused = JobId::new(sample_hash(29));
    let factory = ScriptedFactory::new();
    factory.script().reject(&refused);
    let h = start(dir, factory, 20, vec![persisted_job(29, "unwanted", &downloads, false, 0.1)]).await?;
    assert!(h.persisted(&refused).await.is_some());

    let report = h.manager.remove_job(&refused, false).await?;
    assert!(report.warnings.is_empty());
    assert!(h.persisted(&refused).await.is_none());
    assert_eq!(h.engine()?.count(&EngineCall::Destroy(refused.clone())), 0);
    let err = h.manager.remove_job(&refused, false).await.expect_err("gone");
    assert!(matches!(err, SessionError::NotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn config_swap_preserves_ids_and_pause_flags() -> Result<()> {
    let h = harness().await?;
    let running = h.add(25, "running").await?;
    let paused = h.add(26, "paused").await?;
    h.manager.pause_job(&paused).await?;
    let mut stream = h.events.subscribe(None);

    let mut config = h.manager.config().await;
    config.max_connections = 77;
    h.manager.update_config(config).await?;

    assert_eq!(h.manager.engine_generation(), 2);
    let engines = h.factory.engines();
    assert_eq!(engines.len(), 2);
    assert_eq!(engines[0].count(&EngineCall::DestroyAll), 1);
    assert_eq!(engines[1].config().max_connections, 77);
    assert_eq!(h.store.config().await.max_connections, 77);

    let all = h.manager.get_all().await;
    let ids: Vec<&JobId> = all.iter().map(|s| &s.id).collect();
    assert_eq!(ids, vec![&running, &paused]);
    assert!(!h.snapshot(&running).await.context("running")?.paused);
    assert!(h.snapshot(&paused).await.context("paused")?.paused);
    next_matching(&mut stream, |e| matches!(e, Event::SettingsChanged { .. })).await?;
    Ok(())
}

#[tokio::test]
async fn invalid_config_is_refused_without_swapping() -> Result<()> {
    let h = harness().await?;
    let mut config = h.manager.config().await;
    config.max_connections = 0;
    let err = h.manager.update_config(config).await.expect_err("invalid");
    assert_eq!(err.kind(), "invalid_config");
    assert_eq!(h.factory.engines().len(), 1);
    assert_eq!(h.manager.engine_generation(), 1);
    Ok(())
}

#[tokio::test]
async fn stale_generation_events_are_dropped() -> Result<()> {
    let h = harness().await?;
    let id = h.add(27, "survivor").await?;
    let mut config = h.manager.config().await;
    config.enable_dht = false;
    h.manager.update_config(config).await?;

    let engines = h.factory.engines();
    let (old, new) = (&engines[0], &engines[1]);
    assert!(old.emit(EngineEvent::Done { job_id: id.clone() }));
    assert!(old.emit(EngineEvent::Error {
        job_id: Some(id.clone()),
        message: "stale".to_string(),
        fatal: true,
    }));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = h.snapshot(&id).await.context("still registered")?;
    assert_eq!(snapshot.state, JobState::Active);

    assert!(new.emit(EngineEvent::Done { job_id: id.clone() }));
    h.wait_for_state(&id, JobState::Completed).await?;
    Ok(())
}

#[tokio::test]
async fn failed_engine_construction_makes_commands_unavailable() -> Result<()> {
    let h = harness().await?;
    let id = h.add(28, "orphan").await?;
    h.factory.fail_next_construct();

    let mut config = h.manager.config().await;
    config.enable_utp = false;
    let err = h.manager.update_config(config).await.expect_err("construct fails");
    assert_eq!(err.kind(), "engine");

    let err = h.add(29, "nowhere").await.expect_err("no engine");
    assert!(matches!(
        err.downcast::<SessionError>()?,
        SessionError::EngineUnavailable
    ));
    assert!(
        h.persisted(&id).await.is_some(),
        "session survives for the next start"
    );
    Ok(())
}

#[tokio::test]
async fn progress_writes_are_throttled_then_flushed() -> Result<()> {
    let h = harness().await?;
    let id = h.add(30, "trickle").await?;
    let engine = h.engine()?;

    engine.set_downloaded(&id, 512);
    assert!(engine.emit(EngineEvent::Progress { job_id: id.clone() }));
    let (harness, job) = (&h, &id);
    eventually("progress reaches the store", WAIT, move || async move {
        harness
            .persisted(job)
            .await
            .is_some_and(|record| (record.progress - 0.5).abs() < 1e-9)
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn shutdown_persists_and_destroys_engine() -> Result<()> {
    let h = harness().await?;
    let id = h.add(31, "final").await?;
    h.manager.shutdown().await;
    h.manager.shutdown().await;

    assert_eq!(h.engine()?.count(&EngineCall::DestroyAll), 1);
    assert!(h.persisted(&id).await.is_some());
    let err = h.manager.pause_job(&id).await.expect_err("engine gone");
    assert!(matches!(err, SessionError::EngineUnavailable));
    Ok(())
}
