//! Scripted transfer engine and factory for session tests.
//!
//! Failure switches live in a [`Script`] shared by the factory and every engine
//! it builds, so a test can flip behaviour across a reinitialisation.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use shadow_events::JobId;
use shadow_torrent_core::{
    EngineAddRequest, EngineCapabilities, EngineEvent, EngineEventSender, EngineFactory,
    EngineFileStatus, EngineJobStatus, EngineRuntimeConfig, JobHandle, TransferEngine,
};

/// Size reported for the single file of every scripted job.
pub const SCRIPTED_FILE_SIZE: u64 = 1_024;

/// Engine call recorded by [`ScriptedEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    /// `add` with the resulting fingerprint.
    Add(JobId),
    /// `pause`.
    Pause(JobId),
    /// `resume`.
    Resume(JobId),
    /// `disconnect_peers`.
    DisconnectPeers(JobId),
    /// `destroy`.
    Destroy(JobId),
    /// `destroy_all`.
    DestroyAll,
}

/// Failure switches shared across engine generations.
#[derive(Debug, Default)]
pub struct Script {
    capabilities: Mutex<Option<EngineCapabilities>>,
    rejected: Mutex<HashSet<JobId>>,
    fail_pause: AtomicBool,
    fail_destroy: AtomicBool,
    destroy_delay_ms: AtomicU64,
}

impl Script {
    /// Make `add` refuse descriptors with this fingerprint.
    pub fn reject(&self, id: &JobId) {
        lock(&self.rejected).insert(id.clone());
    }

    /// Make `pause` fail.
    pub fn fail_pause(&self, fail: bool) {
        self.fail_pause.store(fail, Ordering::SeqCst);
    }

    /// Make `destroy` fail after recording the call.
    pub fn fail_destroy(&self, fail: bool) {
        self.fail_destroy.store(fail, Ordering::SeqCst);
    }

    /// Delay every `destroy` call.
    pub fn destroy_delay(&self, delay: Duration) {
        self.destroy_delay_ms.store(
            u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            Ordering::SeqCst,
        );
    }

    /// Capabilities reported by engines built after this call.
    pub fn capabilities(&self, capabilities: EngineCapabilities) {
        *lock(&self.capabilities) = Some(capabilities);
    }

    fn current_capabilities(&self) -> EngineCapabilities {
        lock(&self.capabilities).unwrap_or_default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory engine driven entirely by the test.
pub struct ScriptedEngine {
    script: Arc<Script>,
    capabilities: EngineCapabilities,
    events: EngineEventSender,
    config: EngineRuntimeConfig,
    jobs: Mutex<HashMap<JobId, EngineJobStatus>>,
    calls: Mutex<Vec<EngineCall>>,
    next_anonymous: AtomicU64,
}

impl ScriptedEngine {
    fn new(script: Arc<Script>, config: EngineRuntimeConfig, events: EngineEventSender) -> Self {
        let capabilities = script.current_capabilities();
        Self {
            script,
            capabilities,
            events,
            config,
            jobs: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_anonymous: AtomicU64::new(1),
        }
    }

    /// Generation stamped on this engine's events.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.events.generation()
    }

    /// Runtime configuration the engine was built with.
    #[must_use]
    pub fn config(&self) -> &EngineRuntimeConfig {
        &self.config
    }

    /// Push an event into the session's inbound queue.
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.events.send(event)
    }

    /// Every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        lock(&self.calls).clone()
    }

    /// Number of recorded calls equal to `call`.
    #[must_use]
    pub fn count(&self, call: &EngineCall) -> usize {
        lock(&self.calls).iter().filter(|seen| *seen == call).count()
    }

    /// Whether the engine still holds `id`.
    #[must_use]
    pub fn has_job(&self, id: &JobId) -> bool {
        lock(&self.jobs).contains_key(id)
    }

    /// Current status of `id`, if held.
    #[must_use]
    pub fn status(&self, id: &JobId) -> Option<EngineJobStatus> {
        lock(&self.jobs).get(id).cloned()
    }

    /// Set downloaded bytes for `id`, updating progress and the file entry.
    pub fn set_downloaded(&self, id: &JobId, downloaded: u64) {
        if let Some(status) = lock(&self.jobs).get_mut(id) {
            let downloaded = downloaded.min(status.total_bytes);
            status.downloaded_bytes = downloaded;
            status.progress = fraction(downloaded, status.total_bytes);
            status.done = downloaded == status.total_bytes;
            if let Some(file) = status.files.first_mut() {
                file.downloaded = downloaded;
            }
        }
    }

    /// Overwrite the whole status of a held job.
    pub fn set_status(&self, status: EngineJobStatus) {
        lock(&self.jobs).insert(status.id.clone(), status);
    }

    fn record(&self, call: EngineCall) {
        lock(&self.calls).push(call);
    }

    fn with_job<R>(&self, id: &JobId, apply: impl FnOnce(&mut EngineJobStatus) -> R) -> Result<R> {
        let mut jobs = lock(&self.jobs);
        let Some(status) = jobs.get_mut(id) else {
            bail!("unknown job {id}");
        };
        Ok(apply(status))
    }
}

#[expect(
    clippy::cast_precision_loss,
    reason = "scripted sizes stay far below 2^52"
)]
fn fraction(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[async_trait]
impl TransferEngine for ScriptedEngine {
    fn capabilities(&self) -> EngineCapabilities {
        self.capabilities
    }

    async fn add(&self, request: EngineAddRequest) -> Result<JobHandle> {
        let id = request.descriptor.fingerprint().unwrap_or_else(|| {
            let n = self.next_anonymous.fetch_add(1, Ordering::SeqCst);
            JobId::new(format!("{n:040x}"))
        });
        if lock(&self.script.rejected).contains(&id) {
            bail!("scripted rejection for {id}");
        }
        let name = request
            .name_hint
            .clone()
            .or_else(|| request.descriptor.display_name())
            .unwrap_or_else(|| id.to_string());

        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&id) {
            bail!("duplicate torrent {id}");
        }
        let mut status = EngineJobStatus::pending(id.clone(), name.clone(), request.target_path);
        status.total_bytes = SCRIPTED_FILE_SIZE;
        status.peer_count = 3;
        status.files = vec![EngineFileStatus {
            path: PathBuf::from(&name).join(format!("{name}.bin")),
            size: SCRIPTED_FILE_SIZE,
            downloaded: 0,
        }];
        jobs.insert(id.clone(), status);
        drop(jobs);

        self.record(EngineCall::Add(id.clone()));
        Ok(JobHandle { id, name })
    }

    async fn get(&self, id: &JobId) -> Result<Option<EngineJobStatus>> {
        Ok(self.status(id))
    }

    async fn list(&self) -> Result<Vec<EngineJobStatus>> {
        Ok(lock(&self.jobs).values().cloned().collect())
    }

    async fn pause(&self, id: &JobId) -> Result<()> {
        self.record(EngineCall::Pause(id.clone()));
        if !self.capabilities.pause {
            bail!("pause operation not supported by this engine");
        }
        if self.script.fail_pause.load(Ordering::SeqCst) {
            bail!("scripted pause failure");
        }
        self.with_job(id, |status| {
            status.paused = true;
            status.download_rate_bps = 0;
            status.upload_rate_bps = 0;
        })
    }

    async fn resume(&self, id: &JobId) -> Result<()> {
        self.record(EngineCall::Resume(id.clone()));
        if !self.capabilities.resume {
            bail!("resume operation not supported by this engine");
        }
        self.with_job(id, |status| {
            status.paused = false;
            status.peer_count = 3;
        })
    }

    async fn disconnect_peers(&self, id: &JobId) -> Result<()> {
        self.record(EngineCall::DisconnectPeers(id.clone()));
        if !self.capabilities.disconnect_peers {
            bail!("peer disconnect not supported by this engine");
        }
        self.with_job(id, |status| {
            status.peer_count = 0;
            status.paused = true;
        })
    }

    async fn destroy(&self, id: &JobId) -> Result<()> {
        self.record(EngineCall::Destroy(id.clone()));
        let delay = self.script.destroy_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.script.fail_destroy.load(Ordering::SeqCst) {
            bail!("scripted destroy failure");
        }
        lock(&self.jobs).remove(id);
        Ok(())
    }

    async fn destroy_all(&self) -> Result<()> {
        self.record(EngineCall::DestroyAll);
        lock(&self.jobs).clear();
        Ok(())
    }
}

/// Factory that builds [`ScriptedEngine`] instances and keeps hold of them.
#[derive(Default)]
pub struct ScriptedFactory {
    script: Arc<Script>,
    engines: Mutex<Vec<Arc<ScriptedEngine>>>,
    fail_next: AtomicBool,
}

impl ScriptedFactory {
    /// Factory with default switches and full capabilities.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Shared failure switches.
    #[must_use]
    pub fn script(&self) -> &Script {
        &self.script
    }

    /// Make the next `construct` call fail.
    pub fn fail_next_construct(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Most recently built engine.
    #[must_use]
    pub fn last_engine(&self) -> Option<Arc<ScriptedEngine>> {
        lock(&self.engines).last().cloned()
    }

    /// Every engine built so far, oldest first.
    #[must_use]
    pub fn engines(&self) -> Vec<Arc<ScriptedEngine>> {
        lock(&self.engines).clone()
    }
}

#[async_trait]
impl EngineFactory for ScriptedFactory {
    async fn construct(
        &self,
        config: &EngineRuntimeConfig,
        events: EngineEventSender,
    ) -> Result<Arc<dyn TransferEngine>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            bail!("scripted construction failure");
        }
        let engine = Arc::new(ScriptedEngine::new(
            Arc::clone(&self.script),
            config.clone(),
            events,
        ));
        lock(&self.engines).push(Arc::clone(&engine));
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{magnet_uri, sample_hash};
    use shadow_torrent_core::Descriptor;
    use tokio::sync::mpsc;

    fn request(seed: u8) -> EngineAddRequest {
        EngineAddRequest {
            descriptor: Descriptor::magnet(magnet_uri(&sample_hash(seed), "demo")),
            target_path: PathBuf::from("/downloads"),
            name_hint: None,
        }
    }

    #[tokio::test]
    async fn scripted_engine_tracks_jobs_and_calls() -> Result<()> {
        let factory = ScriptedFactory::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = factory
            .construct(&EngineRuntimeConfig::default(), EngineEventSender::new(1, tx))
            .await?;

        let handle = engine.add(request(1)).await?;
        assert_eq!(handle.name, "demo");
        assert!(engine.add(request(1)).await.is_err(), "duplicates rejected");

        engine.pause(&handle.id).await?;
        let status = engine.get(&handle.id).await?.expect("status present");
        assert!(status.paused);
        assert_eq!(status.files[0].path, PathBuf::from("demo/demo.bin"));

        engine.destroy(&handle.id).await?;
        assert!(engine.get(&handle.id).await?.is_none());

        let scripted = factory.last_engine().expect("engine recorded");
        assert_eq!(scripted.count(&EngineCall::Destroy(handle.id.clone())), 1);
        assert_eq!(scripted.generation(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn script_switches_apply_to_later_engines() -> Result<()> {
        let factory = ScriptedFactory::new();
        factory.script().fail_pause(true);
        factory.script().reject(&JobId::new(sample_hash(2)));
        factory.fail_next_construct();

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(
            factory
                .construct(
                    &EngineRuntimeConfig::default(),
                    EngineEventSender::new(1, tx.clone())
                )
                .await
                .is_err()
        );
        let engine = factory
            .construct(&EngineRuntimeConfig::default(), EngineEventSender::new(2, tx))
            .await?;
        assert!(engine.add(request(2)).await.is_err());
        let handle = engine.add(request(3)).await?;
        assert!(engine.pause(&handle.id).await.is_err());
        assert_eq!(factory.engines().len(), 1);
        Ok(())
    }
}
