#![allow(clippy::redundant_pub_crate)]

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use shadow_events::JobId;
use shadow_torrent_core::{
    Descriptor, EngineAddRequest, EngineEvent, EngineEventSender, EngineFileStatus,
    EngineJobStatus, EngineRuntimeConfig, JobHandle,
};
use tokio::fs;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::command::SimCommand;
use crate::error::SimEngineError;
use crate::types::SimProfile;

const PROGRESS_COALESCE_INTERVAL: Duration = Duration::from_millis(100);
const MIN_TICK: Duration = Duration::from_millis(1);
const SIMULATED_PEERS: u32 = 8;
const FINGERPRINT_BYTES: usize = 20;

pub(crate) fn spawn(
    config: EngineRuntimeConfig,
    profile: SimProfile,
    events: EngineEventSender,
    mut commands: mpsc::Receiver<SimCommand>,
) {
    tokio::spawn(async move {
        let mut worker = Worker::new(config, profile, events);
        let mut tick = tokio::time::interval(profile.tick.max(MIN_TICK));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => {
                            if worker.handle(command).await == Flow::Stop {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = tick.tick() => worker.advance().await,
            }
        }
        debug!(
            generation = worker.events.generation(),
            "simulated engine worker stopped"
        );
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct SimJob {
    status: EngineJobStatus,
    peers_severed: bool,
}

impl SimJob {
    fn halt(&mut self) {
        self.status.download_rate_bps = 0;
        self.status.upload_rate_bps = 0;
        self.status.eta_seconds = None;
    }

    fn apply_download(&mut self, step: u64, tick: Duration) {
        let status = &mut self.status;
        status.downloaded_bytes = status.downloaded_bytes.saturating_add(step);
        let mut remaining = step;
        for file in &mut status.files {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(file.size - file.downloaded);
            file.downloaded += take;
            remaining -= take;
        }
        status.progress = fraction(status.downloaded_bytes, status.total_bytes);
        status.download_rate_bps = rate(step, tick);
        status.eta_seconds = status
            .total_bytes
            .saturating_sub(status.downloaded_bytes)
            .checked_div(status.download_rate_bps);
    }

    fn mark_complete(&mut self) {
        let status = &mut self.status;
        status.downloaded_bytes = status.total_bytes;
        status.progress = 1.0;
        status.done = true;
        status.download_rate_bps = 0;
        status.eta_seconds = Some(0);
        for file in &mut status.files {
            file.downloaded = file.size;
        }
    }
}

struct Worker {
    config: EngineRuntimeConfig,
    profile: SimProfile,
    events: EngineEventSender,
    jobs: HashMap<JobId, SimJob>,
    health: BTreeSet<String>,
    progress_last_emit: HashMap<JobId, Instant>,
}

impl Worker {
    fn new(config: EngineRuntimeConfig, profile: SimProfile, events: EngineEventSender) -> Self {
        Self {
            config,
            profile,
            events,
            jobs: HashMap::new(),
            health: BTreeSet::new(),
            progress_last_emit: HashMap::new(),
        }
    }

    async fn handle(&mut self, command: SimCommand) -> Flow {
        match command {
            SimCommand::Add {
                request,
                respond_to,
            } => {
                let _ = respond_to.send(self.add(*request).await);
            }
            SimCommand::Get { id, respond_to } => {
                let status = self.jobs.get(&id).map(|job| job.status.clone());
                let _ = respond_to.send(Ok(status));
            }
            SimCommand::List { respond_to } => {
                let mut all: Vec<_> = self.jobs.values().map(|job| job.status.clone()).collect();
                all.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
                let _ = respond_to.send(Ok(all));
            }
            SimCommand::Pause { id, respond_to } => {
                let _ = respond_to.send(self.with_job(id, |job| {
                    job.status.paused = true;
                    job.halt();
                }));
            }
            SimCommand::Resume { id, respond_to } => {
                let _ = respond_to.send(self.with_job(id, |job| {
                    job.status.paused = false;
                    job.peers_severed = false;
                }));
            }
            SimCommand::DisconnectPeers { id, respond_to } => {
                let _ = respond_to.send(self.with_job(id, |job| {
                    job.peers_severed = true;
                    job.status.paused = true;
                    job.status.peer_count = 0;
                    job.halt();
                }));
            }
            SimCommand::Destroy { id, respond_to } => {
                self.progress_last_emit.remove(&id);
                let result = match self.jobs.remove(&id) {
                    Some(_) => {
                        info!(job_id = %id, "simulated transfer destroyed");
                        Ok(())
                    }
                    None => Err(SimEngineError::UnknownJob { id }),
                };
                let _ = respond_to.send(result);
            }
            SimCommand::DestroyAll { respond_to } => {
                let count = self.jobs.len();
                self.jobs.clear();
                self.progress_last_emit.clear();
                info!(count, "simulated engine shut down");
                let _ = respond_to.send(Ok(()));
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn with_job(
        &mut self,
        id: JobId,
        apply: impl FnOnce(&mut SimJob),
    ) -> Result<(), SimEngineError> {
        match self.jobs.get_mut(&id) {
            Some(job) => {
                apply(job);
                Ok(())
            }
            None => Err(SimEngineError::UnknownJob { id }),
        }
    }

    async fn add(&mut self, request: EngineAddRequest) -> Result<JobHandle, SimEngineError> {
        let id = fingerprint(&request.descriptor)?;
        if self.jobs.contains_key(&id) {
            return Err(SimEngineError::Duplicate { id });
        }
        let name = request
            .name_hint
            .clone()
            .filter(|hint| !hint.trim().is_empty())
            .or_else(|| request.descriptor.display_name())
            .unwrap_or_else(|| id.to_string());

        let mut status = EngineJobStatus::pending(id.clone(), name.clone(), request.target_path);
        status.total_bytes = self.profile.default_size;
        status.files = split_files(&name, self.profile.default_size);
        let on_disk = already_on_disk(&status.target_path, &status.files).await;

        let mut job = SimJob {
            status,
            peers_severed: false,
        };
        if on_disk {
            job.mark_complete();
        }
        self.jobs.insert(id.clone(), job);
        info!(job_id = %id, name = %name, on_disk, "simulated transfer added");

        self.events.send(EngineEvent::Added {
            job_id: id.clone(),
            name: name.clone(),
        });
        if on_disk {
            self.events.send(EngineEvent::Done { job_id: id.clone() });
        }
        Ok(JobHandle { id, name })
    }

    async fn advance(&mut self) {
        let tick = self.profile.tick.max(MIN_TICK);
        let download_budget = per_tick_budget(
            self.profile.bytes_per_tick,
            self.config.download_rate_limit_bps,
            tick,
        );
        let upload_budget = per_tick_budget(
            (self.profile.bytes_per_tick / 4).max(1),
            self.config.upload_rate_limit_bps,
            tick,
        );

        let mut progressed = Vec::new();
        let mut uploaded = Vec::new();
        let mut completed = Vec::new();
        for (id, job) in &mut self.jobs {
            if job.status.paused || job.peers_severed {
                continue;
            }
            job.status.peer_count = SIMULATED_PEERS;
            if job.status.done {
                job.status.uploaded_bytes = job.status.uploaded_bytes.saturating_add(upload_budget);
                job.status.upload_rate_bps = rate(upload_budget, tick);
                uploaded.push(id.clone());
                continue;
            }
            let step = download_budget.min(job.status.total_bytes - job.status.downloaded_bytes);
            job.apply_download(step, tick);
            if job.status.downloaded_bytes >= job.status.total_bytes {
                completed.push(id.clone());
            } else {
                progressed.push(id.clone());
            }
        }

        for id in progressed {
            if self.should_emit_progress(&id) {
                self.events.send(EngineEvent::Progress { job_id: id });
            }
        }
        for id in uploaded {
            if self.should_emit_progress(&id) {
                self.events.send(EngineEvent::Upload { job_id: id });
            }
        }
        for id in completed {
            self.complete(&id).await;
        }
    }

    async fn complete(&mut self, id: &JobId) {
        let Some(job) = self.jobs.get_mut(id) else {
            return;
        };
        job.mark_complete();
        let target = job.status.target_path.clone();
        let files = job.status.files.clone();

        if self.profile.materialize_files {
            if let Err(err) = materialize(&target, &files).await {
                let detail = describe(&err);
                self.mark_degraded("storage", Some(&detail));
                self.events.send(EngineEvent::Error {
                    job_id: Some(id.clone()),
                    message: detail,
                    fatal: true,
                });
                return;
            }
            self.mark_recovered("storage");
        }

        info!(job_id = %id, "simulated transfer complete");
        self.events.send(EngineEvent::Done { job_id: id.clone() });
    }

    fn should_emit_progress(&mut self, id: &JobId) -> bool {
        let now = Instant::now();
        if let Some(last) = self.progress_last_emit.get_mut(id) {
            if now.duration_since(*last) >= PROGRESS_COALESCE_INTERVAL {
                *last = now;
                true
            } else {
                false
            }
        } else {
            self.progress_last_emit.insert(id.clone(), now);
            true
        }
    }

    fn mark_degraded(&mut self, component: &str, detail: Option<&str>) {
        let inserted = self.health.insert(component.to_string());
        if inserted {
            self.events.send(EngineEvent::Error {
                job_id: None,
                message: format!("engine component degraded: {component}"),
                fatal: false,
            });
            if let Some(detail) = detail {
                warn!(component, detail = %detail, "engine component degraded");
            } else {
                warn!(component, "engine component degraded");
            }
        } else if let Some(detail) = detail {
            warn!(component, detail = %detail, "engine component still degraded");
        }
    }

    fn mark_recovered(&mut self, component: &str) {
        if self.health.remove(component) {
            info!(component, "engine component recovered");
        }
    }
}

fn fingerprint(descriptor: &Descriptor) -> Result<JobId, SimEngineError> {
    match descriptor {
        Descriptor::Magnet { .. } => {
            descriptor
                .fingerprint()
                .ok_or(SimEngineError::InvalidDescriptor {
                    reason: "magnet without info hash",
                })
        }
        Descriptor::Metainfo { bytes } => {
            if bytes.is_empty() {
                return Err(SimEngineError::InvalidDescriptor {
                    reason: "empty metainfo",
                });
            }
            let digest = Sha256::digest(bytes);
            Ok(JobId::new(hex::encode(&digest[..FINGERPRINT_BYTES])))
        }
    }
}

fn split_files(name: &str, total: u64) -> Vec<EngineFileStatus> {
    let first = total / 2;
    [(1, first), (2, total - first)]
        .into_iter()
        .map(|(part, size)| EngineFileStatus {
            path: PathBuf::from(name).join(format!("part-{part}.bin")),
            size,
            downloaded: 0,
        })
        .collect()
}

async fn already_on_disk(target: &Path, files: &[EngineFileStatus]) -> bool {
    for file in files {
        match fs::metadata(target.join(&file.path)).await {
            Ok(meta) if meta.len() == file.size => {}
            _ => return false,
        }
    }
    !files.is_empty()
}

async fn materialize(target: &Path, files: &[EngineFileStatus]) -> Result<(), SimEngineError> {
    for file in files {
        let path = target.join(&file.path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| SimEngineError::Materialize {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let handle = fs::File::create(&path)
            .await
            .map_err(|source| SimEngineError::Materialize {
                path: path.clone(),
                source,
            })?;
        handle
            .set_len(file.size)
            .await
            .map_err(|source| SimEngineError::Materialize { path, source })?;
    }
    Ok(())
}

fn describe(err: &SimEngineError) -> String {
    match err {
        SimEngineError::Materialize { path, source } => {
            format!("{err}: {} ({source})", path.display())
        }
        other => other.to_string(),
    }
}

fn per_tick_budget(base: u64, limit_bps: Option<u64>, tick: Duration) -> u64 {
    match limit_bps {
        Some(limit) => {
            let allowed = u128::from(limit) * tick.as_millis() / 1_000;
            base.min(u64::try_from(allowed).unwrap_or(u64::MAX).max(1))
        }
        None => base,
    }
}

fn rate(bytes: u64, tick: Duration) -> u64 {
    let millis = tick.as_millis().max(1);
    u64::try_from(u128::from(bytes) * 1_000 / millis).unwrap_or(u64::MAX)
}

#[expect(
    clippy::cast_precision_loss,
    reason = "progress is a display fraction"
)]
fn fraction(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64).clamp(0.0, 1.0)
    }
}
