//! `TransferEngine` implementation backed by the simulation worker.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use shadow_events::JobId;
use shadow_torrent_core::{
    EngineAddRequest, EngineCapabilities, EngineEventSender, EngineFactory, EngineJobStatus,
    EngineRuntimeConfig, JobHandle, TransferEngine,
};
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::command::{Reply, SimCommand};
use crate::error::SimEngineError;
use crate::types::SimProfile;
use crate::worker;

const COMMAND_BUFFER: usize = 128;

/// Handle to a running simulated engine instance.
#[derive(Clone)]
pub struct SimEngine {
    commands: mpsc::Sender<SimCommand>,
    capabilities: EngineCapabilities,
}

impl SimEngine {
    /// Start a worker for `config` that reports through `events`.
    #[must_use]
    pub fn spawn(config: EngineRuntimeConfig, profile: SimProfile, events: EngineEventSender) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        worker::spawn(config, profile, events, rx);
        Self {
            commands,
            capabilities: profile.capabilities,
        }
    }

    async fn request<T>(
        &self,
        operation: &'static str,
        build: impl FnOnce(Reply<T>) -> SimCommand,
    ) -> Result<T> {
        let (respond_to, rx) = oneshot::channel();
        self.commands
            .send(build(respond_to))
            .await
            .map_err(|_| SimEngineError::WorkerGone { operation })?;
        let reply = rx
            .await
            .map_err(|_| SimEngineError::WorkerGone { operation })?;
        Ok(reply?)
    }
}

fn require(supported: bool, operation: &'static str) -> Result<()> {
    if supported {
        Ok(())
    } else {
        Err(SimEngineError::Unsupported { operation }.into())
    }
}

#[async_trait]
impl TransferEngine for SimEngine {
    fn capabilities(&self) -> EngineCapabilities {
        self.capabilities
    }

    async fn add(&self, request: EngineAddRequest) -> Result<JobHandle> {
        self.request("add", |respond_to| SimCommand::Add {
            request: Box::new(request),
            respond_to,
        })
        .await
    }

    async fn get(&self, id: &JobId) -> Result<Option<EngineJobStatus>> {
        let id = id.clone();
        self.request("get", |respond_to| SimCommand::Get { id, respond_to })
            .await
    }

    async fn list(&self) -> Result<Vec<EngineJobStatus>> {
        self.request("list", |respond_to| SimCommand::List { respond_to })
            .await
    }

    async fn pause(&self, id: &JobId) -> Result<()> {
        require(self.capabilities.pause, "pause")?;
        let id = id.clone();
        self.request("pause", |respond_to| SimCommand::Pause { id, respond_to })
            .await
    }

    async fn resume(&self, id: &JobId) -> Result<()> {
        require(self.capabilities.resume, "resume")?;
        let id = id.clone();
        self.request("resume", |respond_to| SimCommand::Resume { id, respond_to })
            .await
    }

    async fn disconnect_peers(&self, id: &JobId) -> Result<()> {
        require(self.capabilities.disconnect_peers, "disconnect_peers")?;
        let id = id.clone();
        self.request("disconnect_peers", |respond_to| {
            SimCommand::DisconnectPeers { id, respond_to }
        })
        .await
    }

    async fn destroy(&self, id: &JobId) -> Result<()> {
        let id = id.clone();
        self.request("destroy", |respond_to| SimCommand::Destroy { id, respond_to })
            .await
    }

    async fn destroy_all(&self) -> Result<()> {
        self.request("destroy_all", |respond_to| SimCommand::DestroyAll {
            respond_to,
        })
        .await
    }
}

/// Builds [`SimEngine`] instances from runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct SimEngineFactory {
    profile: SimProfile,
}

impl SimEngineFactory {
    /// Factory producing engines with `profile`.
    #[must_use]
    pub const fn new(profile: SimProfile) -> Self {
        Self { profile }
    }
}

#[async_trait]
impl EngineFactory for SimEngineFactory {
    async fn construct(
        &self,
        config: &EngineRuntimeConfig,
        events: EngineEventSender,
    ) -> Result<Arc<dyn TransferEngine>> {
        tokio::fs::create_dir_all(&config.download_root)
            .await
            .with_context(|| {
                format!(
                    "failed to prepare download root {}",
                    config.download_root.display()
                )
            })?;
        info!(
            generation = events.generation(),
            download_root = %config.download_root.display(),
            max_connections = config.max_connections,
            "simulated engine constructed"
        );
        Ok(Arc::new(SimEngine::spawn(
            config.clone(),
            self.profile,
            events,
        )))
    }
}
