//! Transfer engine adapter contract.
//!
//! The engine itself is a black box. Adapters expose the primitives below and
//! push callbacks into a single inbound queue through [`EngineEventSender`].

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use shadow_events::JobId;
use tokio::sync::mpsc;

use crate::model::{
    EngineAddRequest, EngineCapabilities, EngineEnvelope, EngineEvent, EngineJobStatus,
    EngineRuntimeConfig, JobHandle,
};

/// Primary engine trait implemented by adapters.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Optional features this instance supports.
    fn capabilities(&self) -> EngineCapabilities;

    /// Admit a new transfer into the engine.
    async fn add(&self, request: EngineAddRequest) -> anyhow::Result<JobHandle>;

    /// Fetch the status of one transfer.
    async fn get(&self, id: &JobId) -> anyhow::Result<Option<EngineJobStatus>>;

    /// Fetch the status of every transfer.
    async fn list(&self) -> anyhow::Result<Vec<EngineJobStatus>>;

    /// Pause a transfer; default implementation reports lack of support.
    async fn pause(&self, id: &JobId) -> anyhow::Result<()> {
        let _ = id;
        bail!("pause operation not supported by this engine");
    }

    /// Resume a transfer; default implementation reports lack of support.
    async fn resume(&self, id: &JobId) -> anyhow::Result<()> {
        let _ = id;
        bail!("resume operation not supported by this engine");
    }

    /// Sever every peer connection and stop discovery for a transfer.
    ///
    /// Does not halt the transfer by itself; callers pause it as well.
    async fn disconnect_peers(&self, id: &JobId) -> anyhow::Result<()> {
        let _ = id;
        bail!("peer disconnect not supported by this engine");
    }

    /// Release the transfer's engine resources; completes once they are gone.
    async fn destroy(&self, id: &JobId) -> anyhow::Result<()>;

    /// Release every transfer and shut the instance down.
    async fn destroy_all(&self) -> anyhow::Result<()>;
}

/// Constructs engine instances from runtime configuration.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Build a new engine wired to `events`.
    async fn construct(
        &self,
        config: &EngineRuntimeConfig,
        events: EngineEventSender,
    ) -> anyhow::Result<Arc<dyn TransferEngine>>;
}

/// Sending half of the inbound engine event queue, stamped with the engine generation.
#[derive(Debug, Clone)]
pub struct EngineEventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<EngineEnvelope>,
}

impl EngineEventSender {
    /// Wrap the queue for the engine instance identified by `generation`.
    #[must_use]
    pub const fn new(generation: u64, tx: mpsc::UnboundedSender<EngineEnvelope>) -> Self {
        Self { generation, tx }
    }

    /// Generation of the engine instance this sender belongs to.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue an event; returns `false` once the session side has gone away.
    pub fn send(&self, event: EngineEvent) -> bool {
        self.tx
            .send(EngineEnvelope {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}
