//! Configuration facade consumed by the settings endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use shadow_config::SessionConfig;
use shadow_torrent_core::SessionResult;

/// Read and replace the live session configuration.
#[async_trait]
pub trait ConfigFacade: Send + Sync {
    /// Configuration currently in effect.
    async fn current(&self) -> SessionConfig;

    /// Validate, persist, and apply a replacement configuration. Applying it
    /// reinitialises the engine.
    async fn update(&self, config: SessionConfig) -> SessionResult<()>;
}

/// Shared handle to the configuration facade.
pub type SharedConfig = Arc<dyn ConfigFacade>;
