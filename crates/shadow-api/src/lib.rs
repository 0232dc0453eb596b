#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs)]

//! HTTP delivery surface for the session layer: job commands, settings, the
//! subscription channel, byte-range file serving, health, and metrics.

pub mod config;
pub mod error;
pub mod http;
pub(crate) mod state;

use std::sync::Arc;

use shadow_torrent_core::{JobInspector, JobWorkflow};

pub use config::{ConfigFacade, SharedConfig};
pub use error::{ApiServerError, ApiServerResult};
pub use http::router::ApiServer;

/// Workflow and inspector handles the HTTP surface dispatches to.
#[derive(Clone)]
pub struct TorrentHandles {
    workflow: Arc<dyn JobWorkflow>,
    inspector: Arc<dyn JobInspector>,
}

impl TorrentHandles {
    /// Bundle the command and read-only facades.
    #[must_use]
    pub fn new(workflow: Arc<dyn JobWorkflow>, inspector: Arc<dyn JobInspector>) -> Self {
        Self {
            workflow,
            inspector,
        }
    }

    /// Command facade.
    #[must_use]
    pub fn workflow(&self) -> &Arc<dyn JobWorkflow> {
        &self.workflow
    }

    /// Read-only facade.
    #[must_use]
    pub fn inspector(&self) -> &Arc<dyn JobInspector> {
        &self.inspector
    }
}
