#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs)]

//! Engine-agnostic transfer interfaces and DTOs.
//!
//! Layout: `descriptor.rs` (magnet/metainfo parsing), `model.rs` (engine and
//! command DTOs), `engine.rs` (adapter contract), `service.rs` (workflow and
//! inspector facades), `error.rs` (session error taxonomy).

/// Descriptor parsing and validation.
pub mod descriptor;
/// Transfer engine adapter contract.
pub mod engine;
/// Error types for session commands.
pub mod error;
/// Engine and command DTOs.
pub mod model;
/// Workflow and inspector facades exposed to delivery surfaces.
pub mod service;

pub use descriptor::Descriptor;
pub use engine::{EngineEventSender, EngineFactory, TransferEngine};
pub use error::{SessionError, SessionResult};
pub use model::{
    AddJobOptions, EngineAddRequest, EngineCapabilities, EngineEnvelope, EngineEvent,
    EngineFileStatus, EngineJobStatus, EngineRuntimeConfig, JobHandle, LocatedFile,
    RemovalReport, RestoreReport, TeardownStage, TeardownWarning,
};
pub use service::{AddedReply, CommandReply, JobInspector, JobWorkflow};
pub use shadow_events::JobId;
