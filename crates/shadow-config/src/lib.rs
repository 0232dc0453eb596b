#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs)]

//! Configuration model and durable store for the Shadow session layer.
//!
//! Layout: `model.rs` (typed settings and persisted records), `defaults.rs`
//! (documented defaults), `validate.rs` (field checks), `store.rs` (JSON file
//! store with atomic writes), `error.rs` (error taxonomy).

mod defaults;
/// Error types for configuration operations.
pub mod error;
/// Typed configuration and persisted session records.
pub mod model;
/// File-backed configuration and session store.
pub mod store;
/// Validation helpers for configuration documents.
pub mod validate;

pub use defaults::MAX_RESTORE_FAILURES;
pub use error::{ConfigError, ConfigResult};
pub use model::{
    PersistedJob, PrivacySettings, SessionConfig, SessionState, SessionTuning, Theme,
    UiPreferences,
};
pub use store::ConfigStore;
pub use validate::validate_config;
