#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs)]

//! Shadow session orchestration and application bootstrap.
//!
//! Layout: `session/` (registry, lifecycle, restore, broadcast, manager),
//! `bootstrap.rs` (service wiring), `error.rs`.

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Application-level error types.
pub mod error;
/// Session manager and its supporting machinery.
pub mod session;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};
pub use session::SessionManager;
