#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs)]

//! Simulated transfer engine.
//!
//! A background worker owns every transfer and advances it on a fixed tick,
//! emitting the same callbacks a real engine would. The adapter talks to the
//! worker over a command channel.
//! Layout: `adapter.rs` (`TransferEngine` impl and factory), `command.rs`,
//! `worker.rs`, `types.rs` (simulation profile), `error.rs`.

pub mod adapter;
mod command;
pub mod error;
pub mod types;
mod worker;

pub use adapter::{SimEngine, SimEngineFactory};
pub use error::SimEngineError;
pub use types::SimProfile;
