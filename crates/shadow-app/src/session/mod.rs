//! Session orchestration.
//!
//! Layout: `registry.rs` (live job records), `lifecycle.rs` (transition table,
//! per-job locks, teardown), `restore.rs` (re-admission), `snapshot.rs`,
//! `broadcast.rs` (fan-out task), `persist.rs` (write throttling), and
//! `manager.rs` which ties them together.

mod broadcast;
mod lifecycle;
mod manager;
mod persist;
mod registry;
mod restore;
mod snapshot;

pub use manager::SessionManager;
