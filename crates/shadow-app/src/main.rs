#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs)]

//! Binary entrypoint that wires the Shadow session services together and
//! serves the HTTP surface until interrupted.

use shadow_app::{AppResult, run_app};

/// Bootstraps the session service and blocks until shutdown.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app().await
}
