#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs)]

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (descriptors and hashes), mocks.rs (scripted engine and factory), assert.rs (async assertions).

pub mod assert;
pub mod fixtures;
pub mod mocks;
