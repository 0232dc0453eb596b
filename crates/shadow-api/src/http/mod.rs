//! HTTP surface modules (router, handlers, middleware).

/// Shared constants and header names.
pub mod constants;
/// Error replies and status mapping.
pub mod errors;
/// Health and metrics endpoints.
pub mod health;
/// Router construction and server host.
pub mod router;
/// Settings handlers.
pub mod settings;
/// Server-sent events subscription channel.
pub mod sse;
/// Byte-range file serving.
pub mod stream;
/// Metrics middleware for HTTP requests.
pub mod telemetry;
/// Job command and listing handlers.
pub mod torrents;
