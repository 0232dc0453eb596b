//! Process-level span helpers.

use std::fmt::Display;

use tracing::{Span, span::Entered};

use crate::init::build_sha;

/// Keeps the `app` span entered for as long as the session service runs, so
/// every log line carries the build and where the service keeps its state.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter the `app` span with the state directory and listener address.
    #[must_use]
    pub fn new(data_dir: impl Display, http_addr: impl Display) -> Self {
        let span: &'static Span = Box::leak(Box::new(tracing::info_span!(
            "app",
            build_sha = %build_sha(),
            data_dir = %data_dir,
            http_addr = %http_addr,
        )));
        Self {
            _guard: span.enter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_enters_app_span() {
        let guard = GlobalContextGuard::new("/tmp/shadow", "127.0.0.1:8888");
        tracing::info!("inside app span");
        drop(guard);
    }
}
