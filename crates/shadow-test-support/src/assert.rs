//! Async assertion helpers.

use std::future::Future;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::time::{Instant, sleep};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poll `check` until it returns `true` or `deadline` elapses.
///
/// # Errors
///
/// Returns an error naming `what` when the condition never held.
pub async fn eventually<F, Fut>(what: &str, deadline: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let until = Instant::now() + deadline;
    loop {
        if check().await {
            return Ok(());
        }
        if Instant::now() >= until {
            bail!("condition not met within {deadline:?}: {what}");
        }
        sleep(POLL_INTERVAL).await;
    }
}
