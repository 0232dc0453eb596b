//! Settings handlers: read and replace the session configuration.

use std::sync::Arc;

use axum::{Json, extract::State};
use shadow_config::SessionConfig;
use shadow_torrent_core::CommandReply;
use tracing::info;

use crate::http::errors::ApiError;
use crate::state::ApiState;

pub(crate) async fn get_settings(State(state): State<Arc<ApiState>>) -> Json<SessionConfig> {
    Json(state.config.current().await)
}

/// Replacing the configuration swaps the engine; the reply is sent once the
/// new engine is running with every job restored.
pub(crate) async fn put_settings(
    State(state): State<Arc<ApiState>>,
    Json(config): Json<SessionConfig>,
) -> Result<Json<CommandReply<()>>, ApiError> {
    state.config.update(config).await?;
    info!("settings replaced");
    Ok(Json(CommandReply::acknowledged()))
}
