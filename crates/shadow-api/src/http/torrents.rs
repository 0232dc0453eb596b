//! Job command and listing handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path as AxumPath, Query, State},
};
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use shadow_events::Snapshot;
use shadow_torrent_core::descriptor::MAX_METAINFO_BYTES;
use shadow_torrent_core::{
    AddJobOptions, AddedReply, CommandReply, Descriptor, JobId, TeardownWarning,
};
use tracing::info;

use crate::http::errors::ApiError;
use crate::state::ApiState;

/// Descriptor as submitted by clients: a magnet URI or bare info hash, or a
/// base64 metainfo payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum DescriptorInput {
    Text(String),
    Metainfo { metainfo: String },
}

impl DescriptorInput {
    pub(crate) fn into_descriptor(self) -> Result<Descriptor, ApiError> {
        match self {
            Self::Text(value) => Descriptor::parse(&value).map_err(ApiError::from),
            Self::Metainfo { metainfo } => {
                let bytes = general_purpose::STANDARD
                    .decode(metainfo.trim())
                    .map_err(|_| ApiError::bad_request("metainfo payload is not valid base64"))?;
                if bytes.len() > MAX_METAINFO_BYTES {
                    return Err(ApiError::bad_request(format!(
                        "metainfo payload exceeds {MAX_METAINFO_BYTES} bytes"
                    )));
                }
                let descriptor = Descriptor::metainfo(bytes);
                descriptor.validate()?;
                Ok(descriptor)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AddJobRequest {
    pub(crate) descriptor: DescriptorInput,
    #[serde(default)]
    pub(crate) options: AddJobOptions,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RemoveQuery {
    #[serde(default)]
    pub(crate) delete_files: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum JobAction {
    Pause,
    Resume,
    ForceStop,
}

impl JobAction {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::ForceStop => "force-stop",
        }
    }
}

/// Payload of a successful removal; warnings are omitted when there were none.
#[derive(Debug, Serialize)]
pub(crate) struct RemovedReply {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) warnings: Vec<TeardownWarning>,
}

pub(crate) async fn create_job(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<AddJobRequest>,
) -> Result<Json<CommandReply<AddedReply>>, ApiError> {
    let descriptor = request.descriptor.into_descriptor()?;
    let id = state
        .torrent
        .workflow()
        .add_job(descriptor, request.options)
        .await?;
    info!(job_id = %id, "job submission accepted");
    Ok(Json(CommandReply::success(AddedReply { id })))
}

pub(crate) async fn delete_job(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<RemoveQuery>,
) -> Result<Json<CommandReply<RemovedReply>>, ApiError> {
    let id = JobId::new(id);
    let report = state
        .torrent
        .workflow()
        .remove_job(&id, query.delete_files)
        .await?;
    info!(
        job_id = %id,
        delete_files = query.delete_files,
        warnings = report.warnings.len(),
        "job removal finished"
    );
    Ok(Json(CommandReply::success(RemovedReply {
        warnings: report.warnings,
    })))
}

pub(crate) async fn action_job(
    State(state): State<Arc<ApiState>>,
    AxumPath((id, action)): AxumPath<(String, JobAction)>,
) -> Result<Json<CommandReply<()>>, ApiError> {
    let id = JobId::new(id);
    let workflow = state.torrent.workflow();
    match action {
        JobAction::Pause => workflow.pause_job(&id).await?,
        JobAction::Resume => workflow.resume_job(&id).await?,
        JobAction::ForceStop => workflow.force_stop_job(&id).await?,
    }
    info!(job_id = %id, action = action.as_str(), "job action applied");
    Ok(Json(CommandReply::acknowledged()))
}

pub(crate) async fn list_jobs(State(state): State<Arc<ApiState>>) -> Json<Vec<Snapshot>> {
    Json(state.torrent.inspector().get_all().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_input_accepts_every_wire_form() -> Result<(), serde_json::Error> {
        let hash = "0123456789abcdef0123456789abcdef01234567";
        let bare: DescriptorInput = serde_json::from_value(serde_json::json!(hash))?;
        let descriptor = bare.into_descriptor().expect("bare hash");
        assert_eq!(descriptor.fingerprint(), Some(JobId::new(hash)));

        let metainfo: DescriptorInput = serde_json::from_value(serde_json::json!({
            "metainfo": general_purpose::STANDARD.encode(b"d4:infod4:name3:fooee"),
        }))?;
        assert!(matches!(
            metainfo.into_descriptor(),
            Ok(Descriptor::Metainfo { .. })
        ));
        Ok(())
    }

    #[test]
    fn descriptor_input_rejects_garbage() {
        let err = DescriptorInput::Metainfo {
            metainfo: "%%%".to_string(),
        }
        .into_descriptor()
        .expect_err("invalid base64");
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);

        let err = DescriptorInput::Text("http://example.com".to_string())
            .into_descriptor()
            .expect_err("not a magnet");
        assert_eq!(err.kind, "invalid_descriptor");
    }

    #[test]
    fn actions_parse_from_path_segments() -> Result<(), serde_json::Error> {
        let action: JobAction = serde_json::from_str("\"force-stop\"")?;
        assert_eq!(action, JobAction::ForceStop);
        assert!(serde_json::from_str::<JobAction>("\"explode\"").is_err());
        Ok(())
    }
}
