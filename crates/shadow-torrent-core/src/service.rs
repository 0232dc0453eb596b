//! Workflow and inspector facades exposed to delivery surfaces.

use async_trait::async_trait;
use serde::Serialize;
use shadow_events::{JobId, Snapshot};

use crate::descriptor::Descriptor;
use crate::error::{SessionError, SessionResult};
use crate::model::{AddJobOptions, LocatedFile, RemovalReport};

/// Command facade for job lifecycle control.
#[async_trait]
pub trait JobWorkflow: Send + Sync {
    /// Admit a new job, returning its fingerprint.
    async fn add_job(&self, descriptor: Descriptor, options: AddJobOptions) -> SessionResult<JobId>;

    /// Tear a job down, optionally deleting its files.
    async fn remove_job(&self, id: &JobId, delete_files: bool) -> SessionResult<RemovalReport>;

    /// Pause a job; succeeds without effect when already paused.
    async fn pause_job(&self, id: &JobId) -> SessionResult<()>;

    /// Resume a job; succeeds without effect when already running.
    async fn resume_job(&self, id: &JobId) -> SessionResult<()>;

    /// Sever peers immediately and park the job paused.
    async fn force_stop_job(&self, id: &JobId) -> SessionResult<()>;
}

/// Read-only facade used by delivery surfaces.
#[async_trait]
pub trait JobInspector: Send + Sync {
    /// Current snapshot of every registered job.
    async fn get_all(&self) -> Vec<Snapshot>;

    /// Resolve a job's file for byte-range serving.
    async fn locate_file(&self, id: &JobId, index: usize) -> SessionResult<LocatedFile>;
}

/// Discriminated command result: `{success: true, ...payload}` or `{success: false, error}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandReply<T: Serialize> {
    /// Whether the command was committed.
    pub success: bool,
    /// Command-specific payload, flattened into the reply.
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub payload: Option<T>,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> CommandReply<T> {
    /// Successful reply carrying `payload`.
    pub const fn success(payload: T) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Successful reply with no payload.
    pub const fn acknowledged() -> Self {
        Self {
            success: true,
            payload: None,
            error: None,
        }
    }

    /// Failed reply carrying the caller-facing message for `err`.
    pub fn failure(err: &SessionError) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(err.detail()),
        }
    }

    /// Build a reply from a command result.
    pub fn from_result(result: SessionResult<T>) -> Self {
        match result {
            Ok(payload) => Self::success(payload),
            Err(err) => Self::failure(&err),
        }
    }
}

/// Payload of a successful add command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddedReply {
    /// Fingerprint of the admitted job.
    pub id: JobId,
}
