//! Commands sent from the adapter to the worker.

use shadow_events::JobId;
use shadow_torrent_core::{EngineAddRequest, EngineJobStatus, JobHandle};
use tokio::sync::oneshot;

use crate::error::SimEngineError;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, SimEngineError>>;

#[derive(Debug)]
pub(crate) enum SimCommand {
    Add {
        request: Box<EngineAddRequest>,
        respond_to: Reply<JobHandle>,
    },
    Get {
        id: JobId,
        respond_to: Reply<Option<EngineJobStatus>>,
    },
    List {
        respond_to: Reply<Vec<EngineJobStatus>>,
    },
    Pause {
        id: JobId,
        respond_to: Reply<()>,
    },
    Resume {
        id: JobId,
        respond_to: Reply<()>,
    },
    DisconnectPeers {
        id: JobId,
        respond_to: Reply<()>,
    },
    Destroy {
        id: JobId,
        respond_to: Reply<()>,
    },
    DestroyAll {
        respond_to: Reply<()>,
    },
}
