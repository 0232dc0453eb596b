//! Merge of registry records with engine status into broadcast snapshots.

use shadow_events::payloads::{fraction, ratio};
use shadow_events::{FileSnapshot, Snapshot};
use shadow_torrent_core::{EngineFileStatus, EngineJobStatus};

use super::registry::JobRecord;

/// Build the snapshot for `record`. Downloaded bytes are floored at the highest
/// value already observed so consumers never see them shrink.
pub(crate) fn build_snapshot(record: &JobRecord, status: Option<&EngineJobStatus>) -> Snapshot {
    let Some(status) = status else {
        return Snapshot {
            id: record.id.clone(),
            name: record.name.clone(),
            state: record.state,
            progress: if record.done { 1.0 } else { record.progress },
            downloaded_bytes: record.downloaded_floor,
            uploaded_bytes: 0,
            download_rate_bps: 0,
            upload_rate_bps: 0,
            peer_count: 0,
            ratio: 0.0,
            eta_seconds: None,
            total_bytes: 0,
            files: Vec::new(),
            paused: record.paused,
            done: record.done,
            force_stopped: record.force_stopped,
        };
    };

    let done = record.done || status.done;
    let downloaded_bytes = status.downloaded_bytes.max(record.downloaded_floor);
    let progress = if done {
        1.0
    } else if status.total_bytes > 0 {
        fraction(downloaded_bytes, status.total_bytes)
    } else {
        status.progress.clamp(0.0, 1.0)
    }
    .max(record.progress.min(1.0));

    Snapshot {
        id: record.id.clone(),
        name: record.name.clone(),
        state: record.state,
        progress,
        downloaded_bytes,
        uploaded_bytes: status.uploaded_bytes,
        download_rate_bps: status.download_rate_bps,
        upload_rate_bps: status.upload_rate_bps,
        peer_count: status.peer_count,
        ratio: ratio(status.uploaded_bytes, downloaded_bytes),
        eta_seconds: if done { Some(0) } else { status.eta_seconds },
        total_bytes: status.total_bytes,
        files: status.files.iter().map(file_snapshot).collect(),
        paused: record.paused,
        done,
        force_stopped: record.force_stopped,
    }
}

fn file_snapshot(file: &EngineFileStatus) -> FileSnapshot {
    FileSnapshot {
        name: file.path.to_string_lossy().into_owned(),
        size: file.size,
        downloaded_bytes: file.downloaded,
        progress: fraction(file.downloaded, file.size),
    }
}
