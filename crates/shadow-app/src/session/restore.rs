//! Re-admission of persisted jobs into a freshly constructed engine.

use std::collections::HashSet;

use shadow_config::PersistedJob;
use shadow_events::{Event, EventBus, JobId, JobState};
use shadow_telemetry::Metrics;
use shadow_torrent_core::{
    EngineAddRequest, EngineCapabilities, RestoreReport, SessionError, SessionResult,
    TransferEngine,
};
use tracing::{debug, info, warn};

use super::registry::{JobRecord, JobRegistry};

pub(crate) struct RestoreContext<'a> {
    pub(crate) engine: &'a dyn TransferEngine,
    pub(crate) capabilities: EngineCapabilities,
    pub(crate) registry: &'a JobRegistry,
    pub(crate) events: &'a EventBus,
    pub(crate) metrics: &'a Metrics,
}

/// Result of one restore pass: the counts plus the records the engine refused,
/// which stay persisted so the next restore retries them, up to
/// [`shadow_config::MAX_RESTORE_FAILURES`] refusals in a row.
#[derive(Debug, Default)]
pub(crate) struct RestoreOutcome {
    pub(crate) report: RestoreReport,
    pub(crate) retained: Vec<PersistedJob>,
}

/// Re-add `jobs` to the engine, leaving out any id in `exclude`.
pub(crate) async fn restore_jobs(
    ctx: &RestoreContext<'_>,
    jobs: Vec<PersistedJob>,
    exclude: &HashSet<JobId>,
) -> RestoreOutcome {
    let mut outcome = RestoreOutcome::default();
    let mut seen = HashSet::new();

    for mut job in jobs {
        if exclude.contains(&job.id) {
            debug!(job_id = %job.id, "persisted record belongs to a teardown in progress");
            continue;
        }
        if !seen.insert(job.id.clone()) || ctx.registry.contains(&job.id).await {
            debug!(job_id = %job.id, "duplicate persisted record ignored");
            continue;
        }

        if job.is_complete() {
            let artifact = job.artifact_path();
            if !tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
                info!(
                    job_id = %job.id,
                    artifact = %artifact.display(),
                    "completed job artifact missing; record dropped"
                );
                ctx.events.publish(Event::RestoreSkipped {
                    job_id: job.id.clone(),
                    reason: format!("artifact missing at {}", artifact.display()),
                });
                ctx.metrics.inc_restore_outcome("skipped");
                outcome.report.skipped += 1;
                continue;
            }
        }

        match restore_one(ctx, &job).await {
            Ok(()) => {
                ctx.metrics.inc_restore_outcome("restored");
                outcome.report.restored += 1;
            }
            Err(err) => {
                warn!(job_id = %job.id, error = %err.detail(), "failed to restore job");
                ctx.events.publish(Event::EngineError {
                    job_id: Some(job.id.clone()),
                    message: err.detail(),
                });
                ctx.metrics.inc_restore_outcome("failed");
                outcome.report.failed += 1;
                if job.note_restore_failure() {
                    outcome.retained.push(job);
                } else {
                    warn!(
                        job_id = %job.id,
                        refusals = job.restore_failures,
                        "engine keeps refusing persisted job; record dropped"
                    );
                    ctx.events.publish(Event::RestoreSkipped {
                        job_id: job.id.clone(),
                        reason: format!("refused {} times by the engine", job.restore_failures),
                    });
                }
            }
        }
    }

    info!(
        restored = outcome.report.restored,
        skipped = outcome.report.skipped,
        failed = outcome.report.failed,
        "session restore finished"
    );
    outcome
}

async fn restore_one(ctx: &RestoreContext<'_>, job: &PersistedJob) -> SessionResult<()> {
    let handle = ctx
        .engine
        .add(EngineAddRequest {
            descriptor: job.descriptor.clone(),
            target_path: job.target_path.clone(),
            name_hint: Some(job.name.clone()),
        })
        .await
        .map_err(SessionError::rejected)?;
    if handle.id != job.id {
        warn!(
            persisted = %job.id,
            engine = %handle.id,
            "engine assigned a different fingerprint on restore"
        );
    }

    let mut record = JobRecord::new(
        handle.id,
        job.descriptor.clone(),
        job.name.clone(),
        job.target_path.clone(),
    );
    record.progress = job.progress.clamp(0.0, 1.0);
    record.done = job.is_complete();
    record.state = if record.done {
        JobState::Completed
    } else {
        JobState::Active
    };

    if job.paused {
        if ctx.capabilities.pause {
            match ctx.engine.pause(&record.id).await {
                Ok(()) => {
                    record.paused = true;
                    record.state = JobState::Paused;
                }
                Err(err) => {
                    warn!(job_id = %record.id, error = %err, "restored job could not be paused");
                }
            }
        } else {
            warn!(job_id = %record.id, "engine cannot pause; restored job left running");
        }
    }

    let id = record.id.clone();
    let name = record.name.clone();
    let state = record.state;
    if !ctx.registry.insert(record).await {
        return Err(SessionError::AlreadyExists { job_id: id });
    }
    ctx.events.publish(Event::JobAdded {
        job_id: id.clone(),
        name,
    });
    ctx.events.publish(Event::StateChanged { job_id: id, state });
    Ok(())
}
