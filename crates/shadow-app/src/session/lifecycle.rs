//! Job lifecycle rules, per-job serialization, and the teardown protocol.
//!
//! # Design
//! - Transitions are checked against a fixed table before any engine call.
//! - Commands on one id run one at a time; different ids proceed in parallel.
//! - Teardown never fails as a whole: each stage that breaks becomes a warning.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use shadow_events::{JobId, JobState};
use shadow_torrent_core::{
    EngineCapabilities, SessionError, SessionResult, TeardownStage, TeardownWarning,
    TransferEngine,
};
use tokio::sync::{OwnedMutexGuard, watch};
use tracing::debug;

/// Validate `from -> to` against the lifecycle table.
pub(crate) fn check_transition(id: &JobId, from: JobState, to: JobState) -> SessionResult<()> {
    use JobState::{Active, Completed, Failed, Paused, Removed, Removing, Requested, Seeding};

    let allowed = matches!(
        (from, to),
        (Requested, Active | Paused | Removing | Failed)
            | (Active, Paused | Completed | Removing | Failed)
            | (Paused, Active | Completed | Removing | Failed)
            | (Completed, Seeding | Paused | Removing | Failed)
            | (Seeding, Completed | Paused | Removing | Failed)
            | (Removing, Removed)
    );
    if allowed {
        Ok(())
    } else {
        Err(SessionError::InvalidTransition {
            job_id: id.clone(),
            from,
            to,
        })
    }
}

type LockMap = Arc<Mutex<HashMap<JobId, Arc<tokio::sync::Mutex<()>>>>>;

/// Per-id async locks serializing commands that target the same job.
///
/// Entries live only while a command holds or waits for them, so ids that
/// never resolve to a job leave nothing behind.
#[derive(Debug, Default)]
pub(crate) struct JobLocks {
    locks: LockMap,
}

impl JobLocks {
    pub(crate) async fn acquire(&self, id: &JobId) -> JobGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        JobGuard {
            id: id.clone(),
            locks: Arc::clone(&self.locks),
            guard: lock.lock_owned().await,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive hold on one job id; releases its map entry when nobody else is queued.
#[derive(Debug)]
pub(crate) struct JobGuard {
    id: JobId,
    locks: LockMap,
    guard: OwnedMutexGuard<()>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let held = OwnedMutexGuard::mutex(&self.guard);
        // The map and this guard are the only owners when nobody is queued.
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::ptr_eq(lock, held) && Arc::strong_count(lock) <= 2)
        {
            locks.remove(&self.id);
        }
    }
}

/// Registration handed out by [`GraceSignals::register`].
pub(crate) struct GraceRegistration {
    token: u64,
    pub(crate) wait: GraceWait,
}

/// Cancellation signals for teardowns currently in flight.
#[derive(Debug, Default)]
pub(crate) struct GraceSignals {
    pending: Mutex<HashMap<JobId, (u64, watch::Sender<bool>)>>,
    next_token: Mutex<u64>,
}

impl GraceSignals {
    pub(crate) fn register(&self, id: &JobId) -> GraceRegistration {
        let token = {
            let mut next = self.next_token.lock().unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };
        let (tx, rx) = watch::channel(false);
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), (token, tx));
        GraceRegistration {
            token,
            wait: GraceWait { rx },
        }
    }

    /// Cut short the grace wait of an in-flight teardown. Returns `false` when
    /// no teardown is registered for `id`.
    pub(crate) fn cancel(&self, id: &JobId) -> bool {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.get(id).is_some_and(|(_, tx)| {
            tx.send_replace(true);
            true
        })
    }

    pub(crate) fn finish(&self, id: &JobId, registration_token: u64) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending
            .get(id)
            .is_some_and(|(token, _)| *token == registration_token)
        {
            pending.remove(id);
        }
    }
}

impl GraceRegistration {
    pub(crate) const fn token(&self) -> u64 {
        self.token
    }
}

#[derive(Debug)]
pub(crate) struct GraceWait {
    rx: watch::Receiver<bool>,
}

impl GraceWait {
    /// Sleep for `period` unless cancelled first. Returns `true` on cancellation.
    pub(crate) async fn wait(mut self, period: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(period) => false,
            cancelled = cancelled(&mut self.rx) => cancelled,
        }
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) -> bool {
    if rx.wait_for(|flag| *flag).await.is_ok() {
        true
    } else {
        std::future::pending::<()>().await;
        false
    }
}

/// Everything a teardown task needs, detached from the session.
pub(crate) struct Teardown {
    pub(crate) engine: Arc<dyn TransferEngine>,
    pub(crate) capabilities: EngineCapabilities,
    pub(crate) id: JobId,
    pub(crate) name: String,
    pub(crate) target_path: PathBuf,
    pub(crate) already_paused: bool,
    pub(crate) delete_files: bool,
    pub(crate) grace_period: Duration,
}

impl Teardown {
    /// Pause, wait out the grace period, destroy, then delete content.
    pub(crate) async fn run(self, wait: GraceWait) -> Vec<TeardownWarning> {
        let mut warnings = Vec::new();

        if self.capabilities.pause && !self.already_paused {
            if let Err(err) = self.engine.pause(&self.id).await {
                warnings.push(TeardownWarning::new(TeardownStage::Pause, err.to_string()));
            }
        }

        if wait.wait(self.grace_period).await {
            debug!(job_id = %self.id, "grace period cut short by force-stop");
        }

        let files = if self.delete_files {
            self.resolve_files(&mut warnings).await
        } else {
            Vec::new()
        };

        if let Err(err) = self.engine.destroy(&self.id).await {
            warnings.push(TeardownWarning::new(
                TeardownStage::Destroy,
                err.to_string(),
            ));
        }

        if self.delete_files {
            delete_paths(&self.target_path, &files, &mut warnings).await;
        }
        warnings
    }

    async fn resolve_files(&self, warnings: &mut Vec<TeardownWarning>) -> Vec<PathBuf> {
        let fallback = || vec![self.target_path.join(&self.name)];
        match self.engine.get(&self.id).await {
            Ok(Some(status)) if !status.files.is_empty() => status
                .files
                .iter()
                .map(|file| self.target_path.join(&file.path))
                .collect(),
            Ok(_) => fallback(),
            Err(err) => {
                warnings.push(TeardownWarning::new(
                    TeardownStage::FetchFiles,
                    err.to_string(),
                ));
                fallback()
            }
        }
    }
}

fn is_contained(root: &Path, path: &Path) -> bool {
    path.starts_with(root)
        && path != root
        && !path
            .components()
            .any(|component| matches!(component, Component::ParentDir))
}

async fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = tokio::fs::symlink_metadata(path).await?;
    if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

/// Best-effort removal of `paths`, then of any directories left empty between
/// them and `root`, deepest first.
pub(crate) async fn delete_paths(
    root: &Path,
    paths: &[PathBuf],
    warnings: &mut Vec<TeardownWarning>,
) {
    let mut parents = BTreeSet::new();
    for path in paths {
        if !is_contained(root, path) {
            warnings.push(TeardownWarning::at_path(
                TeardownStage::DeleteFile,
                path.clone(),
                "path escapes the target directory",
            ));
            continue;
        }
        match remove_path(path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warnings.push(TeardownWarning::at_path(
                TeardownStage::DeleteFile,
                path.clone(),
                err.to_string(),
            )),
        }
        let mut dir = path.parent();
        while let Some(current) = dir {
            if !is_contained(root, current) {
                break;
            }
            parents.insert(current.to_path_buf());
            dir = current.parent();
        }
    }

    let mut dirs: Vec<PathBuf> = parents.into_iter().collect();
    dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    for dir in dirs {
        match tokio::fs::remove_dir(&dir).await {
            Ok(()) => {}
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::DirectoryNotEmpty
                ) => {}
            Err(err) => warnings.push(TeardownWarning::at_path(
                TeardownStage::DeleteDirectory,
                dir,
                err.to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn transition_table() {
        let id = JobId::new("a");
        assert!(check_transition(&id, JobState::Requested, JobState::Active).is_ok());
        assert!(check_transition(&id, JobState::Paused, JobState::Active).is_ok());
        assert!(check_transition(&id, JobState::Completed, JobState::Seeding).is_ok());
        assert!(check_transition(&id, JobState::Removing, JobState::Removed).is_ok());

        let err = check_transition(&id, JobState::Removing, JobState::Paused)
            .expect_err("removing jobs cannot be paused");
        assert_eq!(err.kind(), "invalid_transition");
        assert!(check_transition(&id, JobState::Removing, JobState::Removing).is_err());
        assert!(check_transition(&id, JobState::Active, JobState::Active).is_err());
    }

    #[tokio::test]
    async fn locks_serialize_same_id() {
        let locks = Arc::new(JobLocks::default());
        let id = JobId::new("a");
        let guard = locks.acquire(&id).await;

        let contender = {
            let locks = Arc::clone(&locks);
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        let _other = locks.acquire(&JobId::new("b")).await;
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender acquires after release")
            .expect("task");
    }

    #[tokio::test]
    async fn lock_entries_are_released_with_their_guards() {
        let locks = Arc::new(JobLocks::default());
        for n in 0..100 {
            drop(locks.acquire(&JobId::new(format!("unknown-{n}"))).await);
        }
        assert_eq!(locks.len(), 0);

        let id = JobId::new("a");
        let guard = locks.acquire(&id).await;
        let waiter = {
            let locks = Arc::clone(&locks);
            let id = id.clone();
            tokio::spawn(async move { drop(locks.acquire(&id).await) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        assert_eq!(locks.len(), 1, "entry kept while another caller is queued");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter acquires")
            .expect("task");
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn grace_wait_elapses_or_cancels() {
        let signals = GraceSignals::default();
        let id = JobId::new("a");

        let registration = signals.register(&id);
        assert!(!registration.wait.wait(Duration::from_millis(5)).await);

        let registration = signals.register(&id);
        assert!(signals.cancel(&id));
        let started = Instant::now();
        assert!(registration.wait.wait(Duration::from_secs(30)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn finish_ignores_stale_registrations() {
        let signals = GraceSignals::default();
        let id = JobId::new("a");
        let first = signals.register(&id);
        let second = signals.register(&id);
        signals.finish(&id, first.token());
        assert!(signals.cancel(&id), "newer registration survives");
        signals.finish(&id, second.token());
        assert!(!signals.cancel(&id));
    }

    #[tokio::test]
    async fn delete_paths_removes_files_and_empty_dirs() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let job_dir = root.path().join("album").join("disc1");
        tokio::fs::create_dir_all(&job_dir).await?;
        let file = job_dir.join("track.bin");
        tokio::fs::write(&file, b"data").await?;
        let keep = root.path().join("other.bin");
        tokio::fs::write(&keep, b"keep").await?;

        let mut warnings = Vec::new();
        delete_paths(
            root.path(),
            &[file, root.path().join("missing.bin")],
            &mut warnings,
        )
        .await;

        assert!(warnings.is_empty(), "{warnings:?}");
        assert!(!root.path().join("album").exists());
        assert!(keep.exists());
        Ok(())
    }

    #[tokio::test]
    async fn delete_paths_refuses_escaping_paths() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let target = root.path().join("target");
        tokio::fs::create_dir_all(&target).await?;
        let outside = root.path().join("outside.bin");
        tokio::fs::write(&outside, b"x").await?;

        let mut warnings = Vec::new();
        delete_paths(&target, &[target.join("..").join("outside.bin")], &mut warnings).await;
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].stage, TeardownStage::DeleteFile);
        assert!(outside.exists());
        Ok(())
    }
}
