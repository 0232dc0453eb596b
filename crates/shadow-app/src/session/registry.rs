//! In-memory registry of live jobs, keyed by fingerprint.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use shadow_config::PersistedJob;
use shadow_events::{JobId, JobState};
use shadow_torrent_core::Descriptor;
use tokio::sync::RwLock;

/// Session-side view of one job. Engine status is merged in at snapshot time.
#[derive(Debug, Clone)]
pub(crate) struct JobRecord {
    pub(crate) id: JobId,
    pub(crate) descriptor: Descriptor,
    pub(crate) name: String,
    pub(crate) target_path: PathBuf,
    pub(crate) state: JobState,
    pub(crate) paused: bool,
    pub(crate) done: bool,
    pub(crate) force_stopped: bool,
    pub(crate) progress: f64,
    /// Highest downloaded byte count ever reported for this job.
    pub(crate) downloaded_floor: u64,
    pub(crate) created_at: DateTime<Utc>,
}

impl JobRecord {
    pub(crate) fn new(
        id: JobId,
        descriptor: Descriptor,
        name: String,
        target_path: PathBuf,
    ) -> Self {
        Self {
            id,
            descriptor,
            name,
            target_path,
            state: JobState::Requested,
            paused: false,
            done: false,
            force_stopped: false,
            progress: 0.0,
            downloaded_floor: 0,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn to_persisted(&self) -> PersistedJob {
        PersistedJob {
            descriptor: self.descriptor.clone(),
            id: self.id.clone(),
            name: self.name.clone(),
            paused: self.paused,
            target_path: self.target_path.clone(),
            progress: if self.done { 1.0 } else { self.progress },
            restore_failures: 0,
        }
    }
}

/// Latest figures observed while building a snapshot.
#[derive(Debug, Clone)]
pub(crate) struct Observation {
    pub(crate) id: JobId,
    pub(crate) downloaded_bytes: u64,
    pub(crate) progress: f64,
}

#[derive(Debug, Default)]
pub(crate) struct JobRegistry {
    entries: RwLock<HashMap<JobId, JobRecord>>,
}

impl JobRegistry {
    /// Insert a record; returns `false` and leaves the registry untouched when
    /// the id is already present.
    pub(crate) async fn insert(&self, record: JobRecord) -> bool {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&record.id) {
            return false;
        }
        entries.insert(record.id.clone(), record);
        true
    }

    pub(crate) async fn contains(&self, id: &JobId) -> bool {
        self.entries.read().await.contains_key(id)
    }

    pub(crate) async fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.entries.read().await.get(id).cloned()
    }

    pub(crate) async fn update<R>(
        &self,
        id: &JobId,
        apply: impl FnOnce(&mut JobRecord) -> R,
    ) -> Option<R> {
        self.entries.write().await.get_mut(id).map(apply)
    }

    pub(crate) async fn remove(&self, id: &JobId) -> Option<JobRecord> {
        self.entries.write().await.remove(id)
    }

    pub(crate) async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        count
    }

    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Records in admission order.
    pub(crate) async fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.entries.read().await.values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        records
    }

    pub(crate) async fn persisted(&self) -> Vec<PersistedJob> {
        self.list()
            .await
            .iter()
            .map(JobRecord::to_persisted)
            .collect()
    }

    /// Raise byte floors and progress; values never move backwards. Returns
    /// whether any persisted progress changed.
    pub(crate) async fn observe(&self, observations: Vec<Observation>) -> bool {
        let mut entries = self.entries.write().await;
        let mut progressed = false;
        for observation in observations {
            if let Some(record) = entries.get_mut(&observation.id) {
                record.downloaded_floor = record.downloaded_floor.max(observation.downloaded_bytes);
                if observation.progress > record.progress {
                    record.progress = observation.progress;
                    progressed = true;
                }
            }
        }
        progressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> JobRecord {
        JobRecord::new(
            JobId::new(id),
            Descriptor::magnet(format!("magnet:?xt=urn:btih:{id}")),
            id.to_string(),
            PathBuf::from("/downloads"),
        )
    }

    #[tokio::test]
    async fn duplicate_insert_is_refused() {
        let registry = JobRegistry::default();
        assert!(registry.insert(record("a")).await);
        assert!(!registry.insert(record("a")).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn list_keeps_admission_order() {
        let registry = JobRegistry::default();
        for id in ["c", "a", "b"] {
            registry.insert(record(id)).await;
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let ids: Vec<String> = registry
            .list()
            .await
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[tokio::test]
    async fn observations_never_lower_the_floor() {
        let registry = JobRegistry::default();
        let id = JobId::new("a");
        registry.insert(record("a")).await;
        let mut changes = Vec::new();
        for (bytes, progress) in [(500, 0.5), (200, 0.2)] {
            changes.push(
                registry
                    .observe(vec![Observation {
                        id: id.clone(),
                        downloaded_bytes: bytes,
                        progress,
                    }])
                    .await,
            );
        }
        assert_eq!(changes, [true, false]);
        let stored = registry.get(&id).await.expect("record");
        assert_eq!(stored.downloaded_floor, 500);
        assert!((stored.progress - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn done_jobs_persist_full_progress() {
        let mut record = record("a");
        record.done = true;
        record.paused = true;
        let persisted = record.to_persisted();
        assert!(persisted.is_complete());
        assert!(persisted.paused);
    }
}
