//! In-memory job store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::{JobRecordOutcome, JobStore, VersionTag};
use crate::error::{ExportError, ExportResult};
use crate::types::JobRecord;

#[derive(Debug, Clone)]
struct StoredJob {
    record: JobRecord,
    version: u64,
}

/// Job store keeping records in memory.
///
/// Every successful update is also appended to a per-job history, so callers
/// can inspect each checkpoint a job went through. Records with a terminal
/// status are immutable.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<String, StoredJob>>,
    history: Mutex<HashMap<String, Vec<JobRecord>>>,
    max_record_bytes: Option<usize>,
}

impl InMemoryJobStore {
    /// Creates an empty store without a record size limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects records whose JSON form exceeds `max` bytes.
    pub fn with_max_record_bytes(mut self, max: usize) -> Self {
        self.max_record_bytes = Some(max);
        self
    }

    /// Stores a new record and returns its version tag.
    pub fn insert(&self, record: JobRecord) -> VersionTag {
        let mut jobs = self.jobs.lock();
        jobs.insert(record.id.clone(), StoredJob { record, version: 1 });
        tag(1)
    }

    /// Returns the stored record and its version tag.
    pub fn get(&self, id: &str) -> Option<JobRecordOutcome> {
        self.jobs.lock().get(id).map(|job| JobRecordOutcome {
            record: job.record.clone(),
            version: tag(job.version),
        })
    }

    /// Returns every record version stored through [`JobStore::update`], oldest first.
    pub fn history(&self, id: &str) -> Vec<JobRecord> {
        self.history.lock().get(id).cloned().unwrap_or_default()
    }

    /// Overwrites a record as another worker would, invalidating the
    /// current version tag.
    pub fn replace(&self, record: JobRecord) -> VersionTag {
        let mut jobs = self.jobs.lock();
        let version = jobs.get(&record.id).map_or(1, |job| job.version + 1);
        jobs.insert(record.id.clone(), StoredJob { record, version });
        tag(version)
    }
}

fn tag(version: u64) -> VersionTag {
    VersionTag::new(format!("W/\"{}\"", version))
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn update(
        &self,
        record: &JobRecord,
        version: &VersionTag,
        cancel: &CancellationToken,
    ) -> ExportResult<JobRecordOutcome> {
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        if let Some(max) = self.max_record_bytes {
            let size = serde_json::to_vec(record)?.len();
            if size > max {
                return Err(ExportError::RecordTooLarge {
                    job_id: record.id.clone(),
                    size,
                });
            }
        }

        let new_version = {
            let mut jobs = self.jobs.lock();
            let stored = jobs.get_mut(&record.id).ok_or_else(|| {
                ExportError::internal(format!("export job {} does not exist", record.id))
            })?;

            if tag(stored.version) != *version || stored.record.status.is_terminal() {
                return Err(ExportError::JobConflict {
                    job_id: record.id.clone(),
                });
            }

            stored.version += 1;
            stored.record = record.clone();
            stored.version
        };

        self.history
            .lock()
            .entry(record.id.clone())
            .or_default()
            .push(record.clone());

        Ok(JobRecordOutcome {
            record: record.clone(),
            version: tag(new_version),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExportType, JobStatus};

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = InMemoryJobStore::new();
        let mut record = JobRecord::new(ExportType::All);
        let v1 = store.insert(record.clone());

        record.status = JobStatus::Running;
        let outcome = store.update(&record, &v1, &CancellationToken::new()).await.unwrap();

        assert_ne!(outcome.version, v1);
        assert_eq!(store.get(&record.id).unwrap().record.status, JobStatus::Running);
        assert_eq!(store.history(&record.id).len(), 1);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = InMemoryJobStore::new();
        let record = JobRecord::new(ExportType::All);
        let v1 = store.insert(record.clone());
        store.replace(record.clone());

        let err = store
            .update(&record, &v1, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::JobConflict { .. }));
    }

    #[tokio::test]
    async fn test_terminal_records_are_immutable() {
        let store = InMemoryJobStore::new();
        let mut record = JobRecord::new(ExportType::All);
        let v1 = store.insert(record.clone());
        record.status = JobStatus::Completed;
        let v2 = store
            .update(&record, &v1, &CancellationToken::new())
            .await
            .unwrap()
            .version;

        record.status = JobStatus::Running;
        let err = store
            .update(&record, &v2, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::JobConflict { .. }));
    }

    #[tokio::test]
    async fn test_size_limit() {
        let store = InMemoryJobStore::new().with_max_record_bytes(10);
        let record = JobRecord::new(ExportType::All);
        let v1 = store.insert(record.clone());
        let err = store
            .update(&record, &v1, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::RecordTooLarge { .. }));
    }
}
