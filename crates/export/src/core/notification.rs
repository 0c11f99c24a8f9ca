//! Completion notifications.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ExportResult;
use crate::types::{JobRecord, JobStatus};

/// Published once when a job reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJobCompleted {
    /// The job id.
    pub job_id: String,
    /// Terminal status.
    pub status: JobStatus,
    /// When the job was queued.
    pub queued_time: DateTime<Utc>,
    /// When the job finished.
    pub end_time: Option<DateTime<Utc>>,
    /// Bytes committed across every output file.
    pub total_bytes: u64,
    /// Whether output was anonymized.
    pub anonymized: bool,
    /// Failure reason, for failed jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl ExportJobCompleted {
    /// Builds the event from a terminal record.
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.id.clone(),
            status: record.status,
            queued_time: record.queued_time,
            end_time: record.end_time,
            total_bytes: record.total_committed_bytes(),
            anonymized: record.anonymization.is_some(),
            failure_reason: record.failure_details.as_ref().map(|d| d.reason.clone()),
        }
    }
}

/// Receives completion events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Publishes `event`.
    async fn publish(&self, event: &ExportJobCompleted, cancel: &CancellationToken)
    -> ExportResult<()>;
}
