//! The persisted descriptor of an export job.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StatusClass;

use super::filter::ResourceFilter;
use super::progress::ExportJobProgress;

/// Status of an export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created by the scheduler, not yet picked up by a worker.
    #[default]
    Queued,
    /// A worker is executing the job.
    Running,
    /// Every page was exported.
    Completed,
    /// The job stopped on an error; see [`JobRecord::failure_details`].
    Failed,
    /// The job was cancelled.
    Canceled,
}

impl JobStatus {
    /// Returns true if the job is in a terminal state (completed, failed, or canceled).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Scope of an export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportType {
    /// Every resource in the system (`[base]/$export`).
    #[default]
    All,
    /// Every patient and their compartments (`[base]/Patient/$export`).
    Patient,
    /// The members of one group and their compartments (`[base]/Group/[id]/$export`).
    Group,
}

impl ExportType {
    /// Returns true for exports that walk patient compartments.
    pub fn is_patient_centric(&self) -> bool {
        matches!(self, Self::Patient | Self::Group)
    }
}

impl fmt::Display for ExportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Patient => write!(f, "patient"),
            Self::Group => write!(f, "group"),
        }
    }
}

/// One committed output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFileInfo {
    /// Resource type stored in the file.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Location of the file in the destination.
    pub file_uri: String,
    /// Position of the file among the files of its type, starting at 1.
    pub sequence: u32,
    /// Number of resources committed to the file.
    pub count: u64,
    /// Number of bytes committed to the file.
    pub committed_bytes: u64,
}

impl ExportFileInfo {
    /// Creates an empty file entry.
    pub fn new(
        resource_type: impl Into<String>,
        file_uri: impl Into<String>,
        sequence: u32,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            file_uri: file_uri.into(),
            sequence,
            count: 0,
            committed_bytes: 0,
        }
    }

    /// Records a successful commit of `count` resources totalling `bytes`.
    pub fn record_commit(&mut self, count: u64, bytes: u64) {
        self.count += count;
        self.committed_bytes += bytes;
    }
}

/// A diagnostic entry attached to the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationIssue {
    /// `fatal`, `error`, `warning`, or `information`.
    pub severity: String,
    /// Issue type code, e.g. `exception`.
    pub code: String,
    /// Human-readable detail.
    pub diagnostics: String,
}

impl OperationIssue {
    /// Creates an `error` issue.
    pub fn error(code: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self {
            severity: "error".to_string(),
            code: code.into(),
            diagnostics: diagnostics.into(),
        }
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetails {
    /// Reason shown to the client.
    pub reason: String,
    /// Status class of the failure.
    pub status_class: StatusClass,
    /// Internal detail, kept for operators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

impl FailureDetails {
    /// Creates failure details without diagnostics.
    pub fn new(reason: impl Into<String>, status_class: StatusClass) -> Self {
        Self {
            reason: reason.into(),
            status_class,
            diagnostics: None,
        }
    }

    /// Attaches diagnostics.
    pub fn with_diagnostics(mut self, diagnostics: impl Into<String>) -> Self {
        self.diagnostics = Some(diagnostics.into());
        self
    }
}

/// Inclusive range of surrogate ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurrogateIdRange {
    /// First id in the range.
    pub start: i64,
    /// Last id in the range.
    pub end: i64,
}

/// Where to load the anonymization configuration from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymizationConfig {
    /// Location of the configuration document.
    pub location: String,
    /// Expected entity tag of the document, if pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// The persisted state of one export job.
///
/// The scheduler creates the record; the export task mutates a local copy and
/// persists it through [`JobStore`](crate::core::JobStore) at every checkpoint.
/// `progress` is `None` until the job has started once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Job id; also the correlation id and the output folder.
    pub id: String,
    /// Current status.
    #[serde(default)]
    pub status: JobStatus,
    /// When the scheduler queued the job.
    pub queued_time: DateTime<Utc>,
    /// When the job first started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Number of times the job was resumed after an interruption.
    #[serde(default)]
    pub restart_count: u32,
    /// Scope of the export.
    #[serde(default)]
    pub export_type: ExportType,

    /// Requested resource types; empty means every type.
    #[serde(default)]
    pub resource_types: Vec<String>,
    /// Exported group; required for group exports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Only export resources updated at or after this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    /// Only export resources updated at or before this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub till: Option<DateTime<Utc>>,

    /// Surrogate-id bounds of the whole job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_surrogate_range: Option<SurrogateIdRange>,
    /// Surrogate-id bounds assigned to this worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_surrogate_range: Option<SurrogateIdRange>,
    /// Partition key range of the backing store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_range: Option<String>,

    /// Destination pinned by the request; overrides the worker's destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_uri: Option<String>,
    /// Hash of the worker connection the job was created against.
    #[serde(default)]
    pub connection_hash: String,
    /// Destination container; the worker default is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    /// Type filters, run before the unfiltered phase.
    #[serde(default)]
    pub filters: Vec<ResourceFilter>,
    /// Committed files per resource type.
    #[serde(default)]
    pub output: BTreeMap<String, Vec<ExportFileInfo>>,
    /// Diagnostics collected while running.
    #[serde(default)]
    pub issues: Vec<OperationIssue>,
    /// Set when the job failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_details: Option<FailureDetails>,
    /// Resumable progress; `None` until the job has started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ExportJobProgress>,

    /// Export historical versions too.
    #[serde(default)]
    pub include_history: bool,
    /// Export soft-deleted resources too.
    #[serde(default)]
    pub include_deleted: bool,
    /// Anonymize output with this configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymization: Option<AnonymizationConfig>,
}

impl JobRecord {
    /// Creates a queued job with a fresh id.
    pub fn new(export_type: ExportType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Queued,
            queued_time: Utc::now(),
            start_time: None,
            end_time: None,
            restart_count: 0,
            export_type,
            resource_types: Vec::new(),
            group_id: None,
            since: None,
            till: None,
            global_surrogate_range: None,
            segment_surrogate_range: None,
            feed_range: None,
            destination_uri: None,
            connection_hash: String::new(),
            container_name: None,
            filters: Vec::new(),
            output: BTreeMap::new(),
            issues: Vec::new(),
            failure_details: None,
            progress: None,
            include_history: false,
            include_deleted: false,
            anonymization: None,
        }
    }

    /// Sets the requested resource types.
    pub fn with_resource_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the type filters.
    pub fn with_filters(mut self, filters: Vec<ResourceFilter>) -> Self {
        self.filters = filters;
        self
    }

    /// Sets the exported group.
    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Sets the connection hash.
    pub fn with_connection_hash(mut self, hash: impl Into<String>) -> Self {
        self.connection_hash = hash.into();
        self
    }

    /// Returns the upper last-updated bound: `till`, or the queue time.
    pub fn till_or_queued(&self) -> DateTime<Utc> {
        self.till.unwrap_or(self.queued_time)
    }

    /// Returns true if `resource_type` was requested, treating an empty
    /// request as "every type".
    pub fn is_type_requested(&self, resource_type: &str) -> bool {
        self.resource_types.is_empty() || self.resource_types.iter().any(|t| t == resource_type)
    }

    /// Returns the bytes committed across every output file.
    pub fn total_committed_bytes(&self) -> u64 {
        self.output
            .values()
            .flatten()
            .map(|file| file.committed_bytes)
            .sum()
    }

    /// Returns the number of committed output files.
    pub fn output_file_count(&self) -> usize {
        self.output.values().map(Vec::len).sum()
    }
}
