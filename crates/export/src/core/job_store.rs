//! Job record persistence.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ExportResult;
use crate::types::JobRecord;

/// Opaque version tag used for optimistic concurrency on job records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionTag(String);

impl VersionTag {
    /// Creates a version tag from the store's representation.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the tag as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job record as stored, together with its current version tag.
#[derive(Debug, Clone)]
pub struct JobRecordOutcome {
    /// The stored record.
    pub record: JobRecord,
    /// The tag to present on the next update.
    pub version: VersionTag,
}

/// Storage for export job records.
///
/// Every update carries the caller's version tag. The store must reject the
/// update with [`ExportError::JobConflict`](crate::ExportError::JobConflict)
/// when the tag no longer matches, and with
/// [`ExportError::RecordTooLarge`](crate::ExportError::RecordTooLarge) when the
/// serialized record exceeds its size limit.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Replaces the stored record if `version` is still current.
    async fn update(
        &self,
        record: &JobRecord,
        version: &VersionTag,
        cancel: &CancellationToken,
    ) -> ExportResult<JobRecordOutcome>;
}
