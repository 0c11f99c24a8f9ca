//! Group membership resolution.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::ExportResult;

/// Resolves the patient members of a group.
#[async_trait]
pub trait GroupMemberResolver: Send + Sync {
    /// Returns the ids of the patients that were members of `group_id` at
    /// `as_of`, following nested groups.
    ///
    /// # Errors
    ///
    /// * `ExportError::ResourceNotFound` - if the group does not exist
    async fn resolve(
        &self,
        group_id: &str,
        as_of: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> ExportResult<BTreeSet<String>>;
}
