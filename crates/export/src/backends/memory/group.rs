//! In-memory group membership.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::core::GroupMemberResolver;
use crate::error::{ExportError, ExportResult};

/// Resolves groups from a fixed membership table.
///
/// Membership does not change over time, so the as-of instant is ignored.
#[derive(Debug, Default)]
pub struct InMemoryGroupResolver {
    groups: RwLock<HashMap<String, BTreeSet<String>>>,
    resolve_count: AtomicUsize,
}

impl InMemoryGroupResolver {
    /// Creates a resolver without groups.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a group, builder style.
    pub fn with_group<I, S>(self, group_id: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_group(group_id, members);
        self
    }

    /// Adds or replaces a group.
    pub fn set_group<I, S>(&self, group_id: impl Into<String>, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.write().insert(
            group_id.into(),
            members.into_iter().map(Into::into).collect(),
        );
    }

    /// Returns the number of `resolve` calls received so far.
    pub fn resolve_count(&self) -> usize {
        self.resolve_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroupMemberResolver for InMemoryGroupResolver {
    async fn resolve(
        &self,
        group_id: &str,
        _as_of: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> ExportResult<BTreeSet<String>> {
        self.resolve_count.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        self.groups
            .read()
            .get(group_id)
            .cloned()
            .ok_or_else(|| ExportError::ResourceNotFound {
                message: format!("Group/{} does not exist", group_id),
                user_correctable: true,
            })
    }
}
