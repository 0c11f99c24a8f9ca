//! The search service the export pages through.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ExportResult;
use crate::types::{QueryParameters, ResourceWrapper};

/// Version flags forwarded with every search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Include historical versions.
    pub include_history: bool,
    /// Include soft-deleted resources.
    pub include_deleted: bool,
}

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    /// Matched resources, in backend order.
    pub results: Vec<ResourceWrapper>,
    /// Token of the next page; `None` on the last page.
    pub continuation_token: Option<String>,
}

impl SearchPage {
    /// A page with no results and no next page.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Paged search over stored resources.
///
/// Implementations must return identical results in identical order for
/// repeated identical queries (same parameters, same continuation token).
/// Resuming a compartment scan mid-page depends on it.
#[async_trait]
pub trait SearchService: Send + Sync {
    /// Searches across the store, optionally restricted to one type.
    ///
    /// Without a type, the `_type` parameter (comma-joined) restricts the
    /// types searched.
    async fn search(
        &self,
        resource_type: Option<&str>,
        params: &QueryParameters,
        options: SearchOptions,
        cancel: &CancellationToken,
    ) -> ExportResult<SearchPage>;

    /// Searches inside the compartment of one resource, e.g.
    /// `Patient/123/*`.
    async fn search_compartment(
        &self,
        compartment_type: &str,
        compartment_id: &str,
        resource_type: Option<&str>,
        params: &QueryParameters,
        options: SearchOptions,
        cancel: &CancellationToken,
    ) -> ExportResult<SearchPage>;
}
