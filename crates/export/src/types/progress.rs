//! Resumable progress of an export job.
//!
//! [`ExportJobProgress`] is persisted inside the job record at every
//! checkpoint. It records which phase of the export is running (which type
//! filter, or the unfiltered phase), the cursor inside that phase, and, for
//! patient-centric exports, the compartment scan currently in flight.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::error::ExportResult;

use super::filter::ResourceFilter;

/// Cursor and phase state of an export job, or of one compartment scan nested
/// inside it.
///
/// # Phases
///
/// Filters run first, one at a time, each until the backend stops returning a
/// continuation token; then the unfiltered phase runs. Finishing a filter
/// resets the cursor so the next phase starts at page 0.
///
/// # Nested scans
///
/// While a compartment scan is in flight, [`sub_search`](Self::sub_search)
/// holds its progress and the parent's continuation token is left untouched
/// until [`clear_sub_search`](Self::clear_sub_search) is called.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJobProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    continuation_token: Option<String>,

    #[serde(default)]
    page: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_filter: Option<ResourceFilter>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    completed_filters: Vec<ResourceFilter>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub_search: Option<Box<ExportJobProgress>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    triggering_resource_id: Option<String>,
}

impl ExportJobProgress {
    /// Creates progress for a job that has not fetched any page yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates progress for a compartment scan triggered by `resource_id`.
    pub fn for_compartment(resource_id: impl Into<String>) -> Self {
        Self {
            triggering_resource_id: Some(resource_id.into()),
            ..Self::default()
        }
    }

    /// Returns the decoded continuation token of the next page, if any.
    pub fn continuation_token(&self) -> ExportResult<Option<String>> {
        match &self.continuation_token {
            Some(encoded) => {
                let bytes = URL_SAFE_NO_PAD.decode(encoded)?;
                let token = String::from_utf8(bytes).map_err(|e| {
                    crate::error::ExportError::Serialization {
                        message: format!("continuation token is not valid UTF-8: {}", e),
                    }
                })?;
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }

    /// Returns the number of pages fetched in the current phase.
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Returns true while the current phase still has pages to fetch.
    ///
    /// A phase always fetches at least one page, even when a previous phase
    /// returned nothing.
    pub fn has_more_results(&self) -> bool {
        self.continuation_token.is_some() || self.page == 0
    }

    /// Stores the token returned with the page just fetched and advances the
    /// page counter. `None` marks the end of the current phase.
    pub fn update_continuation_token(&mut self, token: Option<&str>) {
        self.continuation_token = token.map(|t| URL_SAFE_NO_PAD.encode(t.as_bytes()));
        self.page += 1;
    }

    /// Returns the filter currently being exported.
    pub fn current_filter(&self) -> Option<&ResourceFilter> {
        self.current_filter.as_ref()
    }

    /// Marks `filter` as the one currently being exported. Setting the filter
    /// that is already current leaves the cursor untouched.
    pub fn set_filter(&mut self, filter: ResourceFilter) {
        self.current_filter = Some(filter);
    }

    /// Moves the current filter into the completed set and resets the cursor
    /// for the next phase.
    pub fn mark_filter_finished(&mut self) {
        if let Some(filter) = self.current_filter.take()
            && !self.completed_filters.contains(&filter)
        {
            self.completed_filters.push(filter);
        }
        self.continuation_token = None;
        self.page = 0;
    }

    /// Returns true if `filter` has been exported to exhaustion.
    pub fn is_filter_completed(&self, filter: &ResourceFilter) -> bool {
        self.completed_filters.contains(filter)
    }

    /// Returns the filters exported to exhaustion, in completion order.
    pub fn completed_filters(&self) -> &[ResourceFilter] {
        &self.completed_filters
    }

    /// Starts a nested compartment scan for `resource_id` and returns its
    /// progress. The parent cursor is not modified.
    pub fn new_sub_search(&mut self, resource_id: impl Into<String>) -> &mut ExportJobProgress {
        self.sub_search
            .insert(Box::new(ExportJobProgress::for_compartment(resource_id)))
    }

    /// Ends the nested compartment scan.
    pub fn clear_sub_search(&mut self) {
        self.sub_search = None;
    }

    /// Returns the in-flight compartment scan, if any.
    pub fn sub_search(&self) -> Option<&ExportJobProgress> {
        self.sub_search.as_deref()
    }

    /// Returns the in-flight compartment scan mutably, if any.
    pub fn sub_search_mut(&mut self) -> Option<&mut ExportJobProgress> {
        self.sub_search.as_deref_mut()
    }

    /// Returns the id of the resource whose compartment this progress scans.
    pub fn triggering_resource_id(&self) -> Option<&str> {
        self.triggering_resource_id.as_deref()
    }
}
