//! The three-tier search strategy.
//!
//! An export runs in phases, each paged to exhaustion:
//!
//! 1. **Filtered**: one search per applicable `_typeFilter`.
//! 2. **Unfiltered**: one search over the requested types not already
//!    covered by a filter (all exports), or over `Patient` (patient and group
//!    exports).
//! 3. **Compartment** (patient and group exports): for every patient found by
//!    the first two phases, a filtered-then-unfiltered search of the
//!    patient's compartment.
//!
//! The top-level loop checkpoints after every page: the buffered output is
//! committed and the job record persisted. Compartment scans only commit the
//! buffers that outgrew the rolling file size and leave persistence to the
//! enclosing page.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::SecondsFormat;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::{
    GroupMemberResolver, JobStore, SearchOptions, SearchPage, SearchService, VersionTag,
};
use crate::error::{ExportError, ExportResult};
use crate::types::search_params::names;
use crate::types::{
    ExportJobProgress, ExportType, JobRecord, QueryParameters, ResourceFilter, ResourceWrapper,
};

use super::materialize::ResourceMaterializer;
use super::output::OutputWriter;

const PATIENT: &str = "Patient";

/// Builds the parameters every search of `record` carries.
pub fn shared_query_parameters(record: &JobRecord, page_size: u32) -> QueryParameters {
    let mut params = QueryParameters::new()
        .with(names::COUNT, page_size.to_string())
        .with(
            names::LAST_UPDATED,
            format!(
                "le{}",
                record
                    .till_or_queued()
                    .to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
        );

    if let Some(since) = record.since {
        params.push(
            names::LAST_UPDATED,
            format!("ge{}", since.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
    }
    if let Some(range) = &record.global_surrogate_range {
        params.push(names::GLOBAL_START_SURROGATE_ID, range.start.to_string());
        params.push(names::GLOBAL_END_SURROGATE_ID, range.end.to_string());
    }
    if let Some(range) = &record.segment_surrogate_range {
        params.push(names::START_SURROGATE_ID, range.start.to_string());
        params.push(names::END_SURROGATE_ID, range.end.to_string());
    }
    if let Some(feed_range) = &record.feed_range {
        params.push(names::FEED_RANGE, feed_range.clone());
    }
    params
}

/// Parameters of compartment searches: the shared set without the
/// partitioning bounds, which only apply to the top-level scan.
fn compartment_query_parameters(shared: &QueryParameters) -> QueryParameters {
    shared.without(&[
        names::GLOBAL_START_SURROGATE_ID,
        names::GLOBAL_END_SURROGATE_ID,
        names::START_SURROGATE_ID,
        names::END_SURROGATE_ID,
        names::FEED_RANGE,
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Job,
    Compartment,
}

/// Collaborators and settings the driver runs against.
pub(crate) struct SearchContext {
    pub(crate) search: Arc<dyn SearchService>,
    pub(crate) job_store: Arc<dyn JobStore>,
    pub(crate) group_resolver: Arc<dyn GroupMemberResolver>,
    pub(crate) materializer: ResourceMaterializer,
    pub(crate) shared_params: QueryParameters,
    /// Compartment scans flush buffers larger than this.
    pub(crate) rolling_file_size: u64,
}

/// Pages through the phases of one export job.
///
/// The driver survives retries: [`run`](Self::run) can be called again after
/// a failure and continues from the progress held in the record, with any
/// output still buffered in the writer.
pub(crate) struct SearchDriver<'a> {
    record: &'a mut JobRecord,
    version: &'a mut VersionTag,
    writer: OutputWriter,
    ctx: SearchContext,
    group_members: Option<BTreeSet<String>>,
    cancel: &'a CancellationToken,
}

impl<'a> SearchDriver<'a> {
    pub(crate) fn new(
        record: &'a mut JobRecord,
        version: &'a mut VersionTag,
        writer: OutputWriter,
        ctx: SearchContext,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            record,
            version,
            writer,
            ctx,
            group_members: None,
            cancel,
        }
    }

    /// Runs every remaining phase of the job and commits the remaining
    /// output.
    ///
    /// An exhausted segment ends the run early; whatever was read up to that
    /// point is still committed before the signal is passed on.
    pub(crate) async fn run(&mut self) -> ExportResult<()> {
        match self.run_phases().await {
            Ok(()) => {}
            Err(ExportError::SegmentCompleted) => {
                info!("Export segment completed, committing buffered output");
                self.writer
                    .commit_all(&mut self.record.output, self.cancel)
                    .await?;
                return Err(ExportError::SegmentCompleted);
            }
            Err(e) => return Err(e),
        }

        self.writer
            .commit_all(&mut self.record.output, self.cancel)
            .await
    }

    async fn run_phases(&mut self) -> ExportResult<()> {
        for filter in self.job_filters() {
            if self.progress_mut(Scope::Job)?.is_filter_completed(&filter) {
                continue;
            }
            debug!(filter = %filter, "Exporting filtered resources");

            self.progress_mut(Scope::Job)?.set_filter(filter.clone());
            let mut params = self.ctx.shared_params.clone();
            params.extend(&filter.parameters);
            self.run_paged(Some(&filter.resource_type), &params).await?;

            self.progress_mut(Scope::Job)?.mark_filter_finished();
            self.checkpoint().await?;
        }

        if let Some(types) = self.unfiltered_types() {
            debug!(types = ?types, "Exporting unfiltered resources");
            let mut params = self.ctx.shared_params.clone();
            if !types.is_empty() {
                params.push(names::TYPE, types.join(","));
            }
            self.run_paged(None, &params).await?;
        }
        Ok(())
    }

    /// Filters applicable to the top-level scan.
    fn job_filters(&self) -> Vec<ResourceFilter> {
        let patient_centric = self.record.export_type.is_patient_centric();
        self.record
            .filters
            .iter()
            .filter(|f| self.record.resource_types.contains(&f.resource_type))
            .filter(|f| !patient_centric || f.resource_type == PATIENT)
            .cloned()
            .collect()
    }

    /// Types of the unfiltered top-level phase; `None` when every required
    /// type is covered by a filter, an empty list for "every type".
    fn unfiltered_types(&self) -> Option<Vec<String>> {
        let filtered: BTreeSet<String> = self
            .job_filters()
            .into_iter()
            .map(|f| f.resource_type)
            .collect();

        if self.record.export_type.is_patient_centric() {
            return (!filtered.contains(PATIENT)).then(|| vec![PATIENT.to_string()]);
        }

        if self.record.resource_types.is_empty() {
            return Some(Vec::new());
        }
        let remaining: Vec<String> = self
            .record
            .resource_types
            .iter()
            .filter(|t| !filtered.contains(*t))
            .cloned()
            .collect();
        (!remaining.is_empty()).then_some(remaining)
    }

    /// Top-level pagination loop.
    async fn run_paged(
        &mut self,
        resource_type: Option<&str>,
        params: &QueryParameters,
    ) -> ExportResult<()> {
        while self.progress_mut(Scope::Job)?.has_more_results() {
            self.ensure_not_cancelled()?;

            let mut query = params.clone();
            if let Some(token) = self.progress_mut(Scope::Job)?.continuation_token()? {
                query.push(names::CONTINUATION_TOKEN, token);
            }
            let page = self.fetch(resource_type, query).await?;
            let page_token = page.continuation_token.clone();

            if self.record.export_type.is_patient_centric() {
                self.export_patients(page.results).await?;
            } else {
                self.write_results(&page.results)?;
            }

            self.progress_mut(Scope::Job)?
                .update_continuation_token(page_token.as_deref());
            self.checkpoint().await?;
        }
        Ok(())
    }

    /// Writes a page of patients and scans each patient's compartment.
    async fn export_patients(&mut self, results: Vec<ResourceWrapper>) -> ExportResult<()> {
        let resuming = self
            .progress_mut(Scope::Job)?
            .sub_search()
            .and_then(|s| s.triggering_resource_id().map(str::to_string));

        // A page re-fetched with a compartment scan in flight was already
        // written when it was first fetched.
        if resuming.is_none() && self.record.is_type_requested(PATIENT) {
            self.write_results(&results)?;
        }

        let patients: Vec<&ResourceWrapper> =
            results.iter().filter(|r| r.resource_type == PATIENT).collect();

        let start = match &resuming {
            Some(trigger) => {
                let position = patients
                    .iter()
                    .position(|p| &p.id == trigger)
                    .ok_or_else(|| {
                        ExportError::internal(format!(
                            "patient {} of the interrupted compartment scan is missing \
                             from the re-fetched page",
                            trigger
                        ))
                    })?;
                info!(patient_id = %trigger, skipped = position, "Resuming compartment scan");
                position
            }
            None => 0,
        };

        for patient in &patients[start..] {
            self.ensure_not_cancelled()?;
            let progress = self.progress_mut(Scope::Job)?;
            if progress.sub_search().is_none() {
                progress.new_sub_search(patient.id.clone());
            }
            self.export_compartment(&patient.id).await?;
            self.progress_mut(Scope::Job)?.clear_sub_search();
        }
        Ok(())
    }

    /// Filtered-then-unfiltered scan of one patient's compartment.
    async fn export_compartment(&mut self, patient_id: &str) -> ExportResult<()> {
        let base = compartment_query_parameters(&self.ctx.shared_params);

        let filters: Vec<ResourceFilter> = self
            .record
            .filters
            .iter()
            .filter(|f| f.resource_type != PATIENT)
            .filter(|f| self.record.resource_types.contains(&f.resource_type))
            .cloned()
            .collect();

        for filter in &filters {
            if self
                .progress_mut(Scope::Compartment)?
                .is_filter_completed(filter)
            {
                continue;
            }
            self.progress_mut(Scope::Compartment)?.set_filter(filter.clone());
            let mut params = base.clone();
            params.extend(&filter.parameters);
            self.run_compartment_paged(patient_id, Some(&filter.resource_type), &params)
                .await?;
            self.progress_mut(Scope::Compartment)?.mark_filter_finished();
        }

        let filtered: BTreeSet<&str> = filters.iter().map(|f| f.resource_type.as_str()).collect();
        let mut params = base;
        if !self.record.resource_types.is_empty() {
            let types: Vec<&str> = self
                .record
                .resource_types
                .iter()
                .map(String::as_str)
                .filter(|t| *t != PATIENT && !filtered.contains(t))
                .collect();
            if types.is_empty() {
                return Ok(());
            }
            params.push(names::TYPE, types.join(","));
        }
        self.run_compartment_paged(patient_id, None, &params).await
    }

    /// Compartment pagination loop.
    async fn run_compartment_paged(
        &mut self,
        patient_id: &str,
        resource_type: Option<&str>,
        params: &QueryParameters,
    ) -> ExportResult<()> {
        while self.progress_mut(Scope::Compartment)?.has_more_results() {
            self.ensure_not_cancelled()?;

            let mut query = params.clone();
            if let Some(token) = self.progress_mut(Scope::Compartment)?.continuation_token()? {
                query.push(names::CONTINUATION_TOKEN, token);
            }
            let page = self
                .ctx
                .search
                .search_compartment(
                    PATIENT,
                    patient_id,
                    resource_type,
                    &query,
                    self.search_options(),
                    self.cancel,
                )
                .await?;

            self.write_results(&page.results)?;
            self.progress_mut(Scope::Compartment)?
                .update_continuation_token(page.continuation_token.as_deref());
            self.writer
                .commit_full(&mut self.record.output, self.ctx.rolling_file_size, self.cancel)
                .await?;
        }
        Ok(())
    }

    /// Fetches one top-level page, restricting group exports to members.
    async fn fetch(
        &mut self,
        resource_type: Option<&str>,
        mut query: QueryParameters,
    ) -> ExportResult<SearchPage> {
        if self.record.export_type == ExportType::Group
            && !query.contains(names::ID)
            && !query.contains(names::CONTINUATION_TOKEN)
        {
            let members = self.group_members().await?;
            if members.is_empty() {
                debug!("Group has no members");
                return Ok(SearchPage::empty());
            }
            let ids: Vec<&str> = members.iter().map(String::as_str).collect();
            query.push(names::ID, ids.join(","));
        }

        self.ctx
            .search
            .search(resource_type, &query, self.search_options(), self.cancel)
            .await
    }

    /// Resolves the group members once per invocation.
    async fn group_members(&mut self) -> ExportResult<&BTreeSet<String>> {
        if self.group_members.is_none() {
            let group_id = self
                .record
                .group_id
                .as_deref()
                .ok_or_else(|| ExportError::bad_request("group export has no group id"))?;
            let as_of = self.record.till_or_queued();
            let members = self
                .ctx
                .group_resolver
                .resolve(group_id, as_of, self.cancel)
                .await?;
            info!(group_id = %group_id, members = members.len(), "Resolved group members");
            self.group_members = Some(members);
        }
        self.group_members
            .as_ref()
            .ok_or_else(|| ExportError::internal("group members not resolved"))
    }

    fn write_results(&mut self, results: &[ResourceWrapper]) -> ExportResult<()> {
        for resource in results {
            let line = self.ctx.materializer.materialize(resource)?;
            self.writer.write(&resource.resource_type, &line);
        }
        Ok(())
    }

    /// Commits all buffered output and persists the record.
    async fn checkpoint(&mut self) -> ExportResult<()> {
        self.writer
            .commit_all(&mut self.record.output, self.cancel)
            .await?;
        let outcome = self
            .ctx
            .job_store
            .update(&*self.record, &*self.version, self.cancel)
            .await?;
        *self.version = outcome.version;
        Ok(())
    }

    fn progress_mut(&mut self, scope: Scope) -> ExportResult<&mut ExportJobProgress> {
        let progress = self
            .record
            .progress
            .as_mut()
            .ok_or_else(|| ExportError::internal("export job has no progress"))?;
        match scope {
            Scope::Job => Ok(progress),
            Scope::Compartment => progress
                .sub_search_mut()
                .ok_or_else(|| ExportError::internal("no compartment scan in flight")),
        }
    }

    fn search_options(&self) -> SearchOptions {
        SearchOptions {
            include_history: self.record.include_history,
            include_deleted: self.record.include_deleted,
        }
    }

    fn ensure_not_cancelled(&self) -> ExportResult<()> {
        if self.cancel.is_cancelled() {
            Err(ExportError::Cancelled)
        } else {
            Ok(())
        }
    }
}
