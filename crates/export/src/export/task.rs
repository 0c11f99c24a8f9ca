//! The export job orchestrator.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::ExportJobConfig;
use crate::context::{ExportRequestContext, RequestContextAccessor};
use crate::core::{
    AnonymizerFactory, DestinationClient, DestinationConfig, ExportJobCompleted,
    GroupMemberResolver, JobStore, NotificationSink, SearchService, VersionTag,
};
use crate::error::{ExportError, ExportResult, StatusClass};
use crate::types::{
    ExportJobProgress, ExportType, FailureDetails, JobRecord, JobStatus, OperationIssue,
};

use super::materialize::ResourceMaterializer;
use super::output::OutputWriter;
use super::retry::RetryPolicy;
use super::search::{SearchContext, SearchDriver, shared_query_parameters};

/// Failure reason of jobs resumed more often than allowed.
pub const TOO_MANY_RESTARTS_REASON: &str =
    "The export job was restarted too many times and has been stopped.";

/// Failure reason reported for unclassified faults.
pub const GENERIC_FAILURE_REASON: &str =
    "The export job failed due to an internal error. See diagnostics for details.";

/// The collaborators an export task runs against.
#[derive(Clone)]
pub struct ExportServices {
    /// Persistence of job records.
    pub job_store: Arc<dyn JobStore>,
    /// Source of exported resources.
    pub search: Arc<dyn SearchService>,
    /// Group membership lookups for group exports.
    pub group_resolver: Arc<dyn GroupMemberResolver>,
    /// Receives the output files.
    pub destination: Arc<dyn DestinationClient>,
    /// Builds anonymizers; jobs requesting anonymization fail without one.
    pub anonymizer_factory: Option<Arc<dyn AnonymizerFactory>>,
    /// Receives completion events.
    pub notifications: Arc<dyn NotificationSink>,
    /// Ambient request context shared with the collaborators.
    pub context: RequestContextAccessor,
}

/// Executes export jobs.
///
/// # Example
///
/// ```ignore
/// let task = ExportJobTask::new(ExportJobConfig::default(), services);
/// let cancel = CancellationToken::new();
/// let record = task.execute(record, version, &cancel).await?;
/// println!("{} -> {}", record.id, record.status);
/// ```
pub struct ExportJobTask {
    config: ExportJobConfig,
    services: ExportServices,
}

impl ExportJobTask {
    /// Creates a task runner.
    pub fn new(config: ExportJobConfig, services: ExportServices) -> Self {
        Self { config, services }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ExportJobConfig {
        &self.config
    }

    /// Runs `record` until it reaches a terminal status.
    ///
    /// Every failure of the export itself ends up as a terminal status on the
    /// returned record. The only exception is a conflict on the job record:
    /// another worker owns the job, so the record is returned without its
    /// status having been persisted.
    ///
    /// # Errors
    ///
    /// Only a failure to publish the completion notification is returned,
    /// unless it was caused by cancellation.
    pub async fn execute(
        &self,
        record: JobRecord,
        version: VersionTag,
        cancel: &CancellationToken,
    ) -> ExportResult<JobRecord> {
        let span = info_span!(
            "export_job",
            job_id = %record.id,
            export_type = %record.export_type
        );
        self.execute_inner(record, version, cancel)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        mut record: JobRecord,
        mut version: VersionTag,
        cancel: &CancellationToken,
    ) -> ExportResult<JobRecord> {
        if record.restart_count > self.config.max_job_restart_count {
            warn!(
                restart_count = record.restart_count,
                max_restarts = self.config.max_job_restart_count,
                "Export job restarted too many times"
            );
            record.status = JobStatus::Failed;
            record.failure_details = Some(FailureDetails::new(
                TOO_MANY_RESTARTS_REASON,
                StatusClass::InternalServerError,
            ));
            if self
                .persist_terminal(&mut record, &mut version, cancel)
                .await
            {
                self.report_completion(&record, cancel).await?;
            }
            return Ok(record);
        }

        let _context = self
            .services
            .context
            .scope(ExportRequestContext::for_export_job(record.id.clone()));

        let outcome = match self.run_job(&mut record, &mut version, cancel).await {
            Ok(()) | Err(ExportError::SegmentCompleted) => {
                record.status = JobStatus::Completed;
                record.end_time = Some(Utc::now());
                self.persist(&record, &mut version, cancel).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.report_completion(&record, cancel).await?;
            }
            Err(e) => {
                if self
                    .handle_failure(&mut record, &mut version, e, cancel)
                    .await
                {
                    self.report_completion(&record, cancel).await?;
                }
            }
        }
        Ok(record)
    }

    /// Validates the job, starts it, and drives the search under the retry
    /// policy.
    async fn run_job(
        &self,
        record: &mut JobRecord,
        version: &mut VersionTag,
        cancel: &CancellationToken,
    ) -> ExportResult<()> {
        let destination = self.destination_for(record)?;

        if !record.filters.is_empty() && record.resource_types.is_empty() {
            return Err(ExportError::bad_request(
                "type filters require the _type parameter to list the filtered resource types",
            ));
        }
        if record.export_type == ExportType::Group && record.group_id.is_none() {
            return Err(ExportError::bad_request("group export has no group id"));
        }

        let container = record
            .container_name
            .clone()
            .unwrap_or_else(|| self.config.default_container_name.clone());
        self.services
            .destination
            .connect(&destination, &container, cancel)
            .await?;

        record.status = JobStatus::Running;
        if record.progress.is_none() {
            record.start_time = Some(Utc::now());
            record.progress = Some(ExportJobProgress::new());
            info!("Starting export job");
        } else {
            record.restart_count += 1;
            info!(restart_count = record.restart_count, "Resuming export job");
        }
        self.persist(record, version, cancel).await?;

        let anonymizer = match &record.anonymization {
            Some(anonymization) => {
                let factory = self.services.anonymizer_factory.as_ref().ok_or_else(|| {
                    ExportError::AnonymizationConfigNotFound {
                        message: format!(
                            "no anonymizer is available for configuration {}",
                            anonymization.location
                        ),
                    }
                })?;
                Some(factory.create(record, cancel).await?)
            }
            None => None,
        };

        let ctx = SearchContext {
            search: Arc::clone(&self.services.search),
            job_store: Arc::clone(&self.services.job_store),
            group_resolver: Arc::clone(&self.services.group_resolver),
            materializer: ResourceMaterializer::new(anonymizer),
            shared_params: shared_query_parameters(
                record,
                self.config.maximum_number_of_resources_per_query,
            ),
            rolling_file_size: self.config.rolling_file_size_bytes(),
        };
        let writer = OutputWriter::new(
            record.id.clone(),
            Arc::clone(&self.services.destination),
            self.config.rolling_file_size_bytes(),
        );
        let policy = RetryPolicy::from_config(&self.config);
        let mut driver = SearchDriver::new(record, version, writer, ctx, cancel);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match driver.run().await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(attempts = attempt, "Export succeeded after retries");
                    }
                    return Ok(());
                }
                Err(e) if policy.should_retry(attempt, &e) => {
                    policy.backoff(attempt, &e, cancel).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Resolves the destination of `record`.
    ///
    /// A destination URI pinned by the job wins. Otherwise the job must have
    /// been created against the connection this worker is configured with.
    fn destination_for(&self, record: &JobRecord) -> ExportResult<DestinationConfig> {
        if let Some(uri) = &record.destination_uri {
            return Ok(DestinationConfig {
                uri: Some(uri.clone()),
                connection: None,
            });
        }
        if record.connection_hash != self.config.connection_hash() {
            return Err(ExportError::DestinationReconfigured {
                job_id: record.id.clone(),
            });
        }
        Ok(self.config.destination_config())
    }

    /// Turns a failed run into a terminal status.
    ///
    /// Returns true if a terminal status was persisted.
    async fn handle_failure(
        &self,
        record: &mut JobRecord,
        version: &mut VersionTag,
        err: ExportError,
        cancel: &CancellationToken,
    ) -> bool {
        if let ExportError::JobConflict { .. } = err {
            warn!(error = %err, "Export job was updated by another worker, stopping");
            return false;
        }

        if cancel.is_cancelled() || err.is_cancellation() {
            info!("Export job cancelled");
            record.status = JobStatus::Canceled;
            // The job token has fired; the terminal write must not observe it.
            return self
                .persist_terminal(record, version, &CancellationToken::new())
                .await;
        }

        match &err {
            ExportError::ResourceNotFound {
                user_correctable: true,
                ..
            } => warn!(error = %err, "Export job failed"),
            ExportError::RecordTooLarge { .. } => {
                warn!(error = %err, "Export job record too large, clearing output");
                record.output.clear();
            }
            _ => error!(error = %err, kind = ?err.kind(), "Export job failed"),
        }

        let reason = if err.is_client_facing() {
            err.to_string()
        } else {
            GENERIC_FAILURE_REASON.to_string()
        };
        let diagnostics = err.to_string();
        record.status = JobStatus::Failed;
        record.issues.push(OperationIssue::error("exception", diagnostics.clone()));
        record.failure_details =
            Some(FailureDetails::new(reason, err.status_class()).with_diagnostics(diagnostics));

        self.persist_terminal(record, version, cancel).await
    }

    /// Stamps the end time and persists a terminal record.
    ///
    /// A record too large to store is stored again without its output. Other
    /// failures are logged. Returns true if the record was stored.
    async fn persist_terminal(
        &self,
        record: &mut JobRecord,
        version: &mut VersionTag,
        cancel: &CancellationToken,
    ) -> bool {
        record.end_time = Some(Utc::now());

        let mut result = self.persist(record, version, cancel).await;
        if let Err(ExportError::RecordTooLarge { .. }) = result {
            record.output.clear();
            record.issues.clear();
            result = self.persist(record, version, cancel).await;
        }

        match result {
            Ok(()) => true,
            Err(e @ ExportError::JobConflict { .. }) => {
                warn!(
                    error = %e,
                    "Export job was updated by another worker, not recording terminal status"
                );
                false
            }
            Err(e) => {
                error!(
                    error = %e,
                    status = %record.status,
                    "Failed to persist terminal export job status"
                );
                false
            }
        }
    }

    async fn persist(
        &self,
        record: &JobRecord,
        version: &mut VersionTag,
        cancel: &CancellationToken,
    ) -> ExportResult<()> {
        let outcome = self.services.job_store.update(record, version, cancel).await?;
        *version = outcome.version;
        Ok(())
    }

    /// Logs the job summary and publishes the completion event.
    async fn report_completion(
        &self,
        record: &JobRecord,
        cancel: &CancellationToken,
    ) -> ExportResult<()> {
        let event = ExportJobCompleted::from_record(record);
        info!(
            job_id = %event.job_id,
            status = %event.status,
            queued_time = %event.queued_time,
            end_time = ?event.end_time,
            total_bytes = event.total_bytes,
            anonymized = event.anonymized,
            "Export job finished"
        );

        match self.services.notifications.publish(&event, cancel).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancellation() => {
                warn!(error = %e, "Completion notification dropped after cancellation");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to publish export completion notification");
                Err(e)
            }
        }
    }
}
