//! Collaborators that misbehave on demand.
//!
//! Each fake wraps an in-memory backend and injects one kind of fault: a
//! destination outage, a cancelled token, a concurrent writer, a failing
//! anonymizer or notification sink.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use helios_export::backends::memory::{InMemoryDestination, InMemoryJobStore, InMemorySearchService};
use helios_export::core::{
    Anonymizer, AnonymizerFactory, DestinationClient, DestinationConfig, ExportJobCompleted,
    JobRecordOutcome, JobStore, NotificationSink, SearchOptions, SearchPage, SearchService,
    VersionTag,
};
use helios_export::types::QueryParameters;
use helios_export::{
    ExportError, ExportRequestContext, ExportResult, JobRecord, RequestContextAccessor,
};

// ============================================================================
// Destinations
// ============================================================================

/// Destination whose first `failures` commits fail with a connection error.
pub struct FlakyDestination {
    inner: Arc<InMemoryDestination>,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyDestination {
    pub fn new(inner: Arc<InMemoryDestination>, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Number of commit attempts, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DestinationClient for FlakyDestination {
    async fn connect(
        &self,
        config: &DestinationConfig,
        container: &str,
        cancel: &CancellationToken,
    ) -> ExportResult<()> {
        self.inner.connect(config, container, cancel).await
    }

    async fn commit_block(
        &self,
        file_name: &str,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> ExportResult<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ExportError::destination("simulated outage"));
        }
        self.inner.commit_block(file_name, data, cancel).await
    }
}

// ============================================================================
// Job stores
// ============================================================================

/// Job store rejecting records with more than `max_files` output files.
pub struct OutputLimitedStore {
    inner: Arc<InMemoryJobStore>,
    max_files: usize,
}

impl OutputLimitedStore {
    pub fn new(inner: Arc<InMemoryJobStore>, max_files: usize) -> Self {
        Self { inner, max_files }
    }
}

#[async_trait]
impl JobStore for OutputLimitedStore {
    async fn update(
        &self,
        record: &JobRecord,
        version: &VersionTag,
        cancel: &CancellationToken,
    ) -> ExportResult<JobRecordOutcome> {
        if record.output_file_count() > self.max_files {
            return Err(ExportError::RecordTooLarge {
                job_id: record.id.clone(),
                size: record.output_file_count(),
            });
        }
        self.inner.update(record, version, cancel).await
    }
}

// ============================================================================
// Search services
// ============================================================================

/// What a [`FaultySearch`] does once its trigger call is reached.
pub enum SearchFault {
    /// Cancel the job token, then delegate.
    Cancel(CancellationToken),
    /// Overwrite the stored job record as a concurrent worker would.
    Conflict {
        store: Arc<InMemoryJobStore>,
        job_id: String,
    },
    /// Report the assigned segment as exhausted.
    SegmentCompleted,
    /// Ask the caller to back off.
    RateLimited,
    /// Fail with an unclassified search error.
    Broken,
    /// Run out of memory while materializing the page.
    OutOfMemory,
    /// Report cancellation without the job token having fired.
    Cancelled,
}

/// Search service injecting a fault at the `trigger`-th call (1-based).
pub struct FaultySearch {
    inner: Arc<InMemorySearchService>,
    trigger: usize,
    fault: SearchFault,
    calls: AtomicUsize,
}

impl FaultySearch {
    pub fn new(inner: Arc<InMemorySearchService>, trigger: usize, fault: SearchFault) -> Self {
        Self {
            inner,
            trigger,
            fault,
            calls: AtomicUsize::new(0),
        }
    }

    fn inject(&self) -> ExportResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call != self.trigger {
            return Ok(());
        }
        match &self.fault {
            SearchFault::Cancel(token) => {
                token.cancel();
                Ok(())
            }
            SearchFault::Conflict { store, job_id } => {
                if let Some(stored) = store.get(job_id) {
                    store.replace(stored.record);
                }
                Ok(())
            }
            SearchFault::SegmentCompleted => Err(ExportError::SegmentCompleted),
            SearchFault::RateLimited => Err(ExportError::RequestRateExceeded {
                retry_after_ms: Some(1000),
            }),
            SearchFault::Broken => Err(ExportError::Search {
                message: "index unavailable".to_string(),
            }),
            SearchFault::OutOfMemory => Err(ExportError::OutOfMemory {
                message: "page buffer allocation of 2147483648 bytes failed".to_string(),
            }),
            SearchFault::Cancelled => Err(ExportError::Cancelled),
        }
    }
}

#[async_trait]
impl SearchService for FaultySearch {
    async fn search(
        &self,
        resource_type: Option<&str>,
        params: &QueryParameters,
        options: SearchOptions,
        cancel: &CancellationToken,
    ) -> ExportResult<SearchPage> {
        self.inject()?;
        self.inner.search(resource_type, params, options, cancel).await
    }

    async fn search_compartment(
        &self,
        compartment_type: &str,
        compartment_id: &str,
        resource_type: Option<&str>,
        params: &QueryParameters,
        options: SearchOptions,
        cancel: &CancellationToken,
    ) -> ExportResult<SearchPage> {
        self.inject()?;
        self.inner
            .search_compartment(
                compartment_type,
                compartment_id,
                resource_type,
                params,
                options,
                cancel,
            )
            .await
    }
}

/// Search service recording the ambient request context of every call.
pub struct ContextRecordingSearch {
    inner: Arc<InMemorySearchService>,
    accessor: RequestContextAccessor,
    seen: Mutex<Vec<Option<Arc<ExportRequestContext>>>>,
}

impl ContextRecordingSearch {
    pub fn new(inner: Arc<InMemorySearchService>, accessor: RequestContextAccessor) -> Self {
        Self {
            inner,
            accessor,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<Option<Arc<ExportRequestContext>>> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl SearchService for ContextRecordingSearch {
    async fn search(
        &self,
        resource_type: Option<&str>,
        params: &QueryParameters,
        options: SearchOptions,
        cancel: &CancellationToken,
    ) -> ExportResult<SearchPage> {
        self.seen.lock().push(self.accessor.current());
        self.inner.search(resource_type, params, options, cancel).await
    }

    async fn search_compartment(
        &self,
        compartment_type: &str,
        compartment_id: &str,
        resource_type: Option<&str>,
        params: &QueryParameters,
        options: SearchOptions,
        cancel: &CancellationToken,
    ) -> ExportResult<SearchPage> {
        self.seen.lock().push(self.accessor.current());
        self.inner
            .search_compartment(
                compartment_type,
                compartment_id,
                resource_type,
                params,
                options,
                cancel,
            )
            .await
    }
}

// ============================================================================
// Anonymizers
// ============================================================================

/// Anonymizer that strips `name` and fails on one resource id.
pub struct FailingAnonymizer {
    failing_id: String,
}

impl Anonymizer for FailingAnonymizer {
    fn anonymize(&self, mut resource: Value) -> ExportResult<Value> {
        let id = resource["id"].as_str().unwrap_or_default().to_string();
        if id == self.failing_id {
            return Err(ExportError::Anonymization {
                resource_type: resource["resourceType"].as_str().unwrap_or_default().to_string(),
                id,
                message: "unsupported element".to_string(),
            });
        }
        if let Some(object) = resource.as_object_mut() {
            object.remove("name");
        }
        Ok(resource)
    }
}

/// Factory building a [`FailingAnonymizer`].
pub struct FailingAnonymizerFactory {
    failing_id: String,
}

impl FailingAnonymizerFactory {
    pub fn new(failing_id: impl Into<String>) -> Self {
        Self {
            failing_id: failing_id.into(),
        }
    }
}

#[async_trait]
impl AnonymizerFactory for FailingAnonymizerFactory {
    async fn create(
        &self,
        _record: &JobRecord,
        _cancel: &CancellationToken,
    ) -> ExportResult<Arc<dyn Anonymizer>> {
        Ok(Arc::new(FailingAnonymizer {
            failing_id: self.failing_id.clone(),
        }))
    }
}

// ============================================================================
// Notification sinks
// ============================================================================

/// Sink whose every publish fails with `error`.
pub struct FailingNotificationSink {
    error: fn() -> ExportError,
    attempts: AtomicUsize,
}

impl FailingNotificationSink {
    pub fn new(error: fn() -> ExportError) -> Self {
        Self {
            error,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSink for FailingNotificationSink {
    async fn publish(
        &self,
        _event: &ExportJobCompleted,
        _cancel: &CancellationToken,
    ) -> ExportResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err((self.error)())
    }
}
