//! Wiring of the in-memory collaborators.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use helios_export::backends::memory::{
    InMemoryDestination, InMemoryGroupResolver, InMemoryJobStore, InMemoryNotificationSink,
    InMemorySearchService,
};
use helios_export::{
    AnonymizerFactory, DestinationClient, ExportJobConfig, ExportJobTask, ExportResult,
    ExportServices, ExportType, JobRecord, JobStore, NotificationSink, RequestContextAccessor,
    SearchService,
};

/// In-memory collaborators plus optional replacements.
pub struct TestHarness {
    pub config: ExportJobConfig,
    pub store: Arc<InMemoryJobStore>,
    pub search: Arc<InMemorySearchService>,
    pub groups: Arc<InMemoryGroupResolver>,
    pub destination: Arc<InMemoryDestination>,
    pub notifications: Arc<InMemoryNotificationSink>,
    pub context: RequestContextAccessor,
    job_store_override: Option<Arc<dyn JobStore>>,
    search_override: Option<Arc<dyn SearchService>>,
    destination_override: Option<Arc<dyn DestinationClient>>,
    notifications_override: Option<Arc<dyn NotificationSink>>,
    anonymizer_factory: Option<Arc<dyn AnonymizerFactory>>,
}

impl TestHarness {
    /// Creates a harness with the testing configuration.
    pub fn new() -> Self {
        Self {
            config: ExportJobConfig::for_testing(),
            store: Arc::new(InMemoryJobStore::new()),
            search: Arc::new(InMemorySearchService::new()),
            groups: Arc::new(InMemoryGroupResolver::new()),
            destination: Arc::new(InMemoryDestination::new()),
            notifications: Arc::new(InMemoryNotificationSink::new()),
            context: RequestContextAccessor::new(),
            job_store_override: None,
            search_override: None,
            destination_override: None,
            notifications_override: None,
            anonymizer_factory: None,
        }
    }

    /// Adjusts the configuration.
    pub fn with_config(mut self, f: impl FnOnce(&mut ExportJobConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn with_job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.job_store_override = Some(store);
        self
    }

    pub fn with_search(mut self, search: Arc<dyn SearchService>) -> Self {
        self.search_override = Some(search);
        self
    }

    pub fn with_destination(mut self, destination: Arc<dyn DestinationClient>) -> Self {
        self.destination_override = Some(destination);
        self
    }

    pub fn with_notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications_override = Some(sink);
        self
    }

    pub fn with_anonymizer_factory(mut self, factory: Arc<dyn AnonymizerFactory>) -> Self {
        self.anonymizer_factory = Some(factory);
        self
    }

    /// A queued record created against this worker's destination.
    pub fn record(&self, export_type: ExportType) -> JobRecord {
        JobRecord::new(export_type).with_connection_hash(self.config.connection_hash())
    }

    pub fn services(&self) -> ExportServices {
        let job_store: Arc<dyn JobStore> = match &self.job_store_override {
            Some(store) => store.clone(),
            None => self.store.clone(),
        };
        let search: Arc<dyn SearchService> = match &self.search_override {
            Some(search) => search.clone(),
            None => self.search.clone(),
        };
        let destination: Arc<dyn DestinationClient> = match &self.destination_override {
            Some(destination) => destination.clone(),
            None => self.destination.clone(),
        };
        let notifications: Arc<dyn NotificationSink> = match &self.notifications_override {
            Some(sink) => sink.clone(),
            None => self.notifications.clone(),
        };

        ExportServices {
            job_store,
            search,
            group_resolver: self.groups.clone(),
            destination,
            anonymizer_factory: self.anonymizer_factory.clone(),
            notifications,
            context: self.context.clone(),
        }
    }

    pub fn task(&self) -> ExportJobTask {
        ExportJobTask::new(self.config.clone(), self.services())
    }

    /// Stores `record` and runs it to completion.
    pub async fn run(&self, record: JobRecord) -> JobRecord {
        self.run_with(record, &CancellationToken::new())
            .await
            .expect("export task returned an error")
    }

    /// Stores `record` and runs it with `cancel`.
    pub async fn run_with(
        &self,
        record: JobRecord,
        cancel: &CancellationToken,
    ) -> ExportResult<JobRecord> {
        let version = self.store.insert(record.clone());
        self.task().execute(record, version, cancel).await
    }

    /// The record as last persisted.
    pub fn stored(&self, id: &str) -> JobRecord {
        self.store.get(id).expect("job record exists").record
    }

    /// Every line exported for `resource_type`, across files, in file order.
    pub fn exported(&self, resource_type: &str) -> Vec<Value> {
        let prefix = format!("{}-", resource_type);
        self.destination
            .files()
            .iter()
            .filter(|(name, _)| {
                name.rsplit('/')
                    .next()
                    .is_some_and(|file| file.starts_with(&prefix))
            })
            .flat_map(|(_, data)| {
                String::from_utf8_lossy(data)
                    .lines()
                    .map(|line| serde_json::from_str(line).expect("valid NDJSON line"))
                    .collect::<Vec<Value>>()
            })
            .collect()
    }

    /// Ids of every resource exported for `resource_type`.
    pub fn exported_ids(&self, resource_type: &str) -> Vec<String> {
        self.exported(resource_type)
            .iter()
            .map(|r| r["id"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}
