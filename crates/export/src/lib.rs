//! Helios Bulk Export Engine
//!
//! This crate executes FHIR bulk data export jobs. Given a queued job record
//! it pages through the stored resources (all of them, every patient's
//! compartment, or the compartments of a group's members), optionally
//! anonymizes them, and streams NDJSON to an external destination, surviving
//! restarts, destination outages and multi-page, multi-filter result sets.
//!
//! # Features
//!
//! - **Resumable**: progress is checkpointed into the job record after every
//!   page; a restarted worker continues where the last checkpoint left off
//! - **Three-tier search**: per-type filters, then unfiltered types, then
//!   patient compartments
//! - **Bounded retries**: destination outages are retried with a fixed delay
//! - **Optimistic concurrency**: a job updated by another worker is left alone
//! - **Failure taxonomy**: every failure ends as exactly one terminal status
//!   with a status class
//!
//! # Architecture
//!
//! - [`types`] - job records, progress, filters, query parameters
//! - [`error`] - error types for all operations
//! - [`core`] - collaborator traits (job store, search, destination, ...)
//! - [`export`] - the engine: orchestrator, search driver, output writer
//! - [`backends`] - in-memory and local-directory reference collaborators
//! - [`config`] - worker configuration
//! - [`context`] - ambient request context
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use helios_export::backends::memory::{
//!     InMemoryDestination, InMemoryGroupResolver, InMemoryJobStore,
//!     InMemoryNotificationSink, InMemorySearchService,
//! };
//! use helios_export::{
//!     ExportJobConfig, ExportJobTask, ExportServices, ExportType, JobRecord,
//!     RequestContextAccessor,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> helios_export::ExportResult<()> {
//! let config = ExportJobConfig::default();
//! let store = Arc::new(InMemoryJobStore::new());
//!
//! let record = JobRecord::new(ExportType::All).with_connection_hash(config.connection_hash());
//! let version = store.insert(record.clone());
//!
//! let services = ExportServices {
//!     job_store: store.clone(),
//!     search: Arc::new(InMemorySearchService::new()),
//!     group_resolver: Arc::new(InMemoryGroupResolver::new()),
//!     destination: Arc::new(InMemoryDestination::new()),
//!     anonymizer_factory: None,
//!     notifications: Arc::new(InMemoryNotificationSink::new()),
//!     context: RequestContextAccessor::new(),
//! };
//!
//! let task = ExportJobTask::new(config, services);
//! let finished = task.execute(record, version, &CancellationToken::new()).await?;
//! println!("{}: {}", finished.id, finished.status);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod export;
pub mod logging;
pub mod types;

// Re-export commonly used types at crate root
pub use config::ExportJobConfig;
pub use context::{ExportRequestContext, RequestContextAccessor, RequestContextGuard};
pub use error::{ExportError, ExportErrorKind, ExportResult, StatusClass};
pub use export::{ExportJobTask, ExportServices};
pub use logging::init_logging;
pub use types::{
    ExportFileInfo, ExportJobProgress, ExportType, JobRecord, JobStatus, ResourceFilter,
};

// Re-export collaborator traits
pub use core::{
    AnonymizerFactory, DestinationClient, GroupMemberResolver, JobStore, NotificationSink,
    SearchService, VersionTag,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
