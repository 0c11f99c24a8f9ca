//! Data types of the export engine.
//!
//! - [`JobRecord`] - the persisted job descriptor and its output counters
//! - [`ExportJobProgress`] - resumable cursor and filter state
//! - [`ResourceFilter`] - per-type `_typeFilter` restrictions
//! - [`QueryParameters`] - ordered search parameters
//! - [`ResourceWrapper`] - a stored resource as returned by search

mod filter;
mod job_record;
mod progress;
mod resource;
pub mod search_params;

pub use filter::ResourceFilter;
pub use job_record::{
    AnonymizationConfig, ExportFileInfo, ExportType, FailureDetails, JobRecord, JobStatus,
    OperationIssue, SurrogateIdRange,
};
pub use progress::ExportJobProgress;
pub use resource::ResourceWrapper;
pub use search_params::QueryParameters;
