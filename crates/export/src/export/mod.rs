//! The export engine.
//!
//! [`ExportJobTask`] is the entry point: it validates a job record, runs the
//! three-tier search under a [`RetryPolicy`], writes matched resources through
//! an [`OutputWriter`], and persists the terminal status.

mod materialize;
mod output;
mod retry;
mod search;
mod task;

pub use materialize::{DELETED_TAG_CODE, DELETED_TAG_SYSTEM, ResourceMaterializer};
pub use output::OutputWriter;
pub use retry::RetryPolicy;
pub use search::shared_query_parameters;
pub use task::{ExportJobTask, ExportServices, GENERIC_FAILURE_REASON, TOO_MANY_RESTARTS_REASON};
