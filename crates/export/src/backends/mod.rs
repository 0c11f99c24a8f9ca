//! Reference implementations of the collaborator traits.
//!
//! - [`memory`] - in-memory job store, search service, group resolver,
//!   destination and notification sink
//! - [`local`] - a destination writing NDJSON files to a local directory
//! - [`redact`] - an anonymizer dropping configured top-level fields

pub mod local;
pub mod memory;
pub mod redact;

pub use local::LocalDirectoryDestination;
pub use redact::{RedactingAnonymizer, RedactingAnonymizerFactory};
