//! Collaborator traits of the export engine.
//!
//! The engine talks to the outside world only through these traits:
//!
//! - [`JobStore`] - optimistic-concurrency persistence of job records
//! - [`SearchService`] - paged search, system-wide or per compartment
//! - [`GroupMemberResolver`] - group membership as of a point in time
//! - [`DestinationClient`] - append-only output store
//! - [`AnonymizerFactory`] / [`Anonymizer`] - optional output anonymization
//! - [`NotificationSink`] - completion events
//!
//! Every I/O method is async and observes a shared
//! [`CancellationToken`](tokio_util::sync::CancellationToken). Reference
//! implementations live in [`crate::backends`].

mod anonymizer;
mod destination;
mod group;
mod job_store;
mod notification;
mod search;

pub use anonymizer::{Anonymizer, AnonymizerFactory};
pub use destination::{DestinationClient, DestinationConfig};
pub use group::GroupMemberResolver;
pub use job_store::{JobRecordOutcome, JobStore, VersionTag};
pub use notification::{ExportJobCompleted, NotificationSink};
pub use search::{SearchOptions, SearchPage, SearchService};
