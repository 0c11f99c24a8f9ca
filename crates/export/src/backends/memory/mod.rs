//! In-memory implementations of every collaborator.
//!
//! These back the integration tests and the worker binary. They keep all
//! state behind `parking_lot` locks and never hold a lock across an await.

mod destination;
mod group;
mod job_store;
mod notification;
mod search;

pub use destination::InMemoryDestination;
pub use group::InMemoryGroupResolver;
pub use job_store::InMemoryJobStore;
pub use notification::InMemoryNotificationSink;
pub use search::{InMemorySearchService, SearchCall};
