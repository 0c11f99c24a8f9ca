//! Test infrastructure for the export engine.
//!
//! - [`fixtures`] - FHIR resources used as seed data
//! - [`harness`] - wiring of the in-memory collaborators into a task
//! - [`fakes`] - collaborators that fail, cancel or conflict on demand

#![allow(dead_code)]

pub mod fakes;
pub mod fixtures;
pub mod harness;

pub use fakes::*;
pub use fixtures::*;
pub use harness::*;
