//! Anonymization of exported resources.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::ExportResult;
use crate::types::JobRecord;

/// Transforms one resource before it is written.
pub trait Anonymizer: Send + Sync {
    /// Returns the anonymized form of `resource`.
    ///
    /// # Errors
    ///
    /// * `ExportError::Anonymization` - if the resource cannot be anonymized
    fn anonymize(&self, resource: Value) -> ExportResult<Value>;
}

/// Builds the anonymizer for a job from its anonymization configuration.
#[async_trait]
pub trait AnonymizerFactory: Send + Sync {
    /// Loads the job's configuration and returns an anonymizer.
    ///
    /// # Errors
    ///
    /// * `ExportError::AnonymizationConfigNotFound` - the configuration does not exist
    /// * `ExportError::AnonymizationConfigFetch` - the configuration could not be read
    /// * `ExportError::AnonymizationConfigParse` - the configuration is invalid
    async fn create(
        &self,
        record: &JobRecord,
        cancel: &CancellationToken,
    ) -> ExportResult<Arc<dyn Anonymizer>>;
}
