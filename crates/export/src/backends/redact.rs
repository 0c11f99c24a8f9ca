//! A field-redacting anonymizer.
//!
//! The configuration is a JSON document listing top-level fields to drop:
//!
//! ```json
//! { "redact": ["name", "telecom", "address"] }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::core::{Anonymizer, AnonymizerFactory};
use crate::error::{ExportError, ExportResult};
use crate::types::JobRecord;

#[derive(Debug, Deserialize)]
struct RedactionConfig {
    redact: Vec<String>,
}

/// Loads redaction configurations from the local file system.
///
/// When the job pins an ETag, it must equal the base64 SHA-256 of the file.
#[derive(Debug, Default)]
pub struct RedactingAnonymizerFactory;

impl RedactingAnonymizerFactory {
    /// Creates a factory.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AnonymizerFactory for RedactingAnonymizerFactory {
    async fn create(
        &self,
        record: &JobRecord,
        cancel: &CancellationToken,
    ) -> ExportResult<Arc<dyn Anonymizer>> {
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        let config = record
            .anonymization
            .as_ref()
            .ok_or_else(|| ExportError::AnonymizationConfigNotFound {
                message: format!("export job {} has no anonymization configuration", record.id),
            })?;

        let content = match tokio::fs::read(&config.location).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExportError::AnonymizationConfigNotFound {
                    message: config.location.clone(),
                });
            }
            Err(e) => {
                return Err(ExportError::AnonymizationConfigFetch {
                    message: format!("{}: {}", config.location, e),
                });
            }
        };

        if let Some(etag) = &config.etag {
            let actual = STANDARD.encode(Sha256::digest(&content));
            if &actual != etag {
                return Err(ExportError::AnonymizationConfigFetch {
                    message: format!(
                        "{} has ETag {} but {} was requested",
                        config.location, actual, etag
                    ),
                });
            }
        }

        let parsed: RedactionConfig = serde_json::from_slice(&content).map_err(|e| {
            ExportError::AnonymizationConfigParse {
                message: format!("{}: {}", config.location, e),
            }
        })?;

        Ok(Arc::new(RedactingAnonymizer::new(parsed.redact)))
    }
}

/// Drops a fixed set of top-level fields from every resource.
#[derive(Debug, Clone)]
pub struct RedactingAnonymizer {
    fields: Vec<String>,
}

impl RedactingAnonymizer {
    /// Creates an anonymizer dropping `fields`.
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

impl Anonymizer for RedactingAnonymizer {
    fn anonymize(&self, mut resource: Value) -> ExportResult<Value> {
        let Some(object) = resource.as_object_mut() else {
            return Err(ExportError::Anonymization {
                resource_type: "unknown".to_string(),
                id: "unknown".to_string(),
                message: "resource is not a JSON object".to_string(),
            });
        };
        for field in &self.fields {
            if field == "resourceType" || field == "id" {
                let resource_type = object
                    .get("resourceType")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                let id = object
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                return Err(ExportError::Anonymization {
                    resource_type,
                    id,
                    message: format!("field '{}' cannot be redacted", field),
                });
            }
            object.remove(field);
        }
        Ok(resource)
    }
}
