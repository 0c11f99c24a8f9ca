//! Turning stored resources into output lines.

use std::sync::Arc;

use chrono::SecondsFormat;
use serde_json::{Map, Value, json};

use crate::core::Anonymizer;
use crate::error::{ExportError, ExportResult};
use crate::types::ResourceWrapper;

/// System of the tag marking soft-deleted resources in export output.
pub const DELETED_TAG_SYSTEM: &str = "http://helios.software/fhir/CodeSystem/export-tags";
/// Code of the tag marking soft-deleted resources in export output.
pub const DELETED_TAG_CODE: &str = "deleted";

/// Produces the NDJSON line written for each matched resource.
///
/// With an anonymizer the resource is always parsed, anonymized and
/// serialized again. Without one the stored payload is written unchanged
/// unless it lacks embedded metadata or is a soft-delete placeholder; those
/// are parsed and patched first.
#[derive(Clone, Default)]
pub struct ResourceMaterializer {
    anonymizer: Option<Arc<dyn Anonymizer>>,
}

impl ResourceMaterializer {
    /// Creates a materializer, anonymizing when `anonymizer` is set.
    pub fn new(anonymizer: Option<Arc<dyn Anonymizer>>) -> Self {
        Self { anonymizer }
    }

    /// Returns true if output is anonymized.
    pub fn is_anonymizing(&self) -> bool {
        self.anonymizer.is_some()
    }

    /// Returns the line to write for `resource`.
    pub fn materialize(&self, resource: &ResourceWrapper) -> ExportResult<String> {
        if let Some(anonymizer) = &self.anonymizer {
            let content = with_metadata(resource.to_json()?, resource);
            let anonymized = anonymizer
                .anonymize(content)
                .map_err(|e| match e {
                    ExportError::Anonymization { .. } => e,
                    other => ExportError::Anonymization {
                        resource_type: resource.resource_type.clone(),
                        id: resource.id.clone(),
                        message: other.to_string(),
                    },
                })?;
            return Ok(serde_json::to_string(&anonymized)?);
        }

        if !resource.is_meta_set || resource.is_deleted {
            let content = with_metadata(resource.to_json()?, resource);
            return Ok(serde_json::to_string(&content)?);
        }

        Ok(resource.raw.clone())
    }
}

/// Fills in `meta.versionId`/`meta.lastUpdated` and the deleted tag.
fn with_metadata(mut content: Value, resource: &ResourceWrapper) -> Value {
    let Some(object) = content.as_object_mut() else {
        return content;
    };
    let meta = object
        .entry("meta")
        .or_insert_with(|| Value::Object(Map::new()));
    if !meta.is_object() {
        *meta = Value::Object(Map::new());
    }
    if let Some(meta) = meta.as_object_mut() {
        meta.entry("versionId")
            .or_insert_with(|| Value::String(resource.version_id.clone()));
        meta.entry("lastUpdated").or_insert_with(|| {
            Value::String(
                resource
                    .last_modified
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            )
        });

        if resource.is_deleted {
            let tags = meta.entry("tag").or_insert_with(|| json!([]));
            if let Some(tags) = tags.as_array_mut() {
                let already_tagged = tags.iter().any(|t| {
                    t.get("system").and_then(Value::as_str) == Some(DELETED_TAG_SYSTEM)
                        && t.get("code").and_then(Value::as_str) == Some(DELETED_TAG_CODE)
                });
                if !already_tagged {
                    tags.push(json!({"system": DELETED_TAG_SYSTEM, "code": DELETED_TAG_CODE}));
                }
            }
        }
    }
    content
}
