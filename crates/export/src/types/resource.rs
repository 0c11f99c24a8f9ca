//! Resources as returned by the search service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExportResult;

/// A stored resource together with the metadata the store keeps beside it.
///
/// `raw` is the payload exactly as stored. Older payloads may lack
/// `meta.versionId`/`meta.lastUpdated`; `is_meta_set` records whether they are
/// embedded so the writer knows when the raw bytes can be exported unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceWrapper {
    /// The resource type (e.g. "Patient").
    pub resource_type: String,
    /// The resource's logical id.
    pub id: String,
    /// Version id assigned by the store.
    pub version_id: String,
    /// When this version was written.
    pub last_modified: DateTime<Utc>,
    /// The stored JSON payload.
    pub raw: String,
    /// True for soft-delete placeholders.
    #[serde(default)]
    pub is_deleted: bool,
    /// True if `raw` already embeds version and last-updated metadata.
    #[serde(default)]
    pub is_meta_set: bool,
    /// Monotonic id assigned by the store; defines search order.
    pub surrogate_id: i64,
}

impl ResourceWrapper {
    /// Wraps a JSON resource, taking type and id from its content.
    ///
    /// `is_meta_set` is derived from the presence of `meta.versionId` and
    /// `meta.lastUpdated` in `content`.
    pub fn from_content(
        content: &Value,
        version_id: impl Into<String>,
        last_modified: DateTime<Utc>,
        surrogate_id: i64,
    ) -> ExportResult<Self> {
        let resource_type = content
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| crate::error::ExportError::Serialization {
                message: "resource has no resourceType".to_string(),
            })?;
        let id = content
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| crate::error::ExportError::Serialization {
                message: format!("{} resource has no id", resource_type),
            })?;

        let meta = content.get("meta");
        let is_meta_set = meta
            .and_then(|m| m.get("versionId"))
            .is_some_and(Value::is_string)
            && meta
                .and_then(|m| m.get("lastUpdated"))
                .is_some_and(Value::is_string);

        Ok(Self {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
            version_id: version_id.into(),
            last_modified,
            raw: serde_json::to_string(content)?,
            is_deleted: false,
            is_meta_set,
            surrogate_id,
        })
    }

    /// Marks the resource as a soft-delete placeholder.
    pub fn deleted(mut self) -> Self {
        self.is_deleted = true;
        self
    }

    /// Parses the stored payload.
    pub fn to_json(&self) -> ExportResult<Value> {
        Ok(serde_json::from_str(&self.raw)?)
    }
}
