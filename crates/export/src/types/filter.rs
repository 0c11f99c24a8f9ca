//! Per-type export filters (`_typeFilter`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ExportError, ExportResult};

/// A search filter restricting which resources of one type are exported.
///
/// Filters come from the `_typeFilter` parameter of the export request, e.g.
/// `Observation?status=final&category=laboratory`. Two filters are equal when
/// their type and parameters are equal, in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFilter {
    /// The resource type this filter applies to.
    pub resource_type: String,
    /// The extra search parameters, in request order.
    pub parameters: Vec<(String, String)>,
}

impl ResourceFilter {
    /// Creates a new filter.
    pub fn new(resource_type: impl Into<String>, parameters: Vec<(String, String)>) -> Self {
        Self {
            resource_type: resource_type.into(),
            parameters,
        }
    }

    /// Parses a `_typeFilter` value of the form `Type?name=value&name=value`.
    pub fn parse(type_filter: &str) -> ExportResult<Self> {
        let (resource_type, query) = type_filter.split_once('?').ok_or_else(|| {
            ExportError::bad_request(format!(
                "type filter '{}' must have the form Type?name=value",
                type_filter
            ))
        })?;

        if resource_type.is_empty() {
            return Err(ExportError::bad_request(format!(
                "type filter '{}' has no resource type",
                type_filter
            )));
        }

        let mut parameters = Vec::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                ExportError::bad_request(format!(
                    "type filter parameter '{}' is missing a value",
                    pair
                ))
            })?;
            parameters.push((name.to_string(), value.to_string()));
        }

        if parameters.is_empty() {
            return Err(ExportError::bad_request(format!(
                "type filter '{}' has no search parameters",
                type_filter
            )));
        }

        Ok(Self::new(resource_type, parameters))
    }
}

impl fmt::Display for ResourceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?", self.resource_type)?;
        for (i, (name, value)) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, "&")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}
