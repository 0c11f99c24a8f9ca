//! In-memory search service.
//!
//! Resources are kept ordered by surrogate id, so repeated identical queries
//! always return the same pages in the same order. Continuation tokens are
//! base64url-encoded JSON holding the original criteria and the offset of the
//! next page.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{SearchOptions, SearchPage, SearchService};
use crate::error::{ExportError, ExportResult};
use crate::types::search_params::names;
use crate::types::{QueryParameters, ResourceWrapper};

const DEFAULT_PAGE_SIZE: usize = 100;

/// A search call as received by [`InMemorySearchService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCall {
    /// `(compartment type, compartment id)` for compartment searches.
    pub compartment: Option<(String, String)>,
    /// The resource type argument.
    pub resource_type: Option<String>,
    /// The query parameters.
    pub parameters: QueryParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Criteria {
    compartment: Option<(String, String)>,
    resource_type: Option<String>,
    params: QueryParameters,
    include_history: bool,
    include_deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Cursor {
    criteria: Criteria,
    offset: usize,
}

impl Cursor {
    fn encode(&self) -> ExportResult<String> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    fn decode(token: &str) -> ExportResult<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|e| ExportError::Search {
            message: format!("invalid continuation token: {}", e),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| ExportError::Search {
            message: format!("invalid continuation token: {}", e),
        })
    }
}

/// Search service over an in-memory list of resources.
///
/// Supported parameters: `_type`, `_id`, `_lastUpdated` (`le`, `ge`, `lt`,
/// `gt`, `eq` prefixes), the surrogate-id bounds (inclusive), `_count` and
/// `ct`. `_feedRange` is accepted and ignored. Any other parameter matches a
/// top-level field of the resource by string equality. The compartment of
/// `Patient/{id}` holds every non-Patient resource referencing it.
#[derive(Debug, Default)]
pub struct InMemorySearchService {
    resources: RwLock<Vec<ResourceWrapper>>,
    calls: Mutex<Vec<SearchCall>>,
}

impl InMemorySearchService {
    /// Creates an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stored resource, keeping surrogate-id order.
    pub fn add(&self, resource: ResourceWrapper) {
        let mut resources = self.resources.write();
        let position = resources.partition_point(|r| r.surrogate_id <= resource.surrogate_id);
        resources.insert(position, resource);
    }

    /// Adds a JSON resource as version 1, assigning the next surrogate id.
    ///
    /// The last-modified time is taken from `meta.lastUpdated` when present.
    pub fn insert(&self, content: Value) -> ExportResult<ResourceWrapper> {
        let last_modified = content
            .pointer("/meta/lastUpdated")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map_or_else(Utc::now, |d| d.with_timezone(&Utc));
        let surrogate_id = self
            .resources
            .read()
            .last()
            .map_or(1, |r| r.surrogate_id + 1);
        let version = content
            .pointer("/meta/versionId")
            .and_then(Value::as_str)
            .unwrap_or("1")
            .to_string();

        let wrapper =
            ResourceWrapper::from_content(&content, version, last_modified, surrogate_id)?;
        self.add(wrapper.clone());
        Ok(wrapper)
    }

    /// Returns every call received so far.
    pub fn calls(&self) -> Vec<SearchCall> {
        self.calls.lock().clone()
    }

    /// Returns the number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn execute(
        &self,
        compartment: Option<(String, String)>,
        resource_type: Option<&str>,
        params: &QueryParameters,
        options: SearchOptions,
        cancel: &CancellationToken,
    ) -> ExportResult<SearchPage> {
        self.calls.lock().push(SearchCall {
            compartment: compartment.clone(),
            resource_type: resource_type.map(str::to_string),
            parameters: params.clone(),
        });

        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        let page_size = match params.get(names::COUNT) {
            Some(count) => count.parse::<usize>().map_err(|_| ExportError::Search {
                message: format!("invalid _count '{}'", count),
            })?,
            None => DEFAULT_PAGE_SIZE,
        }
        .max(1);

        let (criteria, offset) = match params.get(names::CONTINUATION_TOKEN) {
            Some(token) => {
                let cursor = Cursor::decode(token)?;
                (cursor.criteria, cursor.offset)
            }
            None => (
                Criteria {
                    compartment,
                    resource_type: resource_type.map(str::to_string),
                    params: params.without(&[names::CONTINUATION_TOKEN, names::COUNT]),
                    include_history: options.include_history,
                    include_deleted: options.include_deleted,
                },
                0,
            ),
        };

        let resources = self.resources.read();
        let mut matched = Vec::new();
        for resource in resources.iter() {
            if matches(resource, &criteria)? {
                matched.push(resource);
            }
        }

        let results: Vec<ResourceWrapper> = matched
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|r| (*r).clone())
            .collect();
        let next = offset + results.len();
        let continuation_token = if next < matched.len() {
            Some(
                Cursor {
                    criteria,
                    offset: next,
                }
                .encode()?,
            )
        } else {
            None
        };

        Ok(SearchPage {
            results,
            continuation_token,
        })
    }
}

fn matches(resource: &ResourceWrapper, criteria: &Criteria) -> ExportResult<bool> {
    if resource.is_deleted && !criteria.include_deleted {
        return Ok(false);
    }
    if let Some(resource_type) = &criteria.resource_type
        && &resource.resource_type != resource_type
    {
        return Ok(false);
    }
    if let Some((compartment_type, compartment_id)) = &criteria.compartment {
        let reference = format!("\"{}/{}\"", compartment_type, compartment_id);
        if &resource.resource_type == compartment_type || !resource.raw.contains(&reference) {
            return Ok(false);
        }
    }

    let mut content: Option<Value> = None;
    for (name, value) in criteria.params.iter() {
        let ok = match name {
            names::TYPE => value.split(',').any(|t| t == resource.resource_type),
            names::ID => value.split(',').any(|id| id == resource.id),
            names::LAST_UPDATED => matches_date(resource.last_modified, value)?,
            names::GLOBAL_START_SURROGATE_ID | names::START_SURROGATE_ID => {
                resource.surrogate_id >= parse_surrogate(value)?
            }
            names::GLOBAL_END_SURROGATE_ID | names::END_SURROGATE_ID => {
                resource.surrogate_id <= parse_surrogate(value)?
            }
            names::FEED_RANGE => true,
            _ => {
                if content.is_none() {
                    content = Some(resource.to_json()?);
                }
                match content.as_ref().and_then(|c| c.get(name)) {
                    Some(Value::String(s)) => s == value,
                    Some(other) => other.to_string() == value,
                    None => false,
                }
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_date(last_modified: DateTime<Utc>, value: &str) -> ExportResult<bool> {
    let prefixed = value.len() > 2 && value.as_bytes()[..2].iter().all(u8::is_ascii_alphabetic);
    let (prefix, date) = if prefixed {
        value.split_at(2)
    } else {
        ("eq", value)
    };
    let bound = DateTime::parse_from_rfc3339(date)
        .map_err(|e| ExportError::Search {
            message: format!("invalid _lastUpdated '{}': {}", value, e),
        })?
        .with_timezone(&Utc);

    match prefix {
        "le" => Ok(last_modified <= bound),
        "lt" => Ok(last_modified < bound),
        "ge" => Ok(last_modified >= bound),
        "gt" => Ok(last_modified > bound),
        "eq" => Ok(last_modified == bound),
        other => Err(ExportError::Search {
            message: format!("unsupported _lastUpdated prefix '{}'", other),
        }),
    }
}

fn parse_surrogate(value: &str) -> ExportResult<i64> {
    value.parse().map_err(|_| ExportError::Search {
        message: format!("invalid surrogate id '{}'", value),
    })
}

#[async_trait]
impl SearchService for InMemorySearchService {
    async fn search(
        &self,
        resource_type: Option<&str>,
        params: &QueryParameters,
        options: SearchOptions,
        cancel: &CancellationToken,
    ) -> ExportResult<SearchPage> {
        self.execute(None, resource_type, params, options, cancel)
    }

    async fn search_compartment(
        &self,
        compartment_type: &str,
        compartment_id: &str,
        resource_type: Option<&str>,
        params: &QueryParameters,
        options: SearchOptions,
        cancel: &CancellationToken,
    ) -> ExportResult<SearchPage> {
        self.execute(
            Some((compartment_type.to_string(), compartment_id.to_string())),
            resource_type,
            params,
            options,
            cancel,
        )
    }
}
