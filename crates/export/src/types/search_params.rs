//! Query parameters passed to the search service.

use serde::{Deserialize, Serialize};

/// Names of the query parameters the export engine understands.
pub mod names {
    /// Page size.
    pub const COUNT: &str = "_count";
    /// Last-updated bound, prefixed with `le`/`ge`.
    pub const LAST_UPDATED: &str = "_lastUpdated";
    /// Opaque continuation token returned by the previous page.
    pub const CONTINUATION_TOKEN: &str = "ct";
    /// Comma-separated list of resource types.
    pub const TYPE: &str = "_type";
    /// Comma-separated list of resource ids.
    pub const ID: &str = "_id";
    /// Inclusive lower surrogate-id bound of the whole job.
    pub const GLOBAL_START_SURROGATE_ID: &str = "_globalStartSurrogateId";
    /// Inclusive upper surrogate-id bound of the whole job.
    pub const GLOBAL_END_SURROGATE_ID: &str = "_globalEndSurrogateId";
    /// Inclusive lower surrogate-id bound of this worker's segment.
    pub const START_SURROGATE_ID: &str = "_startSurrogateId";
    /// Inclusive upper surrogate-id bound of this worker's segment.
    pub const END_SURROGATE_ID: &str = "_endSurrogateId";
    /// Partition key range of the backing store.
    pub const FEED_RANGE: &str = "_feedRange";
}

/// An ordered list of `(name, value)` query parameters.
///
/// The same name may appear more than once (`_lastUpdated=le…&_lastUpdated=ge…`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryParameters(Vec<(String, String)>);

impl QueryParameters {
    /// Creates an empty parameter list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a parameter.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Appends a parameter, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    /// Appends every pair from `pairs`.
    pub fn extend<'a, I>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = &'a (String, String)>,
    {
        self.0.extend(pairs.into_iter().cloned());
    }

    /// Returns the first value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value for `name`.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| n == name)
    }

    /// Returns a copy without any parameter named in `excluded`.
    pub fn without(&self, excluded: &[&str]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(n, _)| !excluded.contains(&n.as_str()))
                .cloned()
                .collect(),
        )
    }

    /// Iterates over the pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Returns the number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
