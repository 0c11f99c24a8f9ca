//! In-memory export destination.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::{DestinationClient, DestinationConfig};
use crate::error::{ExportError, ExportResult};

/// Destination keeping files in memory.
///
/// Commits fail until [`connect`](DestinationClient::connect) selected a
/// container. File URIs have the form `memory://{container}/{file}`.
#[derive(Debug, Default)]
pub struct InMemoryDestination {
    container: Mutex<Option<String>>,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryDestination {
    /// Creates an empty destination.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the connected container.
    pub fn container(&self) -> Option<String> {
        self.container.lock().clone()
    }

    /// Returns a snapshot of every file's content.
    pub fn files(&self) -> BTreeMap<String, Vec<u8>> {
        self.files.lock().clone()
    }

    /// Returns one file as text.
    pub fn file(&self, name: &str) -> Option<String> {
        self.files
            .lock()
            .get(name)
            .map(|data| String::from_utf8_lossy(data).into_owned())
    }

    /// Replaces the content of a file.
    pub fn seed(&self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.lock().insert(name.into(), data.into());
    }
}

#[async_trait]
impl DestinationClient for InMemoryDestination {
    async fn connect(
        &self,
        config: &DestinationConfig,
        container: &str,
        cancel: &CancellationToken,
    ) -> ExportResult<()> {
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        if config.uri.is_none() && config.connection.is_none() {
            return Err(ExportError::destination("no destination configured"));
        }
        *self.container.lock() = Some(container.to_string());
        Ok(())
    }

    async fn commit_block(
        &self,
        file_name: &str,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> ExportResult<String> {
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        let container = self
            .container
            .lock()
            .clone()
            .ok_or_else(|| ExportError::destination("destination is not connected"))?;

        self.files
            .lock()
            .entry(file_name.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(format!("memory://{}/{}", container, file_name))
    }
}
