//! The external store receiving export output.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ExportResult;

/// Destination settings resolved for one job.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DestinationConfig {
    /// Destination URI; takes precedence over `connection`.
    pub uri: Option<String>,
    /// Connection string of the worker's configured destination.
    pub connection: Option<String>,
}

impl std::fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("uri", &self.uri)
            .field("connection", &self.connection.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Client for the export destination.
///
/// Output is written as append-only blocks: each `commit_block` call appends
/// `data` to `file_name` and makes it durable before returning.
#[async_trait]
pub trait DestinationClient: Send + Sync {
    /// Connects to the destination and selects `container`.
    ///
    /// # Errors
    ///
    /// * `ExportError::DestinationConnection` - if the destination is unreachable
    async fn connect(
        &self,
        config: &DestinationConfig,
        container: &str,
        cancel: &CancellationToken,
    ) -> ExportResult<()>;

    /// Appends `data` to `file_name` and returns the file's URI.
    ///
    /// # Errors
    ///
    /// * `ExportError::DestinationConnection` - if the destination is unreachable
    async fn commit_block(
        &self,
        file_name: &str,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> ExportResult<String>;
}
