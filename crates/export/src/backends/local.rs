//! Export destination writing to a local directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::{DestinationClient, DestinationConfig};
use crate::error::{ExportError, ExportResult};

/// Writes output files under `{root}/{container}/`.
#[derive(Debug)]
pub struct LocalDirectoryDestination {
    root: PathBuf,
    container_dir: RwLock<Option<PathBuf>>,
}

impl LocalDirectoryDestination {
    /// Creates a destination rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            container_dir: RwLock::new(None),
        }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn io_error(path: &Path, err: std::io::Error) -> ExportError {
    ExportError::destination(format!("{}: {}", path.display(), err))
}

#[async_trait]
impl DestinationClient for LocalDirectoryDestination {
    async fn connect(
        &self,
        _config: &DestinationConfig,
        container: &str,
        cancel: &CancellationToken,
    ) -> ExportResult<()> {
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        let dir = self.root.join(container);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;
        debug!(path = %dir.display(), "Connected to local export directory");
        *self.container_dir.write() = Some(dir);
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
        let dir = self
            .container_dir
            .read()
            .clone()
            .ok_or_else(|| ExportError::destination("destination is not connected"))?;
        let path = dir.join(file_name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        file.write_all(data).await.map_err(|e| io_error(&path, e))?;
        file.sync_all().await.map_err(|e| io_error(&path, e))?;

        Ok(format!("file://{}", path.display()))
    }
}
