//! Buffered NDJSON output per resource type.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::DestinationClient;
use crate::error::ExportResult;
use crate::types::ExportFileInfo;

#[derive(Debug, Default)]
struct Buffer {
    data: Vec<u8>,
    count: u64,
}

/// Buffers exported resources per type and commits them to the destination.
///
/// Files are named `{job_id}/{ResourceType}-{sequence}.ndjson`. Commits append
/// to the last file of a type until its committed size reaches the rolling
/// size, then start the next sequence. The job record's
/// [`ExportFileInfo`] counters are only updated after the destination accepted
/// the block; a failed commit keeps the buffer so a later commit retries it.
pub struct OutputWriter {
    job_id: String,
    destination: Arc<dyn DestinationClient>,
    rolling_file_size: u64,
    buffers: BTreeMap<String, Buffer>,
}

impl OutputWriter {
    /// Creates a writer rolling files at `rolling_file_size` bytes.
    pub fn new(
        job_id: impl Into<String>,
        destination: Arc<dyn DestinationClient>,
        rolling_file_size: u64,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            destination,
            rolling_file_size,
            buffers: BTreeMap::new(),
        }
    }

    /// Buffers one NDJSON line for `resource_type`.
    pub fn write(&mut self, resource_type: &str, line: &str) {
        let buffer = self.buffers.entry(resource_type.to_string()).or_default();
        buffer.data.extend_from_slice(line.as_bytes());
        buffer.data.push(b'\n');
        buffer.count += 1;
    }

    /// Returns the number of bytes buffered for `resource_type`.
    pub fn buffered_bytes(&self, resource_type: &str) -> usize {
        self.buffers.get(resource_type).map_or(0, |b| b.data.len())
    }

    /// Returns true if nothing is waiting to be committed.
    pub fn is_empty(&self) -> bool {
        self.buffers.values().all(|b| b.data.is_empty())
    }

    /// Commits every non-empty buffer.
    pub async fn commit_all(
        &mut self,
        output: &mut BTreeMap<String, Vec<ExportFileInfo>>,
        cancel: &CancellationToken,
    ) -> ExportResult<()> {
        let types: Vec<String> = self
            .buffers
            .iter()
            .filter(|(_, b)| !b.data.is_empty())
            .map(|(t, _)| t.clone())
            .collect();
        for resource_type in types {
            self.flush(&resource_type, output, cancel).await?;
        }
        Ok(())
    }

    /// Commits only the buffers holding more than `threshold` bytes.
    pub async fn commit_full(
        &mut self,
        output: &mut BTreeMap<String, Vec<ExportFileInfo>>,
        threshold: u64,
        cancel: &CancellationToken,
    ) -> ExportResult<()> {
        let types: Vec<String> = self
            .buffers
            .iter()
            .filter(|(_, b)| b.data.len() as u64 > threshold)
            .map(|(t, _)| t.clone())
            .collect();
        for resource_type in types {
            self.flush(&resource_type, output, cancel).await?;
        }
        Ok(())
    }

    async fn flush(
        &mut self,
        resource_type: &str,
        output: &mut BTreeMap<String, Vec<ExportFileInfo>>,
        cancel: &CancellationToken,
    ) -> ExportResult<()> {
        let Some(buffer) = self.buffers.get(resource_type) else {
            return Ok(());
        };
        if buffer.data.is_empty() {
            return Ok(());
        }

        let files = output.entry(resource_type.to_string()).or_default();
        let (sequence, rolled) = match files.last() {
            Some(last) if last.committed_bytes < self.rolling_file_size => (last.sequence, false),
            Some(last) => (last.sequence + 1, true),
            None => (1, true),
        };
        let file_name = format!("{}/{}-{}.ndjson", self.job_id, resource_type, sequence);

        let uri = self
            .destination
            .commit_block(&file_name, &buffer.data, cancel)
            .await?;

        let bytes = buffer.data.len() as u64;
        let count = buffer.count;
        if rolled {
            files.push(ExportFileInfo::new(resource_type, uri, sequence));
        }
        if let Some(file) = files.last_mut() {
            file.record_commit(count, bytes);
        }
        self.buffers.remove(resource_type);

        debug!(
            resource_type = %resource_type,
            file = %file_name,
            bytes = bytes,
            count = count,
            "Committed export block"
        );
        Ok(())
    }
}
