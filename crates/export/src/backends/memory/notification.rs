//! In-memory notification sink.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::{ExportJobCompleted, NotificationSink};
use crate::error::ExportResult;

/// Records every published event.
#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    events: Mutex<Vec<ExportJobCompleted>>,
}

impl InMemoryNotificationSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the events published so far.
    pub fn events(&self) -> Vec<ExportJobCompleted> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn publish(
        &self,
        event: &ExportJobCompleted,
        _cancel: &CancellationToken,
    ) -> ExportResult<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
