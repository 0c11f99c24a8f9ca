//! Ambient request context.
//!
//! Collaborators look up the current [`ExportRequestContext`] through a shared
//! [`RequestContextAccessor`] to attribute diagnostics to the running job.
//! The export task installs its context with [`RequestContextAccessor::scope`];
//! the returned guard puts the previous context back when dropped, so the
//! restore happens on success, error, and cancellation alike.

use std::sync::Arc;

use parking_lot::RwLock;

/// Context describing the operation currently being executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequestContext {
    /// Id used to correlate diagnostics; the job id for export tasks.
    correlation_id: String,
    /// Operation name, e.g. `$export`.
    method: String,
    /// Request URI the job was created from.
    uri: String,
    /// True when running outside of an HTTP request.
    is_background_task: bool,
}

impl ExportRequestContext {
    /// Creates the context of a background export job.
    pub fn for_export_job(job_id: impl Into<String>) -> Self {
        let correlation_id = job_id.into();
        Self {
            uri: format!("$export/{}", correlation_id),
            correlation_id,
            method: "$export".to_string(),
            is_background_task: true,
        }
    }

    /// Returns the correlation id.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Returns the operation name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the request URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Returns true for background tasks.
    pub fn is_background_task(&self) -> bool {
        self.is_background_task
    }
}

/// Shared slot holding the current request context.
#[derive(Debug, Clone, Default)]
pub struct RequestContextAccessor {
    current: Arc<RwLock<Option<Arc<ExportRequestContext>>>>,
}

impl RequestContextAccessor {
    /// Creates an empty accessor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current context, if any.
    pub fn current(&self) -> Option<Arc<ExportRequestContext>> {
        self.current.read().clone()
    }

    /// Installs `context` until the returned guard is dropped.
    #[must_use = "the context is restored as soon as the guard is dropped"]
    pub fn scope(&self, context: ExportRequestContext) -> RequestContextGuard {
        let previous = self.current.write().replace(Arc::new(context));
        RequestContextGuard {
            slot: Arc::clone(&self.current),
            previous,
        }
    }
}

/// Restores the previous request context when dropped.
#[derive(Debug)]
pub struct RequestContextGuard {
    slot: Arc<RwLock<Option<Arc<ExportRequestContext>>>>,
    previous: Option<Arc<ExportRequestContext>>,
}

impl Drop for RequestContextGuard {
    fn drop(&mut self) {
        *self.slot.write() = self.previous.take();
    }
}
