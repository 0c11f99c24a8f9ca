//! Error types for the export engine.
//!
//! Every failure an export job can run into is a variant of [`ExportError`].
//! The orchestrator never matches on where an error came from; it asks the
//! error for its [`ExportErrorKind`], whether it is retryable, and which
//! [`StatusClass`] should be reported to the client.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The error type for all export operations.
#[derive(Error, Debug)]
pub enum ExportError {
    /// The destination could not be reached. This is the only retryable error.
    #[error("destination connection failed: {message}")]
    DestinationConnection { message: String },

    /// The worker's destination connection no longer matches the one the job
    /// was created with.
    #[error("destination connection changed while export job {job_id} was running")]
    DestinationReconfigured { job_id: String },

    /// The export request itself is invalid.
    #[error("invalid export request: {message}")]
    BadRequest { message: String },

    /// A resource referenced by the job (for example the exported group) does
    /// not exist.
    #[error("resource not found: {message}")]
    ResourceNotFound {
        message: String,
        user_correctable: bool,
    },

    #[error("anonymization configuration not found: {message}")]
    AnonymizationConfigNotFound { message: String },

    #[error("failed to fetch anonymization configuration: {message}")]
    AnonymizationConfigFetch { message: String },

    #[error("failed to parse anonymization configuration: {message}")]
    AnonymizationConfigParse { message: String },

    #[error("failed to anonymize {resource_type}/{id}: {message}")]
    Anonymization {
        resource_type: String,
        id: String,
        message: String,
    },

    /// The search backend asked us to back off.
    #[error("request rate exceeded")]
    RequestRateExceeded { retry_after_ms: Option<u64> },

    /// The job record can no longer be stored because it is too large.
    #[error("export job record {job_id} exceeds the storage size limit ({size} bytes)")]
    RecordTooLarge { job_id: String, size: usize },

    #[error("out of memory: {message}")]
    OutOfMemory { message: String },

    /// The job record was modified by someone else since it was last read.
    #[error("export job record {job_id} was updated by another worker")]
    JobConflict { job_id: String },

    #[error("operation cancelled")]
    Cancelled,

    /// The sub-range of surrogate ids assigned to this worker is exhausted.
    #[error("assigned export segment completed")]
    SegmentCompleted,

    #[error("search failed: {message}")]
    Search { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Fieldless tag identifying the variant of an [`ExportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportErrorKind {
    DestinationConnection,
    DestinationReconfigured,
    BadRequest,
    ResourceNotFound,
    AnonymizationConfigNotFound,
    AnonymizationConfigFetch,
    AnonymizationConfigParse,
    Anonymization,
    RequestRateExceeded,
    RecordTooLarge,
    OutOfMemory,
    JobConflict,
    Cancelled,
    SegmentCompleted,
    Search,
    Serialization,
    Internal,
}

/// Class of a job failure, reported alongside the failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusClass {
    BadRequest,
    Configuration,
    TooManyRequests,
    PayloadTooLarge,
    InternalServerError,
    ServiceUnavailable,
}

impl StatusClass {
    /// Returns the HTTP status code the REST layer reports for this class.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest | Self::Configuration => 400,
            Self::PayloadTooLarge => 413,
            Self::TooManyRequests => 429,
            Self::InternalServerError => 500,
            Self::ServiceUnavailable => 503,
        }
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest => write!(f, "bad-request"),
            Self::Configuration => write!(f, "configuration"),
            Self::TooManyRequests => write!(f, "too-many-requests"),
            Self::PayloadTooLarge => write!(f, "payload-too-large"),
            Self::InternalServerError => write!(f, "internal-server-error"),
            Self::ServiceUnavailable => write!(f, "service-unavailable"),
        }
    }
}

impl ExportError {
    /// Creates an internal error without a source.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a destination connectivity error.
    pub fn destination(message: impl Into<String>) -> Self {
        Self::DestinationConnection {
            message: message.into(),
        }
    }

    /// Creates a bad-request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Returns the kind tag for this error.
    pub fn kind(&self) -> ExportErrorKind {
        match self {
            Self::DestinationConnection { .. } => ExportErrorKind::DestinationConnection,
            Self::DestinationReconfigured { .. } => ExportErrorKind::DestinationReconfigured,
            Self::BadRequest { .. } => ExportErrorKind::BadRequest,
            Self::ResourceNotFound { .. } => ExportErrorKind::ResourceNotFound,
            Self::AnonymizationConfigNotFound { .. } => {
                ExportErrorKind::AnonymizationConfigNotFound
            }
            Self::AnonymizationConfigFetch { .. } => ExportErrorKind::AnonymizationConfigFetch,
            Self::AnonymizationConfigParse { .. } => ExportErrorKind::AnonymizationConfigParse,
            Self::Anonymization { .. } => ExportErrorKind::Anonymization,
            Self::RequestRateExceeded { .. } => ExportErrorKind::RequestRateExceeded,
            Self::RecordTooLarge { .. } => ExportErrorKind::RecordTooLarge,
            Self::OutOfMemory { .. } => ExportErrorKind::OutOfMemory,
            Self::JobConflict { .. } => ExportErrorKind::JobConflict,
            Self::Cancelled => ExportErrorKind::Cancelled,
            Self::SegmentCompleted => ExportErrorKind::SegmentCompleted,
            Self::Search { .. } => ExportErrorKind::Search,
            Self::Serialization { .. } => ExportErrorKind::Serialization,
            Self::Internal { .. } => ExportErrorKind::Internal,
        }
    }

    /// Returns true if the search/write loop should be retried after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DestinationConnection { .. })
    }

    /// Returns true if this error was caused by cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the status class reported when this error fails a job.
    pub fn status_class(&self) -> StatusClass {
        match self {
            Self::DestinationReconfigured { .. }
            | Self::AnonymizationConfigNotFound { .. }
            | Self::AnonymizationConfigFetch { .. }
            | Self::AnonymizationConfigParse { .. } => StatusClass::Configuration,
            Self::BadRequest { .. }
            | Self::ResourceNotFound { .. }
            | Self::Anonymization { .. } => StatusClass::BadRequest,
            Self::DestinationConnection { .. } => StatusClass::ServiceUnavailable,
            Self::RequestRateExceeded { .. } => StatusClass::TooManyRequests,
            Self::RecordTooLarge { .. } => StatusClass::PayloadTooLarge,
            Self::OutOfMemory { .. }
            | Self::JobConflict { .. }
            | Self::Cancelled
            | Self::SegmentCompleted
            | Self::Search { .. }
            | Self::Serialization { .. }
            | Self::Internal { .. } => StatusClass::InternalServerError,
        }
    }

    /// Returns true if the failure reason should be shown to the client
    /// verbatim. Unclassified faults are reported with a generic reason and
    /// their detail is kept as diagnostics.
    pub fn is_client_facing(&self) -> bool {
        !matches!(
            self,
            Self::OutOfMemory { .. }
                | Self::Search { .. }
                | Self::Serialization { .. }
                | Self::Internal { .. }
        )
    }
}

/// Result type alias for export operations.
pub type ExportResult<T> = Result<T, ExportError>;

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<base64::DecodeError> for ExportError {
    fn from(err: base64::DecodeError) -> Self {
        ExportError::Serialization {
            message: format!("invalid continuation token encoding: {}", err),
        }
    }
}
