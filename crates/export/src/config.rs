//! Worker-side configuration of export jobs.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::DestinationConfig;

/// Settings shared by every export job a worker runs.
///
/// # Example
///
/// ```
/// use helios_export::ExportJobConfig;
///
/// let config: ExportJobConfig = serde_json::from_str(r#"{
///     "maxRetryCount": 2,
///     "retryDelay": "250ms"
/// }"#).unwrap();
///
/// assert_eq!(config.max_retry_count, 2);
/// assert_eq!(config.retry_delay, std::time::Duration::from_millis(250));
/// assert_eq!(config.max_job_restart_count, 3);
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJobConfig {
    /// Jobs resumed more often than this are failed.
    #[serde(default = "default_max_job_restart_count")]
    pub max_job_restart_count: u32,

    /// Retries after a destination connectivity failure.
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,

    /// Fixed delay between retries.
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub retry_delay: Duration,

    /// Page size of every search (`_count`).
    #[serde(default = "default_maximum_number_of_resources_per_query")]
    pub maximum_number_of_resources_per_query: u32,

    /// Size at which output files roll over, and at which compartment scans
    /// flush their buffers.
    #[serde(default = "default_rolling_file_size_in_mb")]
    pub rolling_file_size_in_mb: u32,

    /// Destination URI of this worker.
    #[serde(default)]
    pub destination_uri: Option<String>,

    /// Destination connection string of this worker.
    #[serde(default)]
    pub destination_connection: Option<String>,

    /// Container used when the job does not name one.
    #[serde(default = "default_container_name")]
    pub default_container_name: String,
}

fn default_max_job_restart_count() -> u32 {
    3
}

fn default_max_retry_count() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_maximum_number_of_resources_per_query() -> u32 {
    10_000
}

fn default_rolling_file_size_in_mb() -> u32 {
    64
}

fn default_container_name() -> String {
    "fhir-export".to_string()
}

impl Default for ExportJobConfig {
    fn default() -> Self {
        Self {
            max_job_restart_count: default_max_job_restart_count(),
            max_retry_count: default_max_retry_count(),
            retry_delay: default_retry_delay(),
            maximum_number_of_resources_per_query: default_maximum_number_of_resources_per_query(),
            rolling_file_size_in_mb: default_rolling_file_size_in_mb(),
            destination_uri: None,
            destination_connection: None,
            default_container_name: default_container_name(),
        }
    }
}

impl std::fmt::Debug for ExportJobConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportJobConfig")
            .field("max_job_restart_count", &self.max_job_restart_count)
            .field("max_retry_count", &self.max_retry_count)
            .field("retry_delay", &self.retry_delay)
            .field(
                "maximum_number_of_resources_per_query",
                &self.maximum_number_of_resources_per_query,
            )
            .field("rolling_file_size_in_mb", &self.rolling_file_size_in_mb)
            .field("destination_uri", &self.destination_uri)
            .field(
                "destination_connection",
                &self.destination_connection.as_ref().map(|_| "<redacted>"),
            )
            .field("default_container_name", &self.default_container_name)
            .finish()
    }
}

impl ExportJobConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.maximum_number_of_resources_per_query == 0 {
            errors.push("Maximum number of resources per query cannot be 0".to_string());
        }

        if self.rolling_file_size_in_mb == 0 {
            errors.push("Rolling file size cannot be 0".to_string());
        }

        if self.default_container_name.trim().is_empty() {
            errors.push("Default container name cannot be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Creates a configuration for testing: small pages, no retry delay.
    pub fn for_testing() -> Self {
        Self {
            max_job_restart_count: 3,
            max_retry_count: 3,
            retry_delay: Duration::from_millis(10),
            maximum_number_of_resources_per_query: 2,
            rolling_file_size_in_mb: 1,
            destination_uri: None,
            destination_connection: Some("memory://test".to_string()),
            default_container_name: "test-export".to_string(),
        }
    }

    /// Returns the destination settings of this worker.
    pub fn destination_config(&self) -> DestinationConfig {
        DestinationConfig {
            uri: self.destination_uri.clone(),
            connection: self.destination_connection.clone(),
        }
    }

    /// Returns the base64 SHA-256 hash of the destination connection string.
    ///
    /// Jobs record this hash when they are created; a worker whose hash
    /// differs refuses to continue them.
    pub fn connection_hash(&self) -> String {
        let connection = self.destination_connection.as_deref().unwrap_or_default();
        STANDARD.encode(Sha256::digest(connection.as_bytes()))
    }

    /// Returns the rolling file size in bytes.
    pub fn rolling_file_size_bytes(&self) -> u64 {
        u64::from(self.rolling_file_size_in_mb) * 1024 * 1024
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
