//! Command line and environment configuration of the export worker.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `EXPORT_LOG_LEVEL` | info | Log level |
//! | `EXPORT_MAX_JOB_RESTART_COUNT` | 3 | Restarts before a job is failed |
//! | `EXPORT_MAX_RETRY_COUNT` | 3 | Retries after a destination outage |
//! | `EXPORT_RETRY_DELAY` | 5s | Delay between retries |
//! | `EXPORT_PAGE_SIZE` | 10000 | Resources per search page |
//! | `EXPORT_ROLLING_FILE_SIZE_MB` | 64 | Output file roll-over size |
//! | `EXPORT_DESTINATION_URI` | - | Destination URI |
//! | `EXPORT_DESTINATION_CONNECTION` | - | Destination connection string |
//! | `EXPORT_CONTAINER` | fhir-export | Default output container |

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use helios_export::ExportJobConfig;

/// Runs one export job against local files.
#[derive(Debug, Clone, Parser)]
#[command(name = "export-worker")]
#[command(about = "Runs a Helios bulk export job")]
pub struct WorkerConfig {
    /// Job record to run (JSON).
    #[arg(long)]
    pub job: PathBuf,

    /// Resources to export, one JSON resource per line.
    #[arg(long)]
    pub data: PathBuf,

    /// Directory receiving the output containers.
    #[arg(long, default_value = "export-output")]
    pub output: PathBuf,

    /// Group memberships as a JSON object of group id to patient ids.
    #[arg(long)]
    pub groups: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "EXPORT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Restarts allowed before a job is failed.
    #[arg(long, env = "EXPORT_MAX_JOB_RESTART_COUNT", default_value = "3")]
    pub max_job_restart_count: u32,

    /// Retries after a destination connectivity failure.
    #[arg(long, env = "EXPORT_MAX_RETRY_COUNT", default_value = "3")]
    pub max_retry_count: u32,

    /// Delay between retries, e.g. `5s` or `250ms`.
    #[arg(
        long,
        env = "EXPORT_RETRY_DELAY",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    pub retry_delay: Duration,

    /// Resources per search page.
    #[arg(long, env = "EXPORT_PAGE_SIZE", default_value = "10000")]
    pub page_size: u32,

    /// Output file roll-over size in MB.
    #[arg(long, env = "EXPORT_ROLLING_FILE_SIZE_MB", default_value = "64")]
    pub rolling_file_size_mb: u32,

    /// Destination URI.
    #[arg(long, env = "EXPORT_DESTINATION_URI")]
    pub destination_uri: Option<String>,

    /// Destination connection string.
    #[arg(long, env = "EXPORT_DESTINATION_CONNECTION")]
    pub destination_connection: Option<String>,

    /// Container used when the job does not name one.
    #[arg(long, env = "EXPORT_CONTAINER", default_value = "fhir-export")]
    pub container: String,
}

impl WorkerConfig {
    /// Builds the engine configuration.
    ///
    /// Without an explicit destination the output directory acts as the
    /// connection, so jobs are tied to the directory they were created for.
    pub fn to_export_config(&self) -> ExportJobConfig {
        let destination_connection = self
            .destination_connection
            .clone()
            .or_else(|| match &self.destination_uri {
                Some(_) => None,
                None => Some(format!("file://{}", self.output.display())),
            });

        ExportJobConfig {
            max_job_restart_count: self.max_job_restart_count,
            max_retry_count: self.max_retry_count,
            retry_delay: self.retry_delay,
            maximum_number_of_resources_per_query: self.page_size,
            rolling_file_size_in_mb: self.rolling_file_size_mb,
            destination_uri: self.destination_uri.clone(),
            destination_connection,
            default_container_name: self.container.clone(),
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
        if !LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            errors.push(format!("Unknown log level '{}'", self.log_level));
        }

        if let Err(mut engine) = self.to_export_config().validate() {
            errors.append(&mut engine);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> WorkerConfig {
        let mut argv = vec!["export-worker", "--job", "job.json", "--data", "data.ndjson"];
        argv.extend_from_slice(args);
        WorkerConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.output, PathBuf::from("export-output"));
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert_eq!(config.page_size, 10000);
        assert!(config.groups.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_job_and_data_are_required() {
        assert!(WorkerConfig::try_parse_from(["export-worker", "--job", "job.json"]).is_err());
    }

    #[test]
    fn test_retry_delay_parsing() {
        let config = parse(&["--retry-delay", "250ms"]);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert!(WorkerConfig::try_parse_from([
            "export-worker",
            "--job",
            "j",
            "--data",
            "d",
            "--retry-delay",
            "soon"
        ])
        .is_err());
    }

    #[test]
    fn test_export_config() {
        let config = parse(&["--page-size", "50", "--container", "bulk", "--output", "/tmp/out"]);
        let export = config.to_export_config();
        assert_eq!(export.maximum_number_of_resources_per_query, 50);
        assert_eq!(export.default_container_name, "bulk");
        assert_eq!(export.destination_connection.as_deref(), Some("file:///tmp/out"));

        let pinned = parse(&["--destination-uri", "https://store.example/exports"]);
        assert!(pinned.to_export_config().destination_connection.is_none());
    }

    #[test]
    fn test_validate_invalid() {
        let config = parse(&["--page-size", "0", "--log-level", "loud"]);
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("log level")));
    }
}
