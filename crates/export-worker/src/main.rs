//! Helios Export Worker
//!
//! Runs one bulk export job from a job record file, exporting resources read
//! from an NDJSON file into a local directory.

mod config;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use helios_export::backends::LocalDirectoryDestination;
use helios_export::backends::memory::{
    InMemoryGroupResolver, InMemoryJobStore, InMemoryNotificationSink, InMemorySearchService,
};
use helios_export::backends::redact::RedactingAnonymizerFactory;
use helios_export::{
    ExportJobTask, ExportServices, JobRecord, JobStatus, RequestContextAccessor, init_logging,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::WorkerConfig;

/// Reads the job record, stamping the worker's connection hash on records
/// that were created without one.
fn load_job(path: &Path, connection_hash: &str) -> anyhow::Result<JobRecord> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading job record {}", path.display()))?;
    let mut record: JobRecord = serde_json::from_str(&content)
        .with_context(|| format!("parsing job record {}", path.display()))?;
    if record.connection_hash.is_empty() {
        record.connection_hash = connection_hash.to_string();
    }
    Ok(record)
}

/// Loads one resource per non-empty line.
fn load_resources(path: &Path, search: &InMemorySearchService) -> anyhow::Result<usize> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading resources {}", path.display()))?;
    let mut count = 0;
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let resource: serde_json::Value = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid JSON", path.display(), number + 1))?;
        search
            .insert(resource)
            .with_context(|| format!("{}:{}: invalid resource", path.display(), number + 1))?;
        count += 1;
    }
    Ok(count)
}

fn load_groups(path: &Path, resolver: &InMemoryGroupResolver) -> anyhow::Result<usize> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading groups {}", path.display()))?;
    let groups: HashMap<String, Vec<String>> = serde_json::from_str(&content)
        .with_context(|| format!("parsing groups {}", path.display()))?;
    let count = groups.len();
    for (group_id, members) in groups {
        resolver.set_group(group_id, members);
    }
    Ok(count)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    let export_config = config.to_export_config();
    let record = load_job(&config.job, &export_config.connection_hash())?;

    let search = Arc::new(InMemorySearchService::new());
    let resources = load_resources(&config.data, &search)?;
    let groups = Arc::new(InMemoryGroupResolver::new());
    if let Some(path) = &config.groups {
        load_groups(path, &groups)?;
    }

    info!(
        job_id = %record.id,
        export_type = %record.export_type,
        resources,
        output = %config.output.display(),
        "Starting export worker"
    );

    let store = Arc::new(InMemoryJobStore::new());
    let version = store.insert(record.clone());
    let services = ExportServices {
        job_store: store,
        search,
        group_resolver: groups,
        destination: Arc::new(LocalDirectoryDestination::new(&config.output)),
        anonymizer_factory: Some(Arc::new(RedactingAnonymizerFactory::new())),
        notifications: Arc::new(InMemoryNotificationSink::new()),
        context: RequestContextAccessor::new(),
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling export job");
            on_signal.cancel();
        }
    });

    let task = ExportJobTask::new(export_config, services);
    let finished = task.execute(record, version, &cancel).await?;

    println!("{}", serde_json::to_string_pretty(&finished)?);

    if finished.status != JobStatus::Completed {
        std::process::exit(2);
    }
    Ok(())
}
