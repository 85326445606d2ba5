//! Per-run log events.
//!
//! Every unit run, successful or not, writes one JSON event describing its
//! outcome to `{run_log.path}/{date}/{unit}-{id}.json`.

use chrono::{DateTime, Utc};
use object_store::path::Path;
use serde::Serialize;
use snafu::prelude::*;
use tracing::debug;

use floe_core::{Environment, StorageProvider, StorageProviderRef};

use crate::config::RunLogConfig;
use crate::error::{RunLogEncodeSnafu, RunLogError, RunLogStorageSnafu, RunLogWriteSnafu};
use crate::pipeline::{RunStatus, RunSummary};

/// Severity of a run log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Info,
    Error,
}

/// One run log entry.
#[derive(Debug, Clone, Serialize)]
pub struct RunLogEvent<'a> {
    pub timestamp: DateTime<Utc>,
    pub tenant_id: &'a str,
    pub table: &'a str,
    pub unit: &'a str,
    pub environment: Environment,
    pub event_type: EventType,
    pub title: String,
    pub message: String,
    pub source: &'static str,
    pub info: &'a RunSummary,
}

impl<'a> RunLogEvent<'a> {
    pub fn from_summary(summary: &'a RunSummary, environment: Environment) -> Self {
        let (event_type, title, message) = match summary.status {
            RunStatus::Succeeded => (
                EventType::Info,
                format!("Loaded {}", summary.table),
                format!(
                    "{} read, {} inserted, {} updated, {} unchanged, {} soft-deleted, {} skipped",
                    summary.records_read,
                    summary.records_inserted,
                    summary.records_updated,
                    summary.records_unchanged,
                    summary.records_soft_deleted,
                    summary.records_skipped,
                ),
            ),
            RunStatus::Failed | RunStatus::Cancelled => (
                EventType::Error,
                format!("Failed to load {}", summary.table),
                summary.error.clone().unwrap_or_default(),
            ),
        };
        Self {
            timestamp: Utc::now(),
            tenant_id: &summary.tenant_id,
            table: &summary.table,
            unit: &summary.unit,
            environment,
            event_type,
            title,
            message,
            source: "floe",
            info: summary,
        }
    }
}

/// Writer for run log events.
#[derive(Clone)]
pub struct RunLogWriter {
    storage: StorageProviderRef,
}

impl RunLogWriter {
    pub async fn from_config(config: &RunLogConfig) -> Result<Self, RunLogError> {
        let storage =
            StorageProvider::for_url_with_options(&config.path, config.storage_options.clone())
                .await
                .context(RunLogStorageSnafu)?;
        Ok(Self::new(storage.into()))
    }

    pub fn new(storage: StorageProviderRef) -> Self {
        Self { storage }
    }

    /// Write one event and return its path relative to the log root.
    pub async fn write(&self, event: &RunLogEvent<'_>) -> Result<Path, RunLogError> {
        let path = Path::from(format!(
            "{}/{}-{}.json",
            event.timestamp.format("%Y-%m-%d"),
            event.unit,
            uuid::Uuid::now_v7()
        ));
        let bytes = serde_json::to_vec(event).context(RunLogEncodeSnafu)?;
        self.storage
            .put(&path, bytes)
            .await
            .context(RunLogWriteSnafu)?;
        debug!(target = %event.unit, path = %path, "Wrote run log event");
        Ok(path)
    }
}
