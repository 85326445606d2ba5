//! Dead Letter Queue implementation.
//!
//! Skipped records are buffered and flushed as NDJSON. Every flush writes a
//! new part object so earlier parts are never overwritten.

use bytes::Bytes;
use chrono::Utc;
use object_store::path::Path;
use snafu::prelude::*;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use floe_core::error::{DlqSerializeSnafu, DlqStorageSnafu, DlqWriteSnafu};
use floe_core::{ErrorHandlingConfig, StorageProvider, StorageProviderRef};

use crate::error::DlqError;

use super::types::{SkipStats, SkippedRecord};

const DEFAULT_BUFFER_SIZE: usize = 100;

struct State {
    buffer: Vec<SkippedRecord>,
    stats: SkipStats,
    parts: usize,
}

/// Dead Letter Queue for one unit run.
pub struct DeadLetterQueue {
    storage: StorageProviderRef,
    prefix: String,
    state: Mutex<State>,
    buffer_size: usize,
}

impl DeadLetterQueue {
    /// Create a DLQ from configuration.
    ///
    /// Returns `None` if no DLQ path is configured.
    pub async fn from_config(
        config: &ErrorHandlingConfig,
        unit: &str,
    ) -> Result<Option<Self>, DlqError> {
        let Some(dlq_path) = &config.dlq_path else {
            return Ok(None);
        };

        let storage =
            StorageProvider::for_url_with_options(dlq_path, config.dlq_storage_options.clone())
                .await
                .context(DlqStorageSnafu)?;

        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let prefix = format!("{unit}-{timestamp}");
        info!(target = %unit, "DLQ enabled: {}/{}-*.ndjson", dlq_path, prefix);

        Ok(Some(Self::new(storage.into(), prefix, DEFAULT_BUFFER_SIZE)))
    }

    pub fn new(storage: StorageProviderRef, prefix: String, buffer_size: usize) -> Self {
        Self {
            storage,
            prefix,
            state: Mutex::new(State {
                buffer: Vec::new(),
                stats: SkipStats::default(),
                parts: 0,
            }),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Buffer a skipped record, flushing when the buffer is full.
    pub async fn record(&self, skipped: SkippedRecord) {
        debug!(index = skipped.index, stage = skipped.stage.as_str(), "Recording skipped record");
        let should_flush = {
            let mut state = self.state.lock().await;
            state.stats.increment(skipped.stage);
            state.buffer.push(skipped);
            state.buffer.len() >= self.buffer_size
        };

        if should_flush && let Err(e) = self.flush().await {
            error!("Failed to flush DLQ: {}", e);
        }
    }

    /// Write buffered records as a new part.
    pub async fn flush(&self) -> Result<(), DlqError> {
        let (records, part) = {
            let mut state = self.state.lock().await;
            if state.buffer.is_empty() {
                return Ok(());
            }
            state.parts += 1;
            (std::mem::take(&mut state.buffer), state.parts)
        };

        let mut ndjson = String::new();
        for record in &records {
            let line = serde_json::to_string(record).context(DlqSerializeSnafu)?;
            ndjson.push_str(&line);
            ndjson.push('\n');
        }

        let path = Path::from(format!("{}-{part:04}.ndjson", self.prefix));
        self.storage
            .put(&path, Bytes::from(ndjson))
            .await
            .context(DlqWriteSnafu)?;

        info!("Flushed {} records to DLQ part {}", records.len(), path);
        Ok(())
    }

    pub async fn stats(&self) -> SkipStats {
        self.state.lock().await.stats
    }

    /// Flush remaining records and log totals.
    pub async fn finalize(&self) -> Result<(), DlqError> {
        self.flush().await?;
        let stats = self.stats().await;
        info!(
            "DLQ finalized: {} skipped records (parse={}, normalize={}, missing_key={}, conflict={})",
            stats.total(),
            stats.parse,
            stats.normalize,
            stats.missing_key,
            stats.conflict
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::events::SkipStage;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_each_flush_writes_a_new_part() {
        let dir = TempDir::new().unwrap();
        let storage = StorageProvider::for_url_with_options(
            dir.path().to_str().unwrap(),
            HashMap::new(),
        )
        .await
        .unwrap();
        let dlq = DeadLetterQueue::new(Arc::new(storage), "unit-x".to_string(), 2);

        for i in 0..5 {
            dlq.record(SkippedRecord::new(i, i * 10, SkipStage::Parse, "bad", None))
                .await;
        }
        dlq.finalize().await.unwrap();

        let mut parts: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        parts.sort();
        assert_eq!(
            parts,
            vec!["unit-x-0001.ndjson", "unit-x-0002.ndjson", "unit-x-0003.ndjson"]
        );
        let last = std::fs::read_to_string(dir.path().join("unit-x-0003.ndjson")).unwrap();
        let record: SkippedRecord = serde_json::from_str(last.trim()).unwrap();
        assert_eq!(record.index, 4);
        assert_eq!(dlq.stats().await.parse, 5);
    }

    #[tokio::test]
    async fn test_disabled_without_path() {
        let config = ErrorHandlingConfig::default();
        assert!(DeadLetterQueue::from_config(&config, "u").await.unwrap().is_none());
    }
}
