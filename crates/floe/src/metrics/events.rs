//! Internal events for loader metrics emission.
//!
//! Every event carries a `unit` label so that per-unit dashboards can be
//! built from a single process running many (tenant, table) units.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

pub use floe_core::metrics::events::InternalEvent;

use crate::merge::Operation;

/// Event emitted when elements are consumed from a source document.
pub struct RecordsRead {
    pub count: u64,
    pub unit: String,
}

impl InternalEvent for RecordsRead {
    fn emit(self) {
        trace!(count = self.count, unit = %self.unit, "Records read");
        counter!("floe_records_read_total", "unit" => self.unit).increment(self.count);
    }
}

/// Stage at which a record was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipStage {
    /// Element was not valid JSON or not an object.
    Parse,
    /// Field-name normalization failed.
    Normalize,
    /// A merge key column was missing, null or not a scalar.
    MissingKey,
    /// The merge key did not survive conformance to the table schema.
    Conflict,
}

impl SkipStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipStage::Parse => "parse",
            SkipStage::Normalize => "normalize",
            SkipStage::MissingKey => "missing_key",
            SkipStage::Conflict => "conflict",
        }
    }
}

/// Event emitted when a record is skipped.
pub struct RecordSkipped {
    pub stage: SkipStage,
    pub unit: String,
}

impl InternalEvent for RecordSkipped {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), unit = %self.unit, "Record skipped");
        counter!(
            "floe_records_skipped_total",
            "stage" => self.stage.as_str(),
            "unit" => self.unit
        )
        .increment(1);
    }
}

/// Event emitted after a merge with the per-operation row counts.
pub struct RecordsMerged {
    pub operation: Operation,
    pub count: u64,
    pub unit: String,
}

impl InternalEvent for RecordsMerged {
    fn emit(self) {
        trace!(operation = self.operation.as_str(), count = self.count, unit = %self.unit, "Records merged");
        counter!(
            "floe_records_merged_total",
            "operation" => self.operation.as_str(),
            "unit" => self.unit
        )
        .increment(self.count);
    }
}

/// Event emitted when records pass through a merge unchanged.
pub struct RecordsUnchanged {
    pub count: u64,
    pub unit: String,
}

impl InternalEvent for RecordsUnchanged {
    fn emit(self) {
        counter!("floe_records_unchanged_total", "unit" => self.unit).increment(self.count);
    }
}

/// Event emitted when destination columns are added or widened.
pub struct SchemaWidened {
    pub columns: u64,
    pub table: String,
}

impl InternalEvent for SchemaWidened {
    fn emit(self) {
        trace!(columns = self.columns, table = %self.table, "Schema widened");
        counter!("floe_schema_columns_widened_total", "table" => self.table)
            .increment(self.columns);
    }
}

/// Event emitted for records that lost a field to a type conflict.
pub struct RecordsConflicting {
    pub count: u64,
    pub unit: String,
}

impl InternalEvent for RecordsConflicting {
    fn emit(self) {
        trace!(count = self.count, unit = %self.unit, "Records with conflicting fields");
        counter!("floe_records_conflicting_total", "unit" => self.unit).increment(self.count);
    }
}

/// Event emitted every `progress_interval` records.
pub struct ProgressReported {
    pub records: u64,
    pub unit: String,
}

impl InternalEvent for ProgressReported {
    fn emit(self) {
        trace!(records = self.records, unit = %self.unit, "Progress reported");
        counter!("floe_progress_reports_total", "unit" => self.unit).increment(1);
    }
}

/// Event emitted when a unit run finishes.
pub struct BatchCompleted {
    pub status: &'static str,
    pub duration: Duration,
    pub unit: String,
}

impl InternalEvent for BatchCompleted {
    fn emit(self) {
        trace!(status = self.status, duration_ms = self.duration.as_millis(), unit = %self.unit, "Batch completed");
        counter!("floe_batches_total", "status" => self.status, "unit" => self.unit.clone())
            .increment(1);
        histogram!("floe_batch_duration_seconds", "unit" => self.unit)
            .record(self.duration.as_secs_f64());
    }
}
