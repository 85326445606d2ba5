//! Error types for the floe loader.

use std::path::PathBuf;

use snafu::prelude::*;

use crate::pipeline::RunSummary;
use crate::schema::FieldType;

// Re-export common errors
pub use floe_core::error::{ConfigError, DlqError, MetricsError, StorageError};

/// Errors raised while reading a source document.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReaderError {
    /// The stream ended in the middle of an element or before the closing `]`.
    #[snafu(display(
        "Source truncated at byte {offset} after {complete} complete element(s)"
    ))]
    TruncatedInput { offset: u64, complete: u64 },

    /// The source contains no data.
    #[snafu(display("Source document is empty"))]
    EmptySource,

    /// Broken structure between elements.
    #[snafu(display("Malformed document structure at byte {offset}: {message}"))]
    Structural { offset: u64, message: String },

    /// Non-whitespace after the closing `]`.
    #[snafu(display("Unexpected data after the end of the array at byte {offset}"))]
    TrailingData { offset: u64 },

    /// Failed to read the source object.
    #[snafu(display("Failed to read source: {source}"))]
    SourceRead { source: StorageError },
}

/// Errors raised by field-name normalization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NormalizeError {
    /// Two source fields map to the same canonical name with different values.
    #[snafu(display(
        "Fields '{first}' and '{second}' both normalize to '{canonical}' with different values ({first_value} vs {second_value})"
    ))]
    NameCollision {
        first: String,
        second: String,
        canonical: String,
        first_value: serde_json::Value,
        second_value: serde_json::Value,
    },
}

/// Errors raised when changing a table schema.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SchemaError {
    /// A change would narrow or reshape an existing column.
    #[snafu(display("Column '{field}' cannot change from {from} to {to}"))]
    IllegalChange {
        field: String,
        from: FieldType,
        to: FieldType,
    },

    /// A change would remove an existing column.
    #[snafu(display("Column '{field}' cannot be dropped"))]
    DroppedColumn { field: String },
}

/// Errors raised by the destination table store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DestinationError {
    /// Storage operation failed.
    #[snafu(display("Destination storage error: {source}"))]
    DestinationStorage { source: StorageError },

    /// The stored schema could not be decoded.
    #[snafu(display("Failed to decode schema at {path}: {source}"))]
    DecodeSchema {
        path: String,
        source: serde_json::Error,
    },

    /// A stored row could not be decoded.
    #[snafu(display("Failed to decode row {line} of {path}: {source}"))]
    DecodeRow {
        path: String,
        line: usize,
        source: serde_json::Error,
    },

    /// Failed to serialize rows or schema.
    #[snafu(display("Failed to encode destination data: {source}"))]
    Encode { source: serde_json::Error },

    /// Rejected schema change.
    #[snafu(display("Rejected schema change: {source}"))]
    SchemaChange { source: SchemaError },
}

/// Errors raised by the merge engine.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MergeError {
    /// A record carries a column the reconciled schema does not know.
    #[snafu(display("Column '{column}' was not reconciled before merge"))]
    UnreconciledColumn { column: String },

    /// A record lacks a merge key column, or the value is null.
    #[snafu(display("Merge key column '{column}' is missing or null"))]
    MissingKey { column: String },

    /// A merge key column holds an object or array.
    #[snafu(display("Merge key column '{column}' must hold a scalar value, found {value}"))]
    NonScalarKey {
        column: String,
        value: serde_json::Value,
    },

    /// A stored row is missing its audit columns or carries invalid ones.
    #[snafu(display("Stored row has invalid audit column '{column}': {message}"))]
    InvalidAudit { column: String, message: String },

    /// Loading the committed partition failed.
    #[snafu(display("Failed to load partition: {source}"))]
    LoadPartition { source: DestinationError },

    /// Writing the new partition state failed; the previous state is intact.
    #[snafu(display("Failed to commit merge: {source}"))]
    MergeCommit { source: DestinationError },
}

/// Errors raised while handling the staging artifact.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ArtifactError {
    /// Filesystem operation on the artifact failed.
    #[snafu(display("Staging artifact I/O failed for {}: {source}", path.display()))]
    ArtifactIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize a staged record.
    #[snafu(display("Failed to encode staged record: {source}"))]
    EncodeStaged { source: serde_json::Error },

    /// A staged line could not be decoded.
    #[snafu(display("Failed to decode staged record on line {line}: {source}"))]
    DecodeStaged {
        line: usize,
        source: serde_json::Error,
    },

    /// The artifact was read before being sealed.
    #[snafu(display("Staging artifact {} is still open for writing", path.display()))]
    NotSealed { path: PathBuf },
}

/// Errors writing a run log event.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RunLogError {
    /// The run log location could not be opened.
    #[snafu(display("Failed to open run log storage: {source}"))]
    RunLogStorage { source: StorageError },

    #[snafu(display("Failed to encode run log event: {source}"))]
    RunLogEncode { source: serde_json::Error },

    #[snafu(display("Failed to write run log event: {source}"))]
    RunLogWrite { source: StorageError },
}

/// Top-level errors for one unit run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Storage error.
    #[snafu(display("Storage error: {source}"))]
    Storage { source: StorageError },

    /// Reader error.
    #[snafu(display("Reader error: {source}"))]
    Reader { source: ReaderError },

    /// Destination error.
    #[snafu(display("Destination error: {source}"))]
    Destination { source: DestinationError },

    /// Merge error.
    #[snafu(display("Merge error: {source}"))]
    Merge { source: MergeError },

    /// Staging artifact error.
    #[snafu(display("Checkpoint error: {source}"))]
    Artifact { source: ArtifactError },

    /// DLQ error.
    #[snafu(display("DLQ error: {source}"))]
    Dlq { source: DlqError },

    /// Too many records were skipped.
    #[snafu(display("Skipped record limit exceeded: {count} records skipped (limit {limit})"))]
    SkipCeilingExceeded { count: usize, limit: usize },

    /// The run was interrupted by a shutdown signal.
    #[snafu(display("Run cancelled after {consumed} record(s)"))]
    Cancelled { consumed: u64 },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },

    /// Run log error.
    #[snafu(display("Run log error: {source}"))]
    RunLog { source: RunLogError },

    /// Task join error.
    #[snafu(display("Task join error: {source}"))]
    TaskJoin { source: tokio::task::JoinError },
}

impl From<StorageError> for PipelineError {
    fn from(source: StorageError) -> Self {
        PipelineError::Storage { source }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<ReaderError> for PipelineError {
    fn from(source: ReaderError) -> Self {
        PipelineError::Reader { source }
    }
}

impl From<DestinationError> for PipelineError {
    fn from(source: DestinationError) -> Self {
        PipelineError::Destination { source }
    }
}

impl From<MergeError> for PipelineError {
    fn from(source: MergeError) -> Self {
        PipelineError::Merge { source }
    }
}

impl From<ArtifactError> for PipelineError {
    fn from(source: ArtifactError) -> Self {
        PipelineError::Artifact { source }
    }
}

impl From<DlqError> for PipelineError {
    fn from(source: DlqError) -> Self {
        PipelineError::Dlq { source }
    }
}

/// A failed run together with the counts accumulated before the failure.
#[derive(Debug)]
pub struct FailedRun {
    pub summary: RunSummary,
    pub error: PipelineError,
}

impl std::fmt::Display for FailedRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unit '{}' failed: {}", self.summary.unit, self.error)
    }
}

impl std::error::Error for FailedRun {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
