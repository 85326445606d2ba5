//! Floe: incremental loader that merges extracted JSON documents into
//! tenant-partitioned warehouse tables.
//!
//! This crate handles:
//! - Streaming source documents (JSON arrays or NDJSON) element by element
//! - Normalizing field names to snake_case
//! - Reconciling inferred types with an evolving destination schema
//! - Upsert-with-soft-delete merges stamped with audit columns
//! - Per-run checkpoints with staging artifact cleanup

pub mod checkpoint;
pub mod config;
pub mod destination;
pub mod dlq;
pub mod error;
pub mod merge;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod record;
pub mod run_log;
pub mod schema;
pub mod source;

// Re-export commonly used items
pub use config::{Config, TruncationPolicy, UnitConfig};
pub use destination::{Destination, TableStore};
pub use error::{FailedRun, PipelineError};
pub use merge::{MergeEngine, Operation};
pub use pipeline::{RunContext, RunStatus, RunSummary, run_unit, run_units};
pub use record::Record;

// Re-export from floe-core
pub use floe_core::{CliArgs, StorageProvider, init_tracing, shutdown_signal};
