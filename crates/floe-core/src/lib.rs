//! floe-core: storage, configuration and observability plumbing for floe.
//!
//! - `storage/` - Object storage abstraction (S3, GCS, local)
//! - `metrics/` - Metric events and the Prometheus exporter
//! - `config/` - Multi-file YAML loading, environment interpolation, unit keys
//! - `signal` - Signal handling for graceful shutdown
//! - `tracing` - Subscriber setup
//! - `error` - Common error types

pub mod config;
pub mod error;
pub mod metrics;
pub mod signal;
pub mod storage;
pub mod tracing;

pub use config::{
    CliArgs, ConfigPath, Environment, ErrorHandlingConfig, GlobalConfig, KB, MB, MetricsConfig,
    Mergeable, Resource, UnitKey,
};
pub use error::{ConfigError, DlqError, MetricsError, StorageError};
pub use signal::shutdown_signal;
pub use storage::{StorageProvider, StorageProviderRef};
pub use tracing::init_tracing;
