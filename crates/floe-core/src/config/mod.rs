//! Configuration types shared by the loader binary and its tooling.

mod loader;
mod path;
mod resource;
mod unit_key;
mod vars;

pub use loader::{Mergeable, load_file, load_from_paths};
pub use path::{CliArgs, ConfigPath, is_yaml_file};
pub use resource::Resource;
pub use unit_key::UnitKey;
pub use vars::{InterpolationResult, interpolate, interpolate_with};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Deployment environment a run belongs to.
///
/// Recorded on every run log entry and used as a metric label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Qua,
    Pro,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Qua => "qua",
            Environment::Pro => "pro",
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "qua" => Ok(Environment::Qua),
            "pro" => Ok(Environment::Pro),
            _ => Err(ConfigError::UnknownEnvironment {
                name: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    #[serde(default)]
    pub environment: Environment,
    /// Maximum number of units loading concurrently (default: 4).
    #[serde(default = "default_total_concurrency")]
    pub total_concurrency: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            total_concurrency: default_total_concurrency(),
        }
    }
}

impl GlobalConfig {
    /// Merge values from another GlobalConfig (last non-default wins).
    pub fn merge_from(&mut self, other: &Self) {
        if other.environment != Environment::default() {
            self.environment = other.environment;
        }
        if other.total_concurrency != default_total_concurrency() {
            self.total_concurrency = other.total_concurrency;
        }
    }
}

fn default_total_concurrency() -> usize {
    4
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Start the exporter. Batch runs usually leave this off.
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

impl MetricsConfig {
    /// Merge values from another MetricsConfig (last-write-wins).
    pub fn merge_from(&mut self, other: &Self) {
        if other.enabled {
            self.enabled = true;
        }
        if other.address != default_metrics_address() {
            self.address = other.address.clone();
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

/// How record-level failures are tolerated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorHandlingConfig {
    /// Skipped records allowed per unit before the run fails (0 = unlimited).
    #[serde(default)]
    pub max_skipped_records: usize,
    /// Where skipped records are written; no dead-letter output when unset.
    #[serde(default)]
    pub dlq_path: Option<String>,
    /// Storage options for the dead-letter location (credentials, region, etc.)
    #[serde(default)]
    pub dlq_storage_options: HashMap<String, String>,
}

impl ErrorHandlingConfig {
    pub fn merge_from(&mut self, other: &Self) {
        if other.max_skipped_records != 0 {
            self.max_skipped_records = other.max_skipped_records;
        }
        if other.dlq_path.is_some() {
            self.dlq_path = other.dlq_path.clone();
            self.dlq_storage_options = other.dlq_storage_options.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!(" PRO ".parse::<Environment>().unwrap(), Environment::Pro);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_environment_defaults_to_dev() {
        let global: GlobalConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(global.environment, Environment::Dev);
        assert_eq!(global.total_concurrency, 4);
    }

    #[test]
    fn test_metrics_merge() {
        let mut base = MetricsConfig::default();
        base.merge_from(&MetricsConfig {
            enabled: true,
            address: "127.0.0.1:9100".to_string(),
        });
        assert!(base.enabled);
        assert_eq!(base.address, "127.0.0.1:9100");

        base.merge_from(&MetricsConfig::default());
        assert!(base.enabled);
        assert_eq!(base.address, "127.0.0.1:9100");
    }

    #[test]
    fn test_error_handling_merge_keeps_dlq_options_together() {
        let mut base = ErrorHandlingConfig::default();
        let other = ErrorHandlingConfig {
            max_skipped_records: 5,
            dlq_path: Some("gs://bucket/dlq".to_string()),
            dlq_storage_options: HashMap::from([("k".to_string(), "v".to_string())]),
        };
        base.merge_from(&other);
        assert_eq!(base.max_skipped_records, 5);
        assert_eq!(base.dlq_path.as_deref(), Some("gs://bucket/dlq"));
        assert_eq!(base.dlq_storage_options.len(), 1);
    }
}
