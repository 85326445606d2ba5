//! Configuration for the floe loader.
//!
//! A configuration declares one or more units. Each unit loads one source
//! document into one tenant's partition of one destination table.

use std::collections::HashMap;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use floe_core::config::{
    ConfigPath, Environment, ErrorHandlingConfig, GlobalConfig, KB, MB, Mergeable,
    MetricsConfig, Resource, UnitKey, interpolate, load_from_paths,
};

use crate::error::ConfigError;
use crate::normalize::{normalize_table_name, to_snake_case};

/// What to do with the complete elements of a truncated source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationPolicy {
    /// Fail the batch without touching the destination.
    #[default]
    Abort,
    /// Upsert the complete elements but skip the soft-delete pass.
    CommitWithoutDeletes,
}

/// One (tenant, table) load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    pub tenant_id: String,
    pub destination_table: String,
    /// Source document URL (local path, `file://`, `gs://`, `s3://`).
    pub source_location: String,
    #[serde(default = "default_merge_key_columns")]
    pub merge_key_columns: Vec<String>,
    /// Sources at or above this size are decoded one element at a time.
    #[serde(default = "default_streaming_threshold")]
    pub streaming_threshold_bytes: u64,
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    #[serde(default)]
    pub source_storage_options: HashMap<String, String>,
    #[serde(default)]
    pub on_truncated: TruncationPolicy,
}

fn default_merge_key_columns() -> Vec<String> {
    vec!["id".to_string()]
}

fn default_streaming_threshold() -> u64 {
    100 * MB as u64
}

fn default_progress_interval() -> u64 {
    10_000
}

fn default_chunk_size() -> usize {
    64 * KB
}

impl UnitConfig {
    /// Destination table name in canonical form.
    pub fn table(&self) -> String {
        normalize_table_name(&self.destination_table)
    }

    pub fn resources(&self) -> Vec<Resource> {
        vec![Resource::partition(&self.table(), &self.tenant_id)]
    }

    fn validate(&self, key: &UnitKey) -> Result<(), ConfigError> {
        let unit = key.to_string();
        let required = [
            ("tenant_id", self.tenant_id.trim().is_empty()),
            ("destination_table", self.table().is_empty()),
            ("source_location", self.source_location.trim().is_empty()),
            ("merge_key_columns", self.merge_key_columns.is_empty()),
        ];
        if let Some((field, _)) = required.into_iter().find(|(_, empty)| *empty) {
            return Err(ConfigError::EmptyField { unit, field });
        }
        if self.merge_key_columns.iter().any(|c| c.trim().is_empty()) {
            return Err(ConfigError::InvalidField {
                unit,
                field: "merge_key_columns",
                message: "column names cannot be empty".to_string(),
            });
        }
        if let Some(column) = self
            .merge_key_columns
            .iter()
            .find(|c| to_snake_case(c) != c.as_str())
        {
            return Err(ConfigError::InvalidField {
                unit,
                field: "merge_key_columns",
                message: format!(
                    "'{column}' must use the normalized column name '{}'",
                    to_snake_case(column)
                ),
            });
        }
        if self.progress_interval == 0 {
            return Err(ConfigError::InvalidField {
                unit,
                field: "progress_interval",
                message: "must be greater than 0".to_string(),
            });
        }
        if self.chunk_size_bytes == 0 {
            return Err(ConfigError::InvalidField {
                unit,
                field: "chunk_size_bytes",
                message: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Where destination tables live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub table_uri: String,
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// Local staging for normalized records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Directory for staging artifacts; the system temp dir when unset.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

impl StagingConfig {
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("floe"))
    }
}

/// Where run log events are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogConfig {
    pub path: String,
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// Complete loader configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub units: IndexMap<UnitKey, UnitConfig>,
    #[serde(default)]
    pub destination: Option<DestinationConfig>,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub error_handling: ErrorHandlingConfig,
    #[serde(default)]
    pub run_log: Option<RunLogConfig>,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Mergeable for Config {
    type Key = UnitKey;
    type Component = UnitConfig;

    fn components(&self) -> &IndexMap<UnitKey, UnitConfig> {
        &self.units
    }

    fn components_mut(&mut self) -> &mut IndexMap<UnitKey, UnitConfig> {
        &mut self.units
    }

    fn merge_settings(&mut self, other: Self) {
        if other.destination.is_some() {
            self.destination = other.destination;
        }
        if other.staging.work_dir.is_some() {
            self.staging = other.staging;
        }
        if other.run_log.is_some() {
            self.run_log = other.run_log;
        }
        self.error_handling.merge_from(&other.error_handling);
        self.global.merge_from(&other.global);
        self.metrics.merge_from(&other.metrics);
    }

    fn parse_yaml(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|source| ConfigError::YamlParse { source })
    }
}

impl Config {
    /// Load, merge and validate every configured file and directory.
    pub fn from_paths(paths: &[ConfigPath]) -> Result<Self, ConfigError> {
        let config: Config = load_from_paths(paths)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a single YAML document with environment interpolation.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let result = interpolate(contents);
        if !result.is_ok() {
            return Err(ConfigError::EnvInterpolation {
                message: result.errors.join("\n"),
            });
        }

        let config = Self::parse_yaml(&result.text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.destination {
            Some(destination) if !destination.table_uri.trim().is_empty() => {}
            _ if self.units.is_empty() => {}
            _ => return Err(ConfigError::EmptyTableUri),
        }

        for (key, unit) in &self.units {
            unit.validate(key)?;
        }

        let conflicts =
            Resource::conflicts(self.units.iter().map(|(key, unit)| (key.clone(), unit.resources())));
        if !conflicts.is_empty() {
            let mut messages: Vec<String> = conflicts
                .into_iter()
                .map(|(resource, keys)| {
                    let keys: Vec<_> = keys.iter().map(UnitKey::to_string).collect();
                    format!("{resource} claimed by units {}", keys.join(", "))
                })
                .collect();
            messages.sort();
            return Err(ConfigError::ResourceConflict {
                message: messages.join("; "),
            });
        }
        Ok(())
    }

    /// Resolve the environment from an override, falling back to the config.
    pub fn apply_environment_override(&mut self, name: Option<&str>) -> Result<(), ConfigError> {
        if let Some(name) = name {
            self.global.environment = name.parse::<Environment>()?;
        }
        Ok(())
    }

    /// Keep only the named units, in the requested order. An empty selection
    /// keeps every unit.
    pub fn select_units(&mut self, names: &[String]) -> Result<(), ConfigError> {
        if names.is_empty() {
            return Ok(());
        }
        let mut selected = IndexMap::with_capacity(names.len());
        for name in names {
            let key = UnitKey::new(name.as_str())?;
            let Some(unit) = self.units.swap_remove(&key) else {
                if selected.contains_key(&key) {
                    continue;
                }
                return Err(ConfigError::UnknownUnit { key: name.clone() });
            };
            selected.insert(key, unit);
        }
        self.units = selected;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
destination:
  table_uri: /data/warehouse
units:
  acme-jobs:
    tenant_id: acme
    destination_table: jobs
    source_location: gs://extracts/acme/jobs.json
"#;

    #[test]
    fn test_defaults() {
        let config = Config::parse(BASE).unwrap();
        let unit = &config.units[&UnitKey::new("acme-jobs").unwrap()];
        assert_eq!(unit.merge_key_columns, vec!["id"]);
        assert_eq!(unit.streaming_threshold_bytes, 100 * 1024 * 1024);
        assert_eq!(unit.progress_interval, 10_000);
        assert_eq!(unit.chunk_size_bytes, 64 * 1024);
        assert_eq!(unit.on_truncated, TruncationPolicy::Abort);
        assert_eq!(config.global.environment, Environment::Dev);
        assert!(config.run_log.is_none());
    }

    #[test]
    fn test_interpolation() {
        let yaml = BASE.replace("acme/jobs.json", "${FLOE_TEST_MISSING_SOURCE:-acme/other.json}");
        let config = Config::parse(&yaml).unwrap();
        let unit = config.units.values().next().unwrap();
        assert_eq!(unit.source_location, "gs://extracts/acme/other.json");
    }

    #[test]
    fn test_truncation_policy_parses() {
        let yaml = format!("{BASE}    on_truncated: commit_without_deletes\n");
        let config = Config::parse(&yaml).unwrap();
        assert_eq!(
            config.units.values().next().unwrap().on_truncated,
            TruncationPolicy::CommitWithoutDeletes
        );
    }

    #[test]
    fn test_source_spelled_key_columns_rejected() {
        let yaml = format!("{BASE}    merge_key_columns: [jobId]\n");
        let err = Config::parse(&yaml).unwrap_err();
        assert!(matches!(
            &err,
            ConfigError::InvalidField { field: "merge_key_columns", message, .. }
                if message.contains("job_id")
        ));

        let yaml = format!("{BASE}    merge_key_columns: [job_id, line_no]\n");
        let config = Config::parse(&yaml).unwrap();
        assert_eq!(
            config.units.values().next().unwrap().merge_key_columns,
            vec!["job_id", "line_no"]
        );
    }

    #[test]
    fn test_zero_progress_interval_rejected() {
        let yaml = format!("{BASE}    progress_interval: 0\n");
        assert!(matches!(
            Config::parse(&yaml),
            Err(ConfigError::InvalidField { field: "progress_interval", .. })
        ));
    }

    #[test]
    fn test_empty_tenant_rejected() {
        let yaml = BASE.replace("tenant_id: acme", "tenant_id: \"\"");
        assert!(matches!(
            Config::parse(&yaml),
            Err(ConfigError::EmptyField { field: "tenant_id", .. })
        ));
    }

    #[test]
    fn test_missing_destination_rejected() {
        let yaml = BASE.replace("destination:\n  table_uri: /data/warehouse\n", "");
        assert!(matches!(Config::parse(&yaml), Err(ConfigError::EmptyTableUri)));
    }

    #[test]
    fn test_partition_conflict_rejected() {
        let yaml = format!(
            "{BASE}  acme-jobs-again:\n    tenant_id: acme\n    destination_table: Jobs\n    source_location: /tmp/jobs.json\n"
        );
        let err = Config::parse(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ResourceConflict { .. }));
        assert!(err.to_string().contains("acme-jobs, acme-jobs-again"));
    }

    #[test]
    fn test_same_table_different_tenants_allowed() {
        let yaml = format!(
            "{BASE}  globex-jobs:\n    tenant_id: globex\n    destination_table: jobs\n    source_location: /tmp/jobs.json\n"
        );
        assert_eq!(Config::parse(&yaml).unwrap().units.len(), 2);
    }

    #[test]
    fn test_select_units() {
        let yaml = format!(
            "{BASE}  globex-jobs:\n    tenant_id: globex\n    destination_table: jobs\n    source_location: /tmp/jobs.json\n"
        );
        let mut config = Config::parse(&yaml).unwrap();
        config.select_units(&["globex-jobs".to_string()]).unwrap();
        assert_eq!(config.units.len(), 1);
        assert!(matches!(
            config.select_units(&["nope".to_string()]),
            Err(ConfigError::UnknownUnit { .. })
        ));
    }

    #[test]
    fn test_environment_override() {
        let mut config = Config::parse(BASE).unwrap();
        config.apply_environment_override(Some("pro")).unwrap();
        assert_eq!(config.global.environment, Environment::Pro);
        assert!(config.apply_environment_override(Some("prod")).is_err());
    }

    #[test]
    fn test_table_name_normalized() {
        let yaml = BASE.replace("destination_table: jobs", "destination_table: service-calls/v2");
        let config = Config::parse(&yaml).unwrap();
        assert_eq!(config.units.values().next().unwrap().table(), "service_calls_v2");
    }

    #[test]
    fn test_merge_settings() {
        let mut base = Config::parse(BASE).unwrap();
        let other = Config::parse("run_log:\n  path: /logs\nglobal:\n  total_concurrency: 8\n").unwrap();
        base.merge(other).unwrap();
        assert_eq!(base.run_log.unwrap().path, "/logs");
        assert_eq!(base.global.total_concurrency, 8);
        assert!(base.destination.is_some());
    }
}
