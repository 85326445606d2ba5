//! Identifier for a configured load unit.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::ConfigError;

/// Identifier of one (tenant, table) load unit in the configuration.
///
/// Keys appear in log fields, metric labels and staging file names, so they
/// are restricted to `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct UnitKey(String);

impl UnitKey {
    /// Create a key, validating its character set.
    pub fn new(id: impl Into<String>) -> Result<Self, ConfigError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(Self(id))
        } else {
            Err(ConfigError::InvalidUnitKey { key: id })
        }
    }

    /// Get the underlying identifier string.
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for UnitKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        UnitKey::new(raw).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UnitKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
