//! DLQ record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::events::SkipStage;

/// A skipped source element as written to the DLQ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRecord {
    /// Position of the element in the source document.
    pub index: u64,
    /// Byte offset of the element in the source document.
    pub offset: u64,
    pub stage: SkipStage,
    pub error: String,
    /// Leading bytes of the raw element, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SkippedRecord {
    pub fn new(
        index: u64,
        offset: u64,
        stage: SkipStage,
        error: impl Into<String>,
        snippet: Option<String>,
    ) -> Self {
        Self {
            index,
            offset,
            stage,
            error: error.into(),
            snippet,
            timestamp: Utc::now(),
        }
    }
}

/// Skip counts by stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipStats {
    pub parse: usize,
    pub normalize: usize,
    pub missing_key: usize,
    pub conflict: usize,
}

impl SkipStats {
    pub fn increment(&mut self, stage: SkipStage) {
        match stage {
            SkipStage::Parse => self.parse += 1,
            SkipStage::Normalize => self.normalize += 1,
            SkipStage::MissingKey => self.missing_key += 1,
            SkipStage::Conflict => self.conflict += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.parse + self.normalize + self.missing_key + self.conflict
    }
}
