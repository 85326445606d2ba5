//! Run summary emitted for every unit run.

use indexmap::IndexMap;
use serde::Serialize;

use crate::schema::SchemaChange;

/// Final state of a unit run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    #[default]
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// Records that lost one field to a type conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictSummary {
    pub field: String,
    pub reason: String,
    pub records: u64,
}

/// Counts accumulated by one unit run.
///
/// Always emitted, including when the run fails, with the counts reached
/// before the failure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub unit: String,
    pub tenant_id: String,
    pub table: String,
    pub records_read: u64,
    pub records_inserted: u64,
    pub records_updated: u64,
    pub records_unchanged: u64,
    pub records_soft_deleted: u64,
    pub records_skipped: u64,
    pub records_conflicting: u64,
    pub records_duplicated: u64,
    pub conflicts: Vec<ConflictSummary>,
    pub schema_changes: Vec<SchemaChange>,
    pub progress_reports: u64,
    /// The source was cut off and only its complete elements were committed.
    pub truncated: bool,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn new(unit: &str, tenant_id: &str, table: &str) -> Self {
        Self {
            unit: unit.to_string(),
            tenant_id: tenant_id.to_string(),
            table: table.to_string(),
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Per-field conflict counter, in first-seen order.
#[derive(Debug, Default)]
pub(crate) struct ConflictCounter {
    fields: IndexMap<String, (String, u64)>,
}

impl ConflictCounter {
    pub(crate) fn record(&mut self, field: &str, reason: &str) {
        self.fields
            .entry(field.to_string())
            .or_insert_with(|| (reason.to_string(), 0))
            .1 += 1;
    }

    pub(crate) fn into_summaries(self) -> Vec<ConflictSummary> {
        self.fields
            .into_iter()
            .map(|(field, (reason, records))| ConflictSummary {
                field,
                reason,
                records,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_serializes_flat_counts() {
        let mut summary = RunSummary::new("u", "acme", "jobs");
        summary.records_read = 15;
        summary.status = RunStatus::Succeeded;
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["records_read"], 15);
        assert_eq!(json["status"], "succeeded");
        assert!(json.get("error").is_none());
        assert_eq!(json["conflicts"], serde_json::json!([]));
    }

    #[test]
    fn test_conflicts_keep_first_reason() {
        let mut counter = ConflictCounter::default();
        counter.record("address", "STRUCT into STRING");
        counter.record("tags", "mixed");
        counter.record("address", "other");
        let summaries = counter.into_summaries();
        assert_eq!(
            summaries[0],
            ConflictSummary {
                field: "address".to_string(),
                reason: "STRUCT into STRING".to_string(),
                records: 2
            }
        );
        assert_eq!(summaries[1].records, 1);
    }
}
