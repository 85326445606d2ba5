//! Upsert-with-soft-delete merge of a batch into one tenant partition.
//!
//! The engine starts from the last committed snapshot of the partition and
//! builds the next state in memory. Nothing is written until the caller
//! commits the rows returned by [`MergeEngine::finish`], so an error at any
//! point before the commit leaves the destination untouched.

mod locks;

pub use locks::CommitLocks;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::MergeError;
use crate::record::{OPERATION_COLUMN, Record, SYNCED_COLUMN, is_reserved};
use crate::schema::{TableSchema, conform_value};

/// Last operation applied to a destination row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(Operation::Insert),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            other => Err(format!("unknown operation '{other}'")),
        }
    }
}

/// Row counts produced by one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub soft_deleted: u64,
}

/// Identity of a record: its key column values rendered as a JSON array.
///
/// Every key column must hold a non-null scalar.
pub fn record_key(record: &Record, key_columns: &[String]) -> Result<String, MergeError> {
    let mut values = Vec::with_capacity(key_columns.len());
    for column in key_columns {
        match record.get(column) {
            None | Some(Value::Null) => {
                return Err(MergeError::MissingKey {
                    column: column.clone(),
                });
            }
            Some(value @ (Value::Object(_) | Value::Array(_))) => {
                return Err(MergeError::NonScalarKey {
                    column: column.clone(),
                    value: value.clone(),
                });
            }
            Some(value) => values.push(value.clone()),
        }
    }
    Ok(Value::Array(values).to_string())
}

struct Row {
    fields: Record,
    operation: Operation,
    synced: Value,
    seen: bool,
}

/// In-memory merge of one batch into one partition.
pub struct MergeEngine {
    schema: TableSchema,
    key_columns: Vec<String>,
    rows: IndexMap<String, Row>,
    synced_at: Value,
    stats: MergeStats,
}

impl MergeEngine {
    /// Start a merge from the committed rows of a partition.
    ///
    /// Stored values are conformed to `schema` so that rows written before a
    /// column was widened compare equal to incoming values of the new type.
    pub fn new(
        schema: TableSchema,
        key_columns: Vec<String>,
        existing: Vec<Record>,
        synced_at: DateTime<Utc>,
    ) -> Result<Self, MergeError> {
        if existing.is_empty() {
            info!("Partition is empty, all records take the direct insert path");
        }

        let mut rows = IndexMap::with_capacity(existing.len());
        for mut stored in existing {
            let operation = match stored.remove(OPERATION_COLUMN) {
                Some(Value::String(op)) => {
                    op.parse::<Operation>()
                        .map_err(|message| MergeError::InvalidAudit {
                            column: OPERATION_COLUMN.to_string(),
                            message,
                        })?
                }
                other => {
                    return Err(MergeError::InvalidAudit {
                        column: OPERATION_COLUMN.to_string(),
                        message: format!("expected a string, found {other:?}"),
                    });
                }
            };
            let synced = match stored.remove(SYNCED_COLUMN) {
                Some(value @ Value::String(_)) => value,
                other => {
                    return Err(MergeError::InvalidAudit {
                        column: SYNCED_COLUMN.to_string(),
                        message: format!("expected a timestamp, found {other:?}"),
                    });
                }
            };

            let mut fields = Record::new();
            for (name, value) in stored {
                if is_reserved(&name) {
                    continue;
                }
                let value = match schema.get(&name) {
                    Some(ty) => conform_value(value.clone(), ty).unwrap_or(value),
                    None => value,
                };
                fields.insert(name, value);
            }

            let key = record_key(&fields, &key_columns)?;
            rows.insert(
                key,
                Row {
                    fields,
                    operation,
                    synced,
                    seen: false,
                },
            );
        }

        Ok(Self {
            schema,
            key_columns,
            rows,
            synced_at: Value::String(synced_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
            stats: MergeStats::default(),
        })
    }

    /// Merge one conformed record.
    ///
    /// Returns the operation recorded for the row, or `None` if the row was
    /// left unchanged.
    pub fn upsert(&mut self, record: Record) -> Result<Option<Operation>, MergeError> {
        if let Some(column) = record.keys().find(|c| !self.schema.contains(c)) {
            return Err(MergeError::UnreconciledColumn {
                column: column.clone(),
            });
        }
        let key = record_key(&record, &self.key_columns)?;

        let Some(row) = self.rows.get_mut(&key) else {
            self.rows.insert(
                key,
                Row {
                    fields: record,
                    operation: Operation::Insert,
                    synced: self.synced_at.clone(),
                    seen: true,
                },
            );
            self.stats.inserted += 1;
            return Ok(Some(Operation::Insert));
        };

        let changed = record
            .iter()
            .any(|(name, value)| row.fields.get(name).unwrap_or(&Value::Null) != value);
        let reappeared = row.operation == Operation::Delete;
        row.fields.extend(record);
        row.synced = self.synced_at.clone();
        row.seen = true;

        let outcome = match (changed, reappeared) {
            (true, _) => Some(Operation::Update),
            (false, true) => Some(Operation::Insert),
            (false, false) => None,
        };
        match outcome {
            Some(operation) => {
                row.operation = operation;
                match operation {
                    Operation::Update => self.stats.updated += 1,
                    _ => self.stats.inserted += 1,
                }
                if reappeared {
                    debug!(key = %key, operation = %operation, "Soft-deleted row reappeared");
                }
            }
            None => self.stats.unchanged += 1,
        }
        Ok(outcome)
    }

    /// Flag every row not seen in this batch as deleted.
    ///
    /// Rows already flagged keep their tag and audit timestamp and are not
    /// counted again.
    pub fn soft_delete_absent(&mut self) -> u64 {
        let mut flipped = 0;
        for row in self.rows.values_mut() {
            if row.seen || row.operation == Operation::Delete {
                continue;
            }
            row.operation = Operation::Delete;
            row.synced = self.synced_at.clone();
            flipped += 1;
        }
        self.stats.soft_deleted += flipped;
        flipped
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn stats(&self) -> MergeStats {
        self.stats
    }

    /// The next partition state with audit columns stamped on every row.
    pub fn finish(self) -> (Vec<Record>, MergeStats) {
        let rows = self
            .rows
            .into_values()
            .map(|row| {
                let mut record = row.fields;
                record.insert(SYNCED_COLUMN.to_string(), row.synced);
                record.insert(
                    OPERATION_COLUMN.to_string(),
                    Value::String(row.operation.as_str().to_string()),
                );
                record
            })
            .collect();
        (rows, self.stats)
    }
}
