//! Column types and table schemas.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::record::{OPERATION_COLUMN, SYNCED_COLUMN};

/// Declared type of a destination column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Timestamp,
    Boolean,
    Struct { fields: IndexMap<String, FieldType> },
    Array { items: Box<FieldType> },
}

impl FieldType {
    pub fn is_scalar(&self) -> bool {
        !matches!(self, FieldType::Struct { .. } | FieldType::Array { .. })
    }

    /// Whether values of `incoming` type fit this scalar type without widening.
    pub(crate) fn holds_scalar(&self, incoming: &FieldType) -> bool {
        self == incoming
            || *self == FieldType::String
            || (*self == FieldType::Float && *incoming == FieldType::Integer)
    }

    /// Whether changing a column from `self` to `to` only ever widens it.
    pub fn widens_to(&self, to: &FieldType) -> bool {
        match (self, to) {
            (from, to) if from == to => true,
            (FieldType::Integer, FieldType::Float) => true,
            (from, FieldType::String) if from.is_scalar() => true,
            (FieldType::Struct { fields: from }, FieldType::Struct { fields: to }) => from
                .iter()
                .all(|(name, ty)| to.get(name).is_some_and(|target| ty.widens_to(target))),
            (FieldType::Array { items: from }, FieldType::Array { items: to }) => {
                from.widens_to(to)
            }
            _ => false,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => f.write_str("STRING"),
            FieldType::Integer => f.write_str("INTEGER"),
            FieldType::Float => f.write_str("FLOAT"),
            FieldType::Timestamp => f.write_str("TIMESTAMP"),
            FieldType::Boolean => f.write_str("BOOLEAN"),
            FieldType::Struct { fields } => {
                f.write_str("STRUCT<")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name} {ty}")?;
                }
                f.write_str(">")
            }
            FieldType::Array { items } => write!(f, "ARRAY<{items}>"),
        }
    }
}

/// Ordered set of destination columns.
///
/// Always carries the audit columns. Columns are never removed and their
/// types only ever widen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    columns: IndexMap<String, FieldType>,
}

impl Default for TableSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl TableSchema {
    /// A schema holding only the audit columns.
    pub fn new() -> Self {
        let mut schema = Self {
            columns: IndexMap::new(),
        };
        schema.ensure_audit_columns();
        schema
    }

    /// Build a schema from business columns; audit columns are added.
    pub fn with_columns(columns: impl IntoIterator<Item = (String, FieldType)>) -> Self {
        let mut schema = Self {
            columns: columns.into_iter().collect(),
        };
        schema.ensure_audit_columns();
        schema
    }

    /// Add the audit columns if a stored schema predates them.
    pub fn ensure_audit_columns(&mut self) {
        self.columns
            .entry(SYNCED_COLUMN.to_string())
            .or_insert(FieldType::Timestamp);
        self.columns
            .entry(OPERATION_COLUMN.to_string())
            .or_insert(FieldType::String);
    }

    pub fn get(&self, name: &str) -> Option<&FieldType> {
        self.columns.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&String, &FieldType)> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Set a column's type, appending it if new.
    pub(crate) fn set(&mut self, name: &str, ty: FieldType) {
        self.columns.insert(name.to_string(), ty);
    }

    /// Check that moving from `self` to `next` only adds or widens columns.
    pub fn check_evolution(&self, next: &TableSchema) -> Result<(), SchemaError> {
        for (name, from) in &self.columns {
            let Some(to) = next.columns.get(name) else {
                return Err(SchemaError::DroppedColumn {
                    field: name.clone(),
                });
            };
            if !from.widens_to(to) {
                return Err(SchemaError::IllegalChange {
                    field: name.clone(),
                    from: from.clone(),
                    to: to.clone(),
                });
            }
        }
        Ok(())
    }
}
