//! Reconciliation of batch types against the destination schema.

use indexmap::IndexMap;
use serde::Serialize;

use super::inference::{BatchTypes, Observed};
use super::{FieldType, TableSchema};

/// Decision for one field of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FieldPlan {
    /// Values already match the declared type.
    Compatible,
    /// Values fit the declared type after conversion.
    CastRequired { from: FieldType, to: FieldType },
    /// The column must be added (`from` is `None`) or widened first.
    WidenRequired {
        from: Option<FieldType>,
        to: FieldType,
    },
    /// No automatic migration exists; the field is dropped from affected records.
    Conflict { reason: String },
}

/// A column added or widened by a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaChange {
    pub field: String,
    pub from: Option<FieldType>,
    pub to: FieldType,
}

/// Per-field reconciliation decisions for one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationPlan {
    entries: IndexMap<String, FieldPlan>,
}

impl ReconciliationPlan {
    pub fn get(&self, field: &str) -> Option<&FieldPlan> {
        self.entries.get(field)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &FieldPlan)> {
        self.entries.iter()
    }

    /// Fields that cannot be persisted, with the reason.
    pub fn conflicts(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|(field, plan)| match plan {
            FieldPlan::Conflict { reason } => Some((field.as_str(), reason.as_str())),
            _ => None,
        })
    }

    /// Columns to add or widen before merging.
    pub fn changes(&self) -> Vec<SchemaChange> {
        self.entries
            .iter()
            .filter_map(|(field, plan)| match plan {
                FieldPlan::WidenRequired { from, to } => Some(SchemaChange {
                    field: field.clone(),
                    from: from.clone(),
                    to: to.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// The schema that results from applying every widening to `schema`.
    pub fn apply_to(&self, schema: &TableSchema) -> TableSchema {
        let mut target = schema.clone();
        for change in self.changes() {
            target.set(&change.field, change.to);
        }
        target
    }
}

/// Compare a batch's inferred types with the declared schema.
///
/// Reserved columns never appear in `batch` and are left untouched.
pub fn reconcile(batch: &BatchTypes, schema: &TableSchema) -> ReconciliationPlan {
    let entries = batch
        .fields()
        .map(|(field, observed)| {
            let plan = match observed {
                Observed::Mixed(reason) => FieldPlan::Conflict {
                    reason: reason.clone(),
                },
                Observed::Type(incoming) => plan_field(schema.get(field), incoming),
            };
            (field.clone(), plan)
        })
        .collect();
    ReconciliationPlan { entries }
}

fn plan_field(declared: Option<&FieldType>, incoming: &FieldType) -> FieldPlan {
    let Some(declared) = declared else {
        return FieldPlan::WidenRequired {
            from: None,
            to: incoming.clone(),
        };
    };
    if fits_exactly(declared, incoming) {
        return FieldPlan::Compatible;
    }
    match widen(declared, incoming) {
        Ok(None) => FieldPlan::CastRequired {
            from: incoming.clone(),
            to: declared.clone(),
        },
        Ok(Some(to)) => FieldPlan::WidenRequired {
            from: Some(declared.clone()),
            to,
        },
        Err(reason) => FieldPlan::Conflict { reason },
    }
}

/// Values of `incoming` type are stored as-is in a `declared` column.
fn fits_exactly(declared: &FieldType, incoming: &FieldType) -> bool {
    match (declared, incoming) {
        (d, i) if d == i => true,
        (FieldType::Struct { fields: d }, FieldType::Struct { fields: i }) => i
            .iter()
            .all(|(name, ty)| d.get(name).is_some_and(|dt| fits_exactly(dt, ty))),
        (FieldType::Array { items: d }, FieldType::Array { items: i }) => fits_exactly(d, i),
        _ => false,
    }
}

/// The widened type needed to hold `incoming` in a `declared` column.
///
/// `Ok(None)` means the declared type already holds it.
fn widen(declared: &FieldType, incoming: &FieldType) -> Result<Option<FieldType>, String> {
    match (declared, incoming) {
        (d, i) if d == i => Ok(None),
        (d, i) if d.is_scalar() && i.is_scalar() => {
            if d.holds_scalar(i) {
                Ok(None)
            } else if matches!((d, i), (FieldType::Integer, FieldType::Float)) {
                Ok(Some(FieldType::Float))
            } else {
                Ok(Some(FieldType::String))
            }
        }
        (FieldType::Struct { fields: d }, FieldType::Struct { fields: i }) => {
            let mut merged = d.clone();
            let mut changed = false;
            for (name, ty) in i {
                match d.get(name) {
                    Some(dt) => {
                        if let Some(widened) = widen(dt, ty).map_err(|r| format!("{name}: {r}"))? {
                            merged.insert(name.clone(), widened);
                            changed = true;
                        }
                    }
                    None => {
                        merged.insert(name.clone(), ty.clone());
                        changed = true;
                    }
                }
            }
            Ok(changed.then_some(FieldType::Struct { fields: merged }))
        }
        (FieldType::Array { items: d }, FieldType::Array { items: i }) => Ok(widen(d, i)
            .map_err(|r| format!("items: {r}"))?
            .map(|items| FieldType::Array {
                items: Box::new(items),
            })),
        (d, i) => Err(format!("cannot change {d} column to {i}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(records: &[serde_json::Value]) -> BatchTypes {
        let mut types = BatchTypes::new();
        for record in records {
            types.observe(record.as_object().unwrap());
        }
        types
    }

    fn schema(columns: &[(&str, FieldType)]) -> TableSchema {
        TableSchema::with_columns(
            columns
                .iter()
                .map(|(name, ty)| (name.to_string(), ty.clone())),
        )
    }

    #[test]
    fn test_new_columns_are_widenings() {
        let plan = reconcile(&batch(&[json!({"id": 1, "name": "a"})]), &TableSchema::new());
        assert_eq!(
            plan.get("id"),
            Some(&FieldPlan::WidenRequired {
                from: None,
                to: FieldType::Integer
            })
        );
        assert_eq!(plan.changes().len(), 2);
    }

    #[test]
    fn test_integer_column_receiving_string_widens_to_string() {
        let declared = schema(&[("code", FieldType::Integer)]);
        let plan = reconcile(&batch(&[json!({"code": 1}), json!({"code": "A-7"})]), &declared);
        assert_eq!(
            plan.get("code"),
            Some(&FieldPlan::WidenRequired {
                from: Some(FieldType::Integer),
                to: FieldType::String
            })
        );
        let target = plan.apply_to(&declared);
        assert_eq!(target.get("code"), Some(&FieldType::String));
        assert!(declared.check_evolution(&target).is_ok());
    }

    #[test]
    fn test_narrower_values_are_cast() {
        let declared = schema(&[("amount", FieldType::Float), ("label", FieldType::String)]);
        let plan = reconcile(&batch(&[json!({"amount": 3, "label": true})]), &declared);
        assert_eq!(
            plan.get("amount"),
            Some(&FieldPlan::CastRequired {
                from: FieldType::Integer,
                to: FieldType::Float
            })
        );
        assert_eq!(
            plan.get("label"),
            Some(&FieldPlan::CastRequired {
                from: FieldType::Boolean,
                to: FieldType::String
            })
        );
        assert!(plan.changes().is_empty());
    }

    #[test]
    fn test_matching_types_are_compatible() {
        let declared = schema(&[("active", FieldType::Boolean)]);
        let plan = reconcile(&batch(&[json!({"active": false})]), &declared);
        assert_eq!(plan.get("active"), Some(&FieldPlan::Compatible));
    }

    #[test]
    fn test_scalar_widening_paths() {
        let cases = [
            (FieldType::Integer, json!(1.5), FieldType::Float),
            (FieldType::Float, json!("x"), FieldType::String),
            (FieldType::Boolean, json!(1), FieldType::String),
            (FieldType::Timestamp, json!(12), FieldType::String),
        ];
        for (declared, value, expected) in cases {
            let plan = reconcile(&batch(&[json!({ "f": value })]), &schema(&[("f", declared.clone())]));
            assert_eq!(
                plan.get("f"),
                Some(&FieldPlan::WidenRequired {
                    from: Some(declared),
                    to: expected
                })
            );
        }
    }

    #[test]
    fn test_struct_gains_nested_field() {
        let declared = schema(&[(
            "geo",
            FieldType::Struct {
                fields: IndexMap::from([("lat".to_string(), FieldType::Float)]),
            },
        )]);
        let plan = reconcile(&batch(&[json!({"geo": {"lat": 1, "lng": 2.5}})]), &declared);
        assert_eq!(
            plan.get("geo"),
            Some(&FieldPlan::WidenRequired {
                from: declared.get("geo").cloned(),
                to: FieldType::Struct {
                    fields: IndexMap::from([
                        ("lat".to_string(), FieldType::Float),
                        ("lng".to_string(), FieldType::Float),
                    ])
                }
            })
        );
    }

    #[test]
    fn test_shape_changes_conflict() {
        let declared = schema(&[
            ("address", FieldType::String),
            ("tags", FieldType::Array { items: Box::new(FieldType::String) }),
        ]);
        let plan = reconcile(
            &batch(&[json!({"address": {"zip": "1"}, "tags": {"a": 1}, "mixed": [1, {"a": 1}]})]),
            &declared,
        );
        assert!(matches!(plan.get("address"), Some(FieldPlan::Conflict { .. })));
        assert!(matches!(plan.get("tags"), Some(FieldPlan::Conflict { .. })));
        assert!(matches!(plan.get("mixed"), Some(FieldPlan::Conflict { .. })));
        assert_eq!(plan.conflicts().count(), 3);
        assert!(plan.changes().is_empty());
    }
}
