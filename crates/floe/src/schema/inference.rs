//! Batch type inference.
//!
//! Each value maps to a [`FieldType`] (or to nothing, for nulls) and the
//! per-field type of a batch is the join of every value seen for that field.

use chrono::DateTime;
use indexmap::IndexMap;
use indexmap::map::Entry;
use serde_json::Value;

use crate::record::{Record, is_reserved};

use super::FieldType;

/// Infer the type of a single value.
///
/// Returns `Ok(None)` for values carrying no type information and `Err` with
/// a reason when an array mixes incompatible shapes.
pub fn infer_type(value: &Value) -> Result<Option<FieldType>, String> {
    let ty = match value {
        Value::Null => return Ok(None),
        Value::Bool(_) => FieldType::Boolean,
        Value::Number(n) if n.is_i64() || n.is_u64() => FieldType::Integer,
        Value::Number(_) => FieldType::Float,
        Value::String(s) if DateTime::parse_from_rfc3339(s).is_ok() => FieldType::Timestamp,
        Value::String(_) => FieldType::String,
        Value::Object(map) => {
            let mut fields = IndexMap::new();
            for (name, value) in map {
                let Some(ty) = infer_type(value).map_err(|r| format!("{name}: {r}"))? else {
                    continue;
                };
                fields.insert(name.clone(), ty);
            }
            FieldType::Struct { fields }
        }
        Value::Array(items) => {
            let mut joined: Option<FieldType> = None;
            for item in items {
                let Some(ty) = infer_type(item)? else {
                    continue;
                };
                joined = Some(match joined {
                    Some(current) => join(&current, &ty)?,
                    None => ty,
                });
            }
            match joined {
                Some(items) => FieldType::Array {
                    items: Box::new(items),
                },
                None => return Ok(None),
            }
        }
    };
    Ok(Some(ty))
}

fn join_scalar(a: &FieldType, b: &FieldType) -> FieldType {
    match (a, b) {
        (a, b) if a == b => a.clone(),
        (FieldType::Integer, FieldType::Float) | (FieldType::Float, FieldType::Integer) => {
            FieldType::Float
        }
        _ => FieldType::String,
    }
}

/// Least upper bound of two types.
///
/// Scalars join along INTEGER → FLOAT → STRING, with every other pair of
/// distinct scalars joining to STRING. Structs merge field by field and
/// arrays join their items. Any other combination is a mixed shape.
pub fn join(a: &FieldType, b: &FieldType) -> Result<FieldType, String> {
    match (a, b) {
        (a, b) if a.is_scalar() && b.is_scalar() => Ok(join_scalar(a, b)),
        (FieldType::Struct { fields: a }, FieldType::Struct { fields: b }) => {
            let mut merged = a.clone();
            for (name, ty) in b {
                let joined = match merged.get(name) {
                    Some(existing) => join(existing, ty).map_err(|r| format!("{name}: {r}"))?,
                    None => ty.clone(),
                };
                merged.insert(name.clone(), joined);
            }
            Ok(FieldType::Struct { fields: merged })
        }
        (FieldType::Array { items: a }, FieldType::Array { items: b }) => Ok(FieldType::Array {
            items: Box::new(join(a, b).map_err(|r| format!("items: {r}"))?),
        }),
        (a, b) => Err(format!("mixed shapes {a} and {b}")),
    }
}

/// What a batch revealed about one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Type(FieldType),
    /// Values with incompatible shapes were seen.
    Mixed(String),
}

/// Per-field join of every record in a batch.
#[derive(Debug, Clone, Default)]
pub struct BatchTypes {
    fields: IndexMap<String, Observed>,
}

impl BatchTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record into the batch types. Reserved fields are ignored.
    pub fn observe(&mut self, record: &Record) {
        for (name, value) in record {
            if is_reserved(name) {
                continue;
            }
            let observed = match infer_type(value) {
                Ok(Some(ty)) => Observed::Type(ty),
                Ok(None) => continue,
                Err(reason) => Observed::Mixed(reason),
            };
            match self.fields.entry(name.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(observed);
                }
                Entry::Occupied(mut entry) => {
                    let next = match (entry.get(), observed) {
                        (Observed::Mixed(_), _) => continue,
                        (_, Observed::Mixed(reason)) => Observed::Mixed(reason),
                        (Observed::Type(current), Observed::Type(ty)) => match join(current, &ty) {
                            Ok(joined) => Observed::Type(joined),
                            Err(reason) => Observed::Mixed(reason),
                        },
                    };
                    entry.insert(next);
                }
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Observed> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Observed)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn infer(value: Value) -> Option<FieldType> {
        infer_type(&value).unwrap()
    }

    fn batch(records: &[Value]) -> BatchTypes {
        let mut types = BatchTypes::new();
        for record in records {
            types.observe(record.as_object().unwrap());
        }
        types
    }

    #[test]
    fn test_scalar_inference() {
        assert_eq!(infer(json!(null)), None);
        assert_eq!(infer(json!(true)), Some(FieldType::Boolean));
        assert_eq!(infer(json!(42)), Some(FieldType::Integer));
        assert_eq!(infer(json!(-42)), Some(FieldType::Integer));
        assert_eq!(infer(json!(4.2)), Some(FieldType::Float));
        assert_eq!(infer(json!("2024-03-01T10:00:00Z")), Some(FieldType::Timestamp));
        assert_eq!(infer(json!("2024-03-01T10:00:00.123+02:00")), Some(FieldType::Timestamp));
        assert_eq!(infer(json!("2024-03-01")), Some(FieldType::String));
        assert_eq!(infer(json!("hello")), Some(FieldType::String));
    }

    #[test]
    fn test_nested_inference() {
        assert_eq!(
            infer(json!({"a": 1, "b": null, "c": [1, 2.5]})),
            Some(FieldType::Struct {
                fields: IndexMap::from([
                    ("a".to_string(), FieldType::Integer),
                    (
                        "c".to_string(),
                        FieldType::Array {
                            items: Box::new(FieldType::Float)
                        }
                    ),
                ])
            })
        );
        assert_eq!(infer(json!([])), None);
        assert_eq!(infer(json!([null])), None);
        assert!(infer_type(&json!([1, {"a": 1}])).is_err());
    }

    #[test]
    fn test_scalar_join() {
        use FieldType::*;
        assert_eq!(join(&Integer, &Integer).unwrap(), Integer);
        assert_eq!(join(&Integer, &Float).unwrap(), Float);
        assert_eq!(join(&Float, &Integer).unwrap(), Float);
        assert_eq!(join(&Integer, &String).unwrap(), String);
        assert_eq!(join(&Boolean, &Integer).unwrap(), String);
        assert_eq!(join(&Timestamp, &String).unwrap(), String);
    }

    #[test]
    fn test_batch_join() {
        let types = batch(&[
            json!({"id": 1, "amount": 10, "note": null}),
            json!({"id": 2, "amount": 10.5, "note": "x"}),
            json!({"id": 3, "amount": "n/a", "_etl_synced": "2024-01-01T00:00:00Z"}),
        ]);
        assert_eq!(types.get("id"), Some(&Observed::Type(FieldType::Integer)));
        assert_eq!(types.get("amount"), Some(&Observed::Type(FieldType::String)));
        assert_eq!(types.get("note"), Some(&Observed::Type(FieldType::String)));
        assert_eq!(types.get("_etl_synced"), None);
        assert_eq!(types.len(), 3);
    }

    #[test]
    fn test_mixed_shapes_stick() {
        let types = batch(&[
            json!({"address": {"zip": "1"}}),
            json!({"address": "unknown"}),
            json!({"address": {"zip": "2"}}),
        ]);
        assert!(matches!(types.get("address"), Some(Observed::Mixed(_))));
    }

    #[test]
    fn test_struct_fields_merge_across_records() {
        let types = batch(&[json!({"geo": {"lat": 1}}), json!({"geo": {"lng": 2.5}})]);
        assert_eq!(
            types.get("geo"),
            Some(&Observed::Type(FieldType::Struct {
                fields: IndexMap::from([
                    ("lat".to_string(), FieldType::Integer),
                    ("lng".to_string(), FieldType::Float),
                ])
            }))
        );
    }
}
