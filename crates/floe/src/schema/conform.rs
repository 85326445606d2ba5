//! Coercion of records into the shape of a destination schema.

use serde_json::{Number, Value};

use chrono::DateTime;

use crate::record::{Record, is_reserved, is_uninformative};

use super::{FieldType, TableSchema};

/// A field that could not be stored and was dropped from its record.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub field: String,
    pub reason: String,
}

/// Coerce one value into a column of type `ty`.
pub fn conform_value(value: Value, ty: &FieldType) -> Result<Value, String> {
    if value.is_null() {
        return Ok(value);
    }
    match (ty, value) {
        (FieldType::String, Value::String(s)) => Ok(Value::String(s)),
        (FieldType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
        (FieldType::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),
        (FieldType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {
            Ok(Value::Number(n))
        }
        (FieldType::Float, Value::Number(n)) => n
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("{n} is not a finite float")),
        (FieldType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
        (FieldType::Timestamp, Value::String(s)) => {
            DateTime::parse_from_rfc3339(&s)
                .map_err(|e| format!("'{s}' is not a timestamp: {e}"))?;
            Ok(Value::String(s))
        }
        (FieldType::Struct { fields }, Value::Object(map)) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (name, value) in map {
                match fields.get(&name) {
                    Some(ty) => {
                        let value = conform_value(value, ty).map_err(|r| format!("{name}: {r}"))?;
                        out.insert(name, value);
                    }
                    None if is_uninformative(&value) => {}
                    None => return Err(format!("undeclared nested field '{name}'")),
                }
            }
            Ok(Value::Object(out))
        }
        (FieldType::Array { items }, Value::Array(values)) => values
            .into_iter()
            .enumerate()
            .map(|(i, v)| conform_value(v, items).map_err(|r| format!("[{i}]: {r}")))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        (ty, value) => Err(format!("{} does not fit {ty}", describe(&value))),
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Coerce every business field of `record` into `schema`.
///
/// Fields that cannot be stored are dropped and reported; the remaining
/// fields are persisted. Source fields using the reserved prefix are
/// discarded, as are undeclared fields that only carry nulls.
pub fn conform_record(schema: &TableSchema, record: Record) -> (Record, Vec<Violation>) {
    let mut out = Record::new();
    let mut violations = Vec::new();
    for (name, value) in record {
        if is_reserved(&name) {
            continue;
        }
        let Some(ty) = schema.get(&name) else {
            if !is_uninformative(&value) {
                violations.push(Violation {
                    reason: format!("column '{name}' is not in the schema"),
                    field: name,
                });
            }
            continue;
        };
        match conform_value(value, ty) {
            Ok(value) => {
                out.insert(name, value);
            }
            Err(reason) => violations.push(Violation { field: name, reason }),
        }
    }
    (out, violations)
}
