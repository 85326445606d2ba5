//! Record representation and reserved column names.

use serde_json::{Map, Value};

/// Ordered mapping of field name to JSON value.
pub type Record = Map<String, Value>;

/// Prefix marking engine-owned columns.
pub const RESERVED_PREFIX: &str = "_etl_";

/// Time the row was last touched by a run.
pub const SYNCED_COLUMN: &str = "_etl_synced";

/// Last merge operation applied to the row.
pub const OPERATION_COLUMN: &str = "_etl_operation";

/// Whether a column name belongs to the engine rather than the source.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// Whether a value carries no type information (null, or arrays of nulls).
pub fn is_uninformative(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.iter().all(is_uninformative),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved(SYNCED_COLUMN));
        assert!(is_reserved(OPERATION_COLUMN));
        assert!(!is_reserved("etl_synced"));
    }

    #[test]
    fn test_uninformative_values() {
        assert!(is_uninformative(&json!(null)));
        assert!(is_uninformative(&json!([])));
        assert!(is_uninformative(&json!([null, [null]])));
        assert!(!is_uninformative(&json!([1])));
        assert!(!is_uninformative(&json!({})));
        assert!(!is_uninformative(&json!("")));
    }
}
