//! Field-name normalization.
//!
//! Source APIs mix `camelCase`, `PascalCase`, `kebab-case` and dotted names.
//! Every top-level field is renamed to lower `snake_case`; nested objects keep
//! their source names.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::NormalizeError;
use crate::record::{Record, is_reserved};

static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w]+").expect("separator pattern is a valid regex"));
static CAPITALIZED_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(.)([A-Z][a-z]+)").expect("capitalized word pattern is a valid regex")
});
static LOWER_UPPER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-z0-9])([A-Z])").expect("case boundary pattern is a valid regex")
});
static UNDERSCORES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("underscore pattern is a valid regex"));
static TABLE_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[/\-_]+").expect("table separator pattern is a valid regex"));

/// Convert a field name to lower snake_case.
///
/// `HTTPStatus` becomes `http_status`, `invoiceID` becomes `invoice_id` and
/// `address2Line` becomes `address2_line`. A name with no word characters is
/// returned unchanged.
pub fn to_snake_case(name: &str) -> String {
    let separated = SEPARATORS.replace_all(name, "_");
    let words = CAPITALIZED_WORD.replace_all(&separated, "${1}_${2}");
    let words = LOWER_UPPER.replace_all(&words, "${1}_${2}");
    let collapsed = UNDERSCORES.replace_all(&words, "_");
    let snake = collapsed.trim_matches('_').to_lowercase();
    if snake.is_empty() {
        name.to_string()
    } else {
        snake
    }
}

/// Normalize an endpoint path into a table name.
///
/// `/jpm/job-types` becomes `jpm_job_types`.
pub fn normalize_table_name(endpoint: &str) -> String {
    TABLE_SEPARATORS
        .replace_all(endpoint.trim(), "_")
        .trim_matches('_')
        .to_string()
}

/// Rename every top-level field of `record` to its canonical name.
///
/// Reserved `_etl_` fields pass through untouched. When two source fields
/// share a canonical name, equal values merge silently, a null loses to a
/// non-null value, and differing non-null values are a [`NormalizeError::NameCollision`].
pub fn normalize_record(record: Record) -> Result<Record, NormalizeError> {
    let mut out = Record::new();
    let mut origins: HashMap<String, String> = HashMap::new();

    for (name, value) in record {
        let canonical = if is_reserved(&name) {
            name.clone()
        } else {
            to_snake_case(&name)
        };

        let Some(existing) = out.get_mut(&canonical) else {
            origins.insert(canonical.clone(), name);
            out.insert(canonical, value);
            continue;
        };

        let first = origins.get(&canonical).cloned().unwrap_or_default();
        if *existing == value {
            continue;
        }
        if value.is_null() {
            debug!(first = %first, second = %name, canonical = %canonical, "Dropped null duplicate field");
            continue;
        }
        if existing.is_null() {
            debug!(first = %first, second = %name, canonical = %canonical, "Replaced null duplicate field");
            *existing = value;
            origins.insert(canonical, name);
            continue;
        }

        return Err(NormalizeError::NameCollision {
            first,
            second: name,
            canonical,
            first_value: existing.clone(),
            second_value: value,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_naming_conventions() {
        let cases = [
            ("customerName", "customer_name"),
            ("CustomerName", "customer_name"),
            ("customer-name", "customer_name"),
            ("customer.name", "customer_name"),
            ("customer name", "customer_name"),
            ("CUSTOMER_NAME", "customer_name"),
            ("customer_name", "customer_name"),
            ("HTTPStatus", "http_status"),
            ("invoiceID", "invoice_id"),
            ("address2Line", "address2_line"),
            ("jobTypeId", "job_type_id"),
            ("__weird--Name__", "weird_name"),
            ("id", "id"),
        ];
        for (input, expected) in cases {
            assert_eq!(to_snake_case(input), expected, "input {input}");
        }
    }

    #[test]
    fn test_idempotent_on_canonical_names() {
        for name in ["http_status", "invoice_id", "address2_line"] {
            assert_eq!(to_snake_case(name), name);
        }
    }

    #[test]
    fn test_table_names() {
        assert_eq!(normalize_table_name("/jpm/job-types"), "jpm_job_types");
        assert_eq!(normalize_table_name("crm//customers-"), "crm_customers");
        assert_eq!(normalize_table_name("invoices"), "invoices");
    }

    #[test]
    fn test_only_top_level_renamed() {
        let out = normalize_record(record(json!({
            "jobId": 7,
            "customerInfo": {"firstName": "Ada", "homeAddress": {"zipCode": "1"}}
        })))
        .unwrap();
        assert_eq!(
            Value::Object(out),
            json!({"job_id": 7, "customer_info": {"firstName": "Ada", "homeAddress": {"zipCode": "1"}}})
        );
    }

    #[test]
    fn test_reserved_fields_bypass() {
        let out = normalize_record(record(json!({"_etl_Custom": 1, "A": 2}))).unwrap();
        assert!(out.contains_key("_etl_Custom"));
        assert!(out.contains_key("a"));
    }

    #[test]
    fn test_equal_collision_is_silent() {
        let out = normalize_record(record(json!({"jobId": 5, "job_id": 5}))).unwrap();
        assert_eq!(Value::Object(out), json!({"job_id": 5}));
    }

    #[test]
    fn test_null_loses_to_value() {
        let out = normalize_record(record(json!({"jobId": null, "job_id": 5}))).unwrap();
        assert_eq!(Value::Object(out), json!({"job_id": 5}));

        let out = normalize_record(record(json!({"jobId": 5, "job-id": null}))).unwrap();
        assert_eq!(Value::Object(out), json!({"job_id": 5}));
    }

    #[test]
    fn test_conflicting_collision_fails() {
        let err = normalize_record(record(json!({"jobId": 5, "job_id": 6}))).unwrap_err();
        match err {
            NormalizeError::NameCollision {
                first,
                second,
                canonical,
                first_value,
                second_value,
            } => {
                assert_eq!(first, "jobId");
                assert_eq!(second, "job_id");
                assert_eq!(canonical, "job_id");
                assert_eq!(first_value, json!(5));
                assert_eq!(second_value, json!(6));
            }
        }
    }
}
