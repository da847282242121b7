//! Shared utility functions
//!
//! Canonical value ordering and hashing, used wherever two document
//! subtrees must be compared or deduplicated structurally.

use serde_json::Value;

/// Human-readable kind name for a JSON value, used in diagnostics.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Recursively sort a value: object keys alphabetically, list items by
/// their canonical rendering. The result is order-insensitive, so two
/// structurally equal subtrees serialize identically.
pub fn recursive_sort(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            // serde_json maps iterate in sorted key order already, but the
            // nested values still need sorting
            let sorted = map
                .iter()
                .map(|(k, v)| (k.clone(), recursive_sort(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => {
            let mut sorted: Vec<Value> = items.iter().map(recursive_sort).collect();
            sorted.sort_by_key(|v| v.to_string());
            Value::Array(sorted)
        }
        other => other.clone(),
    }
}

/// Canonical string form of a value (sorted keys and list items).
pub fn canonical_string(value: &Value) -> String {
    recursive_sort(value).to_string()
}

/// Short content hash of a value's canonical form.
pub fn hash_sorted_value(value: &Value) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(canonical_string(value).as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Structural equality, ignoring key and list ordering.
pub fn values_are_identical(a: &Value, b: &Value) -> bool {
    canonical_string(a) == canonical_string(b)
}

/// Render a value the way diagnostics quote it: strings quoted, scalars
/// bare, containers as compact JSON.
pub fn display_value(value: &Value) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_kind() {
        assert_eq!(value_kind(&json!([])), "list");
        assert_eq!(value_kind(&json!({})), "object");
        assert_eq!(value_kind(&json!("x")), "string");
        assert_eq!(value_kind(&json!(1)), "number");
        assert_eq!(value_kind(&json!(null)), "null");
    }

    #[test]
    fn test_identical_ignores_ordering() {
        let a = json!({"x": [3, 1, 2], "y": {"b": 1, "a": 2}});
        let b = json!({"y": {"a": 2, "b": 1}, "x": [2, 3, 1]});
        assert!(values_are_identical(&a, &b));
        assert_eq!(hash_sorted_value(&a), hash_sorted_value(&b));
    }

    #[test]
    fn test_not_identical() {
        assert!(!values_are_identical(&json!({"a": 1}), &json!({"a": 2})));
    }
}
