//! Value utility functions shared across modules
//!
//! This module provides common functions for working with JSON values,
//! including nested field access and value comparison.

use serde_json::Value;
use std::cmp::Ordering;

/// Get nested value from JSON with dot notation support
///
/// Supports:
/// - Simple fields: "name"
/// - Nested objects: "address.city"
/// - Array indexing: "items.0.name"
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use docstore_core::value_utils::get_nested_value;
///
/// let doc = json!({"address": {"city": "NYC"}});
/// assert_eq!(get_nested_value(&doc, "address.city"), Some(&json!("NYC")));
/// ```
pub fn get_nested_value<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    // Fast path: no dots means simple field access
    if !path.contains('.') {
        return doc.get(path);
    }

    let mut value = doc;
    for part in path.split('.') {
        match value {
            Value::Object(map) => value = map.get(part)?,
            Value::Array(arr) => {
                // Support array indexing: "items.0.name"
                if let Ok(index) = part.parse::<usize>() {
                    value = arr.get(index)?;
                } else {
                    return None;
                }
            }
            _ => return None,
        }
    }
    Some(value)
}

/// Compare two JSON values
///
/// Returns `Some(Ordering)` for comparable types (numbers, strings, booleans),
/// `None` for incompatible types (e.g., comparing string to number).
///
/// # Supported comparisons
///
/// - Number vs Number (uses f64 comparison)
/// - String vs String (lexicographic)
/// - Bool vs Bool (false < true)
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use std::cmp::Ordering;
/// use docstore_core::value_utils::compare_values;
///
/// assert_eq!(compare_values(&json!(10), &json!(5)), Some(Ordering::Greater));
/// assert_eq!(compare_values(&json!("a"), &json!("b")), Some(Ordering::Less));
/// assert_eq!(compare_values(&json!("a"), &json!(1)), None); // incompatible
/// ```
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => {
            let f1 = n1.as_f64()?;
            let f2 = n2.as_f64()?;
            f1.partial_cmp(&f2)
        }
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
        _ => None,
    }
}

/// Compare two optional JSON values with None handling
///
/// Used for sorting where missing values need consistent ordering.
/// None values are considered "less than" any actual value.
///
/// # Ordering rules
///
/// - None < Some(_)
/// - Some(a) vs Some(b) uses compare_values
/// - Incompatible types return Equal (stable sort behavior)
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use std::cmp::Ordering;
/// use docstore_core::value_utils::compare_values_with_none;
///
/// assert_eq!(compare_values_with_none(None, Some(&json!(5))), Ordering::Less);
/// assert_eq!(compare_values_with_none(Some(&json!(10)), None), Ordering::Greater);
/// ```
pub fn compare_values_with_none(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(av), Some(bv)) => compare_values(av, bv).unwrap_or(Ordering::Equal),
    }
}
