// canonical.rs - canonical key encoding for secondary indexes.
//
// Encodes a JSON value into a string whose code-point lexicographic order
// matches the semantic order of the value, per the declared key type.
// Grounded on index.rs's IndexKey/OrderedFloat ordering discipline, adapted
// from a typed Ord impl to a pure string encoding.

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Offset applied before zero-padding numeric keys, so that negative values
/// still sort correctly as non-negative, fixed-width decimal strings.
pub const NUM_OFFSET: i64 = 1_000_000_000_000;
pub const NUM_WIDTH: usize = 20;

/// Record separator (U+241E) used to join composite key components.
/// Chosen because it cannot appear in ordinary JSON string data.
pub const COMPOSITE_SEP: char = '\u{241E}';

/// Sentinel used as an unbounded upper bound in range scans (U+FFFF).
pub const UPPER_SENTINEL: &str = "\u{FFFF}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Str,
    Num,
    Date,
    Auto,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Str => "str",
            KeyType::Num => "num",
            KeyType::Date => "date",
            KeyType::Auto => "auto",
        }
    }

    pub fn from_str(s: &str) -> Option<KeyType> {
        match s {
            "str" => Some(KeyType::Str),
            "num" => Some(KeyType::Num),
            "date" => Some(KeyType::Date),
            "auto" => Some(KeyType::Auto),
            _ => None,
        }
    }
}

/// Encode a single value as a canonical key string for the given key type.
/// `null` always encodes to the empty string regardless of key type.
pub fn canonical(value: &Value, key_type: KeyType) -> Result<String> {
    if value.is_null() {
        return Ok(String::new());
    }
    match key_type {
        KeyType::Num => canonical_num(value),
        KeyType::Date => canonical_date(value),
        KeyType::Str | KeyType::Auto => canonical_auto(value),
    }
}

fn canonical_num(value: &Value) -> Result<String> {
    let n = value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .ok_or_else(|| StoreError::InvalidQuery(format!("not a number: {value}")))?;
    canonical_num_i64(n)
}

/// Encode a raw integer as an offset, zero-padded decimal string.
/// Exposed directly so the planner can build bound keys from raw i64s too.
pub fn canonical_num_i64(n: i64) -> Result<String> {
    if n < -NUM_OFFSET || n > NUM_OFFSET {
        return Err(StoreError::OutOfRange(n));
    }
    let shifted = (n + NUM_OFFSET) as u64;
    Ok(format!("{:0width$}", shifted, width = NUM_WIDTH))
}

fn canonical_date(value: &Value) -> Result<String> {
    if let Some(s) = value.as_str() {
        let parsed: DateTime<Utc> = DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::InvalidQuery(format!("invalid date {s}: {e}")))?;
        return Ok(parsed.to_rfc3339());
    }
    Err(StoreError::InvalidQuery(format!(
        "date key expects an ISO-8601 string, got {value}"
    )))
}

/// `str`/`auto` encoding: numbers get the zero-padded numeric form so they
/// still sort correctly among themselves; everything else is its string form.
fn canonical_auto(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                canonical_num_i64(i)
            } else {
                Ok(n.to_string())
            }
        }
        Value::Bool(b) => Ok(b.to_string()),
        other => Ok(other.to_string()),
    }
}

/// Join canonical key components of a composite index with the record separator.
pub fn join_composite(components: &[String]) -> String {
    components.join(&COMPOSITE_SEP.to_string())
}
