//! Canonical JSON
//!
//! Deterministic serialization used for payload hashing: object keys are
//! sorted recursively, no insignificant whitespace is emitted, and numbers
//! use serde_json's shortest round-trip form. The same logical value always
//! produces the same bytes regardless of the key order it was built with.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Rebuild `value` with every object's keys in lexicographic order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Canonical byte encoding of `value`.
pub fn to_canonical_bytes(value: &Value) -> Vec<u8> {
    // Serializing a Value cannot fail: keys are strings and numbers are finite.
    canonicalize(value).to_string().into_bytes()
}

/// RFC 3339, UTC, millisecond precision, `Z` suffix.
pub fn canonical_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
