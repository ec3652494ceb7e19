//! # Canonical Serialization
//!
//! This module defines [`CanonicalBytes`], the only construction path for
//! bytes used in digest computation.
//!
//! ## Invariant
//!
//! The inner `Vec<u8>` is private. The only way to construct `CanonicalBytes`
//! is through [`CanonicalBytes::new()`], which applies the coercion pipeline
//! before serialization. Two logically equal JSON documents always produce
//! the same bytes regardless of key order or timestamp offset.
//!
//! ## Coercion Rules
//!
//! 1. Sort object keys lexicographically.
//! 2. Normalize RFC 3339 timestamps to UTC with millisecond precision and a
//!    `Z` suffix.
//! 3. Use compact separators (no whitespace).

use serde::Serialize;
use serde_json::Value;

use crate::error::CanonicalizationError;

/// Bytes produced exclusively by canonical serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    /// Construct canonical bytes from any serializable value.
    pub fn new(obj: &impl Serialize) -> Result<Self, CanonicalizationError> {
        let value = serde_json::to_value(obj)?;
        let coerced = coerce_json_value(value);
        let bytes = serialize_canonical(&coerced)?;
        Ok(Self(bytes))
    }

    /// Access the canonical bytes for digest computation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume and return the inner byte vector.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for CanonicalBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Format a UTC timestamp the way canonical documents carry it.
pub fn format_timestamp(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn coerce_json_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            // serde_json::Map is BTreeMap-backed, so rebuilding sorts keys.
            let mut coerced = serde_json::Map::new();
            for (k, v) in map {
                coerced.insert(k, coerce_json_value(v));
            }
            Value::Object(coerced)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(coerce_json_value).collect()),
        Value::String(s) => match chrono::DateTime::parse_from_rfc3339(&s) {
            Ok(dt) => Value::String(format_timestamp(&dt.with_timezone(&chrono::Utc))),
            Err(_) => Value::String(s),
        },
        other => other,
    }
}

fn serialize_canonical(value: &Value) -> Result<Vec<u8>, CanonicalizationError> {
    Ok(serde_json::to_vec(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted() {
        let cb = CanonicalBytes::new(&json!({"b": 1, "a": 2, "c": {"z": 0, "y": 1}})).unwrap();
        assert_eq!(
            std::str::from_utf8(cb.as_bytes()).unwrap(),
            r#"{"a":2,"b":1,"c":{"y":1,"z":0}}"#
        );
    }

    #[test]
    fn timestamps_normalized_to_utc_millis() {
        let a = CanonicalBytes::new(&json!({"t": "2026-01-15T12:00:00+09:00"})).unwrap();
        let b = CanonicalBytes::new(&json!({"t": "2026-01-15T03:00:00.000Z"})).unwrap();
        assert_eq!(a, b);
        assert!(std::str::from_utf8(a.as_bytes())
            .unwrap()
            .contains("2026-01-15T03:00:00.000Z"));
    }

    #[test]
    fn plain_strings_untouched() {
        let cb = CanonicalBytes::new(&json!({"grade": "A"})).unwrap();
        assert_eq!(cb.as_bytes(), br#"{"grade":"A"}"#);
    }

    #[test]
    fn floats_are_preserved() {
        let cb = CanonicalBytes::new(&json!({"weight_kg": 12.5})).unwrap();
        assert_eq!(cb.as_bytes(), br#"{"weight_kg":12.5}"#);
    }

    #[test]
    fn arrays_keep_order() {
        let cb = CanonicalBytes::new(&json!([3, 1, 2])).unwrap();
        assert_eq!(cb.as_bytes(), b"[3,1,2]");
    }

    proptest! {
        #[test]
        fn canonicalization_is_deterministic(keys in proptest::collection::vec("[a-z]{1,8}", 0..8), n in any::<i64>()) {
            let mut forward = serde_json::Map::new();
            for k in &keys {
                forward.insert(k.clone(), json!(n));
            }
            let mut reverse = serde_json::Map::new();
            for k in keys.iter().rev() {
                reverse.insert(k.clone(), json!(n));
            }
            let a = CanonicalBytes::new(&Value::Object(forward)).unwrap();
            let b = CanonicalBytes::new(&Value::Object(reverse)).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
