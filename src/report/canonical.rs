//! Canonical JSON serialization
//!
//! Artifacts must be byte-identical for identical inputs: keys are sorted
//! (serde_json maps are BTree-backed) and floating point numbers are
//! normalized to at most four decimal places, with integral values written
//! as integers.

use serde::Serialize;
use serde_json::Value;

use crate::error::{AuditError, AuditResult};

const PRECISION: f64 = 10_000.0;

/// Serialize a value as canonical JSON
pub fn to_canonical_json<T: Serialize>(value: &T) -> AuditResult<String> {
    let json = serde_json::to_value(value)
        .map_err(|e| AuditError::Internal(format!("serialization failed: {e}")))?;
    serde_json::to_string(&canonicalize(json))
        .map_err(|e| AuditError::Internal(format!("serialization failed: {e}")))
}

/// Pretty variant for artifacts meant to be read by humans
pub fn to_canonical_json_pretty<T: Serialize>(value: &T) -> AuditResult<String> {
    let json = serde_json::to_value(value)
        .map_err(|e| AuditError::Internal(format!("serialization failed: {e}")))?;
    serde_json::to_string_pretty(&canonicalize(json))
        .map_err(|e| AuditError::Internal(format!("serialization failed: {e}")))
}

/// Rebuild the value with object keys in sorted order and numbers
/// normalized. Sorting is done explicitly rather than relying on the map
/// backend serde_json was compiled with.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Number(n) => {
            if n.as_i64().is_some() || n.as_u64().is_some() {
                return Value::Number(n);
            }
            match n.as_f64() {
                Some(f) => {
                    let rounded = (f * PRECISION).round() / PRECISION;
                    if rounded.fract() == 0.0 && rounded.abs() < 9_007_199_254_740_992.0 {
                        Value::from(rounded as i64)
                    } else {
                        serde_json::Number::from_f64(rounded)
                            .map(Value::Number)
                            .unwrap_or(Value::Null)
                    }
                }
                None => Value::Number(n),
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = serde_json::Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted() {
        let value = json!({"zebra": 1, "alpha": 2});
        let out = to_canonical_json(&value).expect("serialize");
        assert_eq!(out, r#"{"alpha":2,"zebra":1}"#);
    }

    #[test]
    fn floats_are_rounded_to_four_decimals() {
        let value = json!({"cls": 0.123_456_789});
        let out = to_canonical_json(&value).expect("serialize");
        assert_eq!(out, r#"{"cls":0.1235}"#);
    }

    #[test]
    fn integral_floats_are_written_as_integers() {
        let value = json!({"score": 85.0});
        let out = to_canonical_json(&value).expect("serialize");
        assert_eq!(out, r#"{"score":85}"#);
    }

    #[test]
    fn identical_inputs_produce_identical_bytes() {
        let value = json!({"b": [1.5, {"y": 2, "x": 0.00009}], "a": null});
        assert_eq!(
            to_canonical_json(&value).expect("first"),
            to_canonical_json(&value).expect("second")
        );
    }
}
