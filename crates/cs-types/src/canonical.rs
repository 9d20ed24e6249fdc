//! Canonical JSON encoding and SHA-256 content digests.
//!
//! Canonical form: object keys sorted, compact separators, non-finite floats
//! encoded as the strings `"NaN"`, `"Infinity"` and `"-Infinity"`. Two payloads
//! that are equal under this encoding hash to the same digest.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Encode an `f64` without losing non-finite values.
pub fn canonical_f64(v: f64) -> Value {
    if v.is_nan() {
        Value::String("NaN".to_string())
    } else if v == f64::INFINITY {
        Value::String("Infinity".to_string())
    } else if v == f64::NEG_INFINITY {
        Value::String("-Infinity".to_string())
    } else {
        serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Inverse of [`canonical_f64`] for values read back from JSON.
pub fn parse_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            other => other.trim().parse::<f64>().ok(),
        },
        _ => None,
    }
}

/// Recursively rebuild `value` with every object's keys in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Canonical byte encoding of a JSON payload.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    // Serializing a `Value` cannot fail: keys are strings and numbers are finite.
    serde_json::to_vec(&canonicalize(value)).unwrap_or_default()
}

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Digest of a JSON payload in canonical form.
pub fn digest(value: &Value) -> String {
    sha256_hex(&canonical_bytes(value))
}

/// `#[serde(with = "...")]` adapter for `f64` fields that may hold
/// non-finite values.
pub mod lossless_f64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        super::canonical_f64(*v).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        if value.is_null() {
            return Ok(f64::NAN);
        }
        super::parse_f64(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("expected a float, got {value}")))
    }
}

/// Same as [`lossless_f64`] for optional fields.
pub mod lossless_opt_f64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(x) => super::canonical_f64(*x).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<f64>, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        if value.is_null() {
            return Ok(None);
        }
        super::parse_f64(&value)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("expected a float, got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_digest() {
        let a = json!({"b": 1, "a": {"d": [1, 2], "c": "x"}});
        let mut inner = Map::new();
        inner.insert("c".into(), json!("x"));
        inner.insert("d".into(), json!([1, 2]));
        let mut outer = Map::new();
        outer.insert("a".into(), Value::Object(inner));
        outer.insert("b".into(), json!(1));
        assert_eq!(digest(&a), digest(&Value::Object(outer)));
    }

    #[test]
    fn canonical_bytes_are_compact_and_sorted() {
        let v = json!({"z": 1, "a": [true, null]});
        assert_eq!(canonical_bytes(&v), br#"{"a":[true,null],"z":1}"#.to_vec());
    }

    #[test]
    fn digest_is_sha256_hex() {
        // sha256("") is a well-known constant.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(digest(&json!({"k": 1})).len(), 64);
    }

    #[test]
    fn non_finite_values_are_distinguished() {
        assert_eq!(canonical_f64(f64::NEG_INFINITY), json!("-Infinity"));
        assert_ne!(
            digest(&json!({"s": canonical_f64(f64::INFINITY)})),
            digest(&json!({"s": canonical_f64(f64::NAN)}))
        );
        assert_eq!(parse_f64(&json!("-Infinity")), Some(f64::NEG_INFINITY));
        assert_eq!(parse_f64(&json!(2.5)), Some(2.5));
        assert_eq!(parse_f64(&json!(true)), None);
    }

    #[derive(serde::Serialize, serde::Deserialize, Debug)]
    struct Holder {
        #[serde(with = "lossless_f64")]
        score: f64,
    }

    #[test]
    fn lossless_adapter_round_trips_infinity() {
        let text = serde_json::to_string(&Holder {
            score: f64::NEG_INFINITY,
        })
        .unwrap();
        assert_eq!(text, r#"{"score":"-Infinity"}"#);
        let back: Holder = serde_json::from_str(&text).unwrap();
        assert_eq!(back.score, f64::NEG_INFINITY);
    }
}
