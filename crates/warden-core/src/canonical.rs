//! Canonical JSON serialization and content hashing.
//!
//! "Canonical" here means: object keys sorted lexicographically, no
//! insignificant whitespace. This is what the audit hash chain and the rule
//! evidence hashes are computed over, so the same logical value always
//! produces the same digest regardless of field insertion order.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively sort all object keys in `value`, returning a new `Value`.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::with_capacity(sorted.len());
            for (k, v) in sorted {
                out.insert(k.clone(), sort_keys(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Serialize `value` to minimal JSON (no whitespace) with all object keys
/// sorted, recursively.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    let sorted = sort_keys(&v);
    serde_json::to_string(&sorted)
}

/// Lowercase hex-encoded SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 over the canonical JSON serialization of `value`.
pub fn sha256_of_canonical<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}
