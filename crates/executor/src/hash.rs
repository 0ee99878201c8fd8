//! Input hashing for dedup. Two requests with the same tool name and the
//! same argument payload must land on the same key regardless of how the
//! caller ordered its JSON object keys, so the JSON is canonicalized
//! (keys sorted recursively, compact separators) before digesting.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Dedup key for an invocation: lowercase hex SHA-256 of the canonical
/// JSON of `{"args": args, "tool": tool_name}`.
#[must_use]
pub fn input_hash(tool_name: &str, args: &Value) -> String {
    let envelope = Value::Object(serde_json::Map::from_iter([
        ("args".to_string(), canonicalize(args.clone())),
        ("tool".to_string(), Value::String(tool_name.to_string())),
    ]));
    // Canonical values serialize with sorted keys via the BTreeMap pass.
    let bytes = envelope.to_string();
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_bytes());
    let digest = hasher.finalize();
    use std::fmt::Write as _;
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Rebuild `value` with every object's keys in sorted order. Arrays keep
/// their element order (it is significant).
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
