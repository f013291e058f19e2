//! Content signatures for idempotent ingestion.
//!
//! Payloads are canonicalized (object keys sorted recursively, no
//! insignificant whitespace) before hashing, so two collectors submitting the
//! same observation with different key order produce the same signature.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// SHA-256 hex signature of the canonical form of a payload.
pub fn content_signature(payload: &Value) -> String {
    let mut hasher = Sha256::new();
    let mut buf = String::new();
    write_canonical(payload, &mut buf);
    hasher.update(buf.as_bytes());
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => {
            out.push_str(&other.to_string());
        }
    }
}
