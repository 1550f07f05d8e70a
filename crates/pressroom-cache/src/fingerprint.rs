use serde_json::Value;
use sha2::{Digest, Sha256};

/// Deterministic SHA-256 fingerprint (lowercase hex) of `key_parts`.
///
/// Object keys are sorted at every depth before hashing, so two values that
/// differ only in key order share a fingerprint. Array order is significant.
pub fn fingerprint(key_parts: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(key_parts).as_bytes());
    hex::encode(hasher.finalize())
}

/// Compact JSON rendering with recursively sorted object keys.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
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
        scalar => out.push_str(&scalar.to_string()),
    }
}
