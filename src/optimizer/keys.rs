// Cache key generation for content + parameter lookups
// Author: kelexine (https://github.com/kelexine)

use serde_json::Value;
use sha2::{Digest, Sha256};

/// SHA-256 of the raw document bytes, hex encoded.
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// SHA-256 of `params` in canonical form, so key order never matters.
pub fn params_hash(params: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(params, &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Key for a cached computation over `content` with `params`.
/// Identical bytes with different parameters never share a key.
pub fn cache_key(content: &[u8], params: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content_hash(content).as_bytes());
    hasher.update(b":");
    hasher.update(params_hash(params).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compact JSON with object keys sorted at every level.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<_> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, field)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(field, out);
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
