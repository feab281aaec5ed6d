//! Canonical JSON serialization (RFC 8785 style)
//!
//! Object members are sorted by their UTF-16 code units and output is
//! compact. Leaf values use serde_json's formatting.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonical bytes of a JSON value
pub fn canonical_json(value: &Value) -> Vec<u8> {
    let mut out = String::new();
    write_value(value, &mut out);
    out.into_bytes()
}

/// SHA-256 over the canonical bytes
pub fn canonical_sha256(value: &Value) -> [u8; 32] {
    Sha256::digest(canonical_json(value)).into()
}


fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut members: Vec<(&String, &Value)> = map.iter().collect();
            members.sort_by(|(a, _), (b, _)| a.encode_utf16().cmp(b.encode_utf16()));

            out.push('{');
            for (i, (key, member)) in members.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(member, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_string(s, out),
        leaf => out.push_str(&leaf.to_string()),
    }
}

fn write_string(s: &str, out: &mut String) {
    // Serializing a str cannot fail
    out.push_str(&Value::String(s.to_string()).to_string());
}
