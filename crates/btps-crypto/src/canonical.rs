//! Canonical JSON serialization.
//!
//! Objects serialize with keys sorted lexicographically at every depth,
//! arrays preserve order, no insignificant whitespace, numbers in
//! serde_json's shortest round-tripping form, strings UTF-8 with standard
//! JSON escaping. Signer and verifier both call through here; nothing else
//! in the workspace is allowed to produce signature input bytes.

use serde_json::Value;

/// Render `value` in canonical form.
pub fn to_canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Canonical form as bytes, ready for hashing or signing.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    to_canonical_json(value).into_bytes()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_escaped(s, out),
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
        Value::Object(map) => {
            // serde_json's default map is already ordered, but canonical form
            // must not depend on the crate's feature selection.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn write_escaped(s: &str, out: &mut String) {
    out.push_str(
        &serde_json::to_string(s).expect("JSON string serialization is infallible"),
    );
}
