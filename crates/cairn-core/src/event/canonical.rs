//! Canonical JSON block encoding.
//!
//! Every block (events, operation payloads, shards, document values) is
//! stored as canonical JSON so that the same logical value always hashes to
//! the same link.
//!
//! Rules:
//! - Compact: no whitespace between tokens.
//! - Object keys sorted lexicographically (recursive at every depth).
//! - Arrays preserve element order.
//! - Numbers, strings, booleans, and null serialized normally.

use serde::Serialize;
use serde_json::Value;

/// Produce canonical JSON bytes from a [`serde_json::Value`].
///
/// # Errors
///
/// Returns `serde_json::Error` if a string or number fails to serialize.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    write_canonical(value, &mut buf)?;
    Ok(buf)
}

/// Serialize any value to canonical JSON bytes.
///
/// # Errors
///
/// Returns `serde_json::Error` if `value` cannot be represented as JSON
/// (for example a map with non-string keys).
pub fn to_canonical_vec<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    canonical_bytes(&serde_json::to_value(value)?)
}

/// Parse `bytes` and report whether they are already in canonical form.
///
/// # Errors
///
/// Returns `serde_json::Error` if the input is not valid JSON.
pub fn is_canonical(bytes: &[u8]) -> Result<bool, serde_json::Error> {
    let value: Value = serde_json::from_slice(bytes)?;
    Ok(canonical_bytes(&value)? == bytes)
}

fn write_canonical(value: &Value, buf: &mut Vec<u8>) -> Result<(), serde_json::Error> {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            serde_json::to_writer(&mut *buf, value)?;
        }
        Value::Array(arr) => {
            buf.push(b'[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_canonical(item, buf)?;
            }
            buf.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            buf.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                serde_json::to_writer(&mut *buf, key)?;
                buf.push(b':');
                if let Some(val) = map.get(*key) {
                    write_canonical(val, buf)?;
                }
            }
            buf.push(b'}');
        }
    }
    Ok(())
}
