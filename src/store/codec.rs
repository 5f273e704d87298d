//! Binary-comparable index keys.
//!
//! Ordering of encoded keys: missing/null < bool < number < string < composite.

use serde_json::Value;

const TAG_NULL: u8 = 0x01;
const TAG_BOOL: u8 = 0x02;
const TAG_NUMBER: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_COMPOSITE: u8 = 0x05;

/// Encode one scalar (or composite, as its JSON text) into an index key.
pub fn encode_key(value: &Value) -> Vec<u8> {
    match value {
        Value::Null => vec![TAG_NULL],
        Value::Bool(b) => vec![TAG_BOOL, u8::from(*b)],
        Value::Number(n) => {
            let mut key = Vec::with_capacity(9);
            key.push(TAG_NUMBER);
            key.extend_from_slice(&sortable_f64(n.as_f64().unwrap_or(0.0)));
            key
        }
        Value::String(s) => {
            let mut key = Vec::with_capacity(s.len() + 2);
            key.push(TAG_STRING);
            key.extend_from_slice(s.as_bytes());
            key.push(0x00);
            key
        }
        Value::Array(_) | Value::Object(_) => {
            let text = value.to_string();
            let mut key = Vec::with_capacity(text.len() + 2);
            key.push(TAG_COMPOSITE);
            key.extend_from_slice(text.as_bytes());
            key.push(0x00);
            key
        }
    }
}

/// Every key a document contributes to an index on one field.
///
/// Arrays are multikey: each distinct element gets its own entry.
pub fn index_keys(field_value: Option<&Value>) -> Vec<Vec<u8>> {
    match field_value {
        None => vec![encode_key(&Value::Null)],
        Some(Value::Array(items)) if !items.is_empty() => {
            let mut keys: Vec<Vec<u8>> = items.iter().map(encode_key).collect();
            keys.sort();
            keys.dedup();
            keys
        }
        Some(value) => vec![encode_key(value)],
    }
}

/// Hex form used inside RocksDB key strings.
pub fn encode_key_hex(value: &Value) -> String {
    hex::encode(encode_key(value))
}

fn sortable_f64(val: f64) -> [u8; 8] {
    // -0.0 compares equal to 0.0 in filters, so it shares its key.
    let val = if val == 0.0 { 0.0 } else { val };
    let mut bits = val.to_bits();
    if bits & 0x8000_0000_0000_0000 != 0 {
        bits = !bits;
    } else {
        bits ^= 0x8000_0000_0000_0000;
    }
    bits.to_be_bytes()
}
