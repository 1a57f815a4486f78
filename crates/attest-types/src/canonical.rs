//! Canonical byte encoding for hashing.
//!
//! Two equal [`Value`]s always produce the same bytes. Every node starts with
//! a one-byte tag; integers are fixed-width big-endian, strings and byte
//! strings carry a `u64` length prefix, and map entries are written in key
//! order. Floats that have no single representation (NaN, infinities) are
//! rejected rather than normalised.

use crate::error::EncodingError;
use crate::value::Value;

/// Maximum nesting depth accepted by [`CanonicalEncoder::write_value`].
pub const MAX_DEPTH: usize = 128;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_ARRAY: u8 = 6;
const TAG_MAP: u8 = 7;

const ABSENT: u8 = 0;
const PRESENT: u8 = 1;

/// Incremental canonical encoder.
///
/// Fixed-layout fields (sequence numbers, timestamps) are written with the
/// typed `write_*` methods; structured values go through
/// [`write_value`](Self::write_value).
#[derive(Debug, Default)]
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Write raw bytes without a length prefix. Only for fixed-width fields
    /// and domain tags.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn write_u32(&mut self, n: u32) {
        self.buffer.extend_from_slice(&n.to_be_bytes());
    }

    pub fn write_u64(&mut self, n: u64) {
        self.buffer.extend_from_slice(&n.to_be_bytes());
    }

    pub fn write_i64(&mut self, n: i64) {
        self.buffer.extend_from_slice(&n.to_be_bytes());
    }

    /// Write a length-prefixed byte string.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_u64(bytes.len() as u64);
        self.buffer.extend_from_slice(bytes);
    }

    /// Write a structured value.
    ///
    /// On error the encoder may hold a partial encoding; discard it.
    pub fn write_value(&mut self, value: &Value) -> Result<(), EncodingError> {
        let mut path = String::from("$");
        self.encode_node(value, 0, &mut path)
    }

    /// Write an optional value with a presence marker.
    pub fn write_option_value(&mut self, value: Option<&Value>) -> Result<(), EncodingError> {
        match value {
            Some(v) => {
                self.buffer.push(PRESENT);
                self.write_value(v)
            }
            None => {
                self.buffer.push(ABSENT);
                Ok(())
            }
        }
    }

    /// Consume the encoder and return the bytes.
    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }

    fn encode_node(
        &mut self,
        value: &Value,
        depth: usize,
        path: &mut String,
    ) -> Result<(), EncodingError> {
        if depth > MAX_DEPTH {
            return Err(EncodingError::DepthExceeded {
                max: MAX_DEPTH,
                path: path.clone(),
            });
        }

        match value {
            Value::Null => self.buffer.push(TAG_NULL),
            Value::Bool(b) => {
                self.buffer.push(TAG_BOOL);
                self.buffer.push(u8::from(*b));
            }
            Value::Int(n) => self.write_int(i128::from(*n)),
            Value::UInt(n) => self.write_int(i128::from(*n)),
            Value::Float(f) => {
                if !f.is_finite() {
                    return Err(EncodingError::NonFiniteFloat { path: path.clone() });
                }
                // -0.0 == 0.0, so both take the positive-zero bit pattern.
                let normalised = if *f == 0.0 { 0.0f64 } else { *f };
                self.buffer.push(TAG_FLOAT);
                self.buffer
                    .extend_from_slice(&normalised.to_bits().to_be_bytes());
            }
            Value::String(s) => {
                self.buffer.push(TAG_STRING);
                self.write_bytes(s.as_bytes());
            }
            Value::Bytes(b) => {
                self.buffer.push(TAG_BYTES);
                self.write_bytes(b);
            }
            Value::Array(items) => {
                self.buffer.push(TAG_ARRAY);
                self.write_u64(items.len() as u64);
                for (i, item) in items.iter().enumerate() {
                    let mark = path.len();
                    path.push_str(&format!("[{i}]"));
                    self.encode_node(item, depth + 1, path)?;
                    path.truncate(mark);
                }
            }
            Value::Map(entries) => {
                self.buffer.push(TAG_MAP);
                self.write_u64(entries.len() as u64);
                // BTreeMap iterates in key order.
                for (key, item) in entries {
                    self.write_bytes(key.as_bytes());
                    let mark = path.len();
                    path.push('.');
                    path.push_str(key);
                    self.encode_node(item, depth + 1, path)?;
                    path.truncate(mark);
                }
            }
        }
        Ok(())
    }

    fn write_int(&mut self, n: i128) {
        self.buffer.push(TAG_INT);
        self.buffer.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a single value canonically.
pub fn canonical_encode(value: &Value) -> Result<Vec<u8>, EncodingError> {
    let mut encoder = CanonicalEncoder::new();
    encoder.write_value(value)?;
    Ok(encoder.finish())
}
