//! Value Codec
//!
//! Encoding used for everything written to the remote store:
//! - strings pass through untouched, so other clients can read them as is,
//!   unless the text would itself read back as JSON (`123`, `1e2`, `"a"`);
//!   those are stored as a JSON string literal so they decode unchanged
//! - everything else is JSON (`serde_json`)
//! - payloads above the configured threshold can be gzipped (`flate2`); they
//!   are recognised on read by the gzip magic bytes, which never start valid
//!   UTF-8 text
//!
//! Decoding never fails: bytes that are not JSON come back as the raw string,
//! so one malformed entry cannot poison unrelated callers.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::io::{Read, Write};
use tracing::warn;

use crate::error::CacheResult;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Encoded payload ready for the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub compressed: bool,
}

/// JSON codec with optional gzip
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec {
    compress_threshold: usize,
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl JsonCodec {
    pub fn new(compress_threshold: usize) -> Self {
        Self { compress_threshold }
    }

    /// Encode a value; JSON failures are programmer errors and are raised
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Serialization` when `value` cannot be represented
    /// as JSON (e.g. a map with non-string keys).
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T, compress: bool) -> CacheResult<Encoded> {
        let bytes = match serde_json::to_value(value)? {
            Value::String(s) if serde_json::from_str::<Value>(&s).is_err() => s.into_bytes(),
            other => serde_json::to_vec(&other)?,
        };

        if compress && bytes.len() >= self.compress_threshold {
            let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::fast());
            encoder.write_all(&bytes)?;
            return Ok(Encoded {
                bytes: encoder.finish()?,
                compressed: true,
            });
        }

        Ok(Encoded {
            bytes,
            compressed: false,
        })
    }

    /// Decode into a JSON value, falling back to the raw string
    pub fn decode_value(&self, bytes: &[u8]) -> Value {
        let text = Self::inflate(bytes);
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    }

    /// Decode into `T`
    ///
    /// `None` when the payload fits neither the JSON reading nor the raw string.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Option<T> {
        Self::coerce(&self.decode_value(bytes))
    }

    /// Convert a decoded value into `T`
    ///
    /// Tries the value itself first, then the other reading of its text: a
    /// string `"123"` still decodes as a `u32`, and a number written raw by
    /// another client still decodes as a `String`.
    pub fn coerce<T: DeserializeOwned>(value: &Value) -> Option<T> {
        if let Ok(typed) = serde_json::from_value(value.clone()) {
            return Some(typed);
        }
        match value {
            Value::String(text) => serde_json::from_str(text).ok(),
            other => serde_json::from_value(Value::String(other.to_string())).ok(),
        }
    }

    /// Whether `bytes` is a gzipped payload
    pub fn is_compressed(bytes: &[u8]) -> bool {
        bytes.starts_with(&GZIP_MAGIC)
    }

    fn inflate(bytes: &[u8]) -> String {
        if Self::is_compressed(bytes) {
            let mut out = String::new();
            match GzDecoder::new(bytes).read_to_string(&mut out) {
                Ok(_) => return out,
                Err(e) => warn!(error = %e, "Failed to inflate cached payload, using raw bytes"),
            }
        }
        String::from_utf8_lossy(bytes).into_owned()
    }
}
