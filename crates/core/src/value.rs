// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON value model for SQL parameters and row values.
//!
//! Scalars map onto plain JSON; blobs cross the boundary as
//! `{"blob": "<hex>"}` objects so binary data survives the UTF-8 wire
//! format in both directions.

use serde::{Deserialize, Serialize};

/// One SQL parameter or column value as it appears on the wire.
///
/// The untagged representation keeps the protocol JSON-plain: `null`,
/// numbers, and strings deserialize to the matching variant, and only
/// binary data needs the `{"blob": ...}` wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(BlobValue),
}

/// Hex-encoded binary payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobValue {
    pub blob: String,
}

impl SqlValue {
    /// Wrap raw bytes as a hex-encoded blob value.
    pub fn blob(bytes: &[u8]) -> Self {
        SqlValue::Blob(BlobValue {
            blob: base16ct::lower::encode_string(bytes),
        })
    }

    /// Decode a blob variant back to raw bytes.
    ///
    /// Returns `None` for non-blob variants or undecodable hex.
    pub fn as_blob_bytes(&self) -> Option<Vec<u8>> {
        match self {
            SqlValue::Blob(b) => base16ct::mixed::decode_vec(&b.blob).ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

#[cfg(test)]
#[path = "value_tests.rs"]
mod tests;
