// src/graph/value.rs

//! Artifact encodings and the decoded value type.

use serde::{Deserialize, Serialize};

use crate::hashing::Digest;

use super::error::{ErrorKind, ErrorRecord};

/// How the bytes of an artifact are to be interpreted.
///
/// There is no type system beyond this: either the blob is opaque bytes
/// (a file), or it is a JSON document handled by `serde_json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Blob,
    Json,
}

impl Encoding {
    pub(crate) fn tag(self) -> u8 {
        match self {
            Encoding::Blob => 0,
            Encoding::Json => 1,
        }
    }
}

/// A decoded artifact value, as handed to callables.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Blob(Vec<u8>),
    Json(serde_json::Value),
}

impl Value {
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            Value::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(v) => Some(v),
            Value::Blob(_) => None,
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

/// Deserialize stored bytes according to an encoding.
pub fn decode(enc: Encoding, data: &[u8], origin: Option<Digest>) -> Result<Value, ErrorRecord> {
    match enc {
        Encoding::Blob => Ok(Value::Blob(data.to_vec())),
        Encoding::Json => match serde_json::from_slice(data) {
            Ok(v) => Ok(Value::Json(v)),
            Err(e) => Err(ErrorRecord::new(
                ErrorKind::DecodeError,
                origin,
                format!("invalid JSON value: {e}"),
            )),
        },
    }
}

/// Serialize a value into bytes according to an encoding.
pub fn encode(enc: Encoding, value: &Value, origin: Option<Digest>) -> Result<Vec<u8>, ErrorRecord> {
    match (enc, value) {
        (Encoding::Blob, Value::Blob(b)) => Ok(b.clone()),
        (Encoding::Json, Value::Json(v)) => serde_json::to_vec(v).map_err(|e| {
            ErrorRecord::new(ErrorKind::DecodeError, origin, format!("unencodable JSON: {e}"))
        }),
        (enc, got) => {
            let shape = match got {
                Value::Blob(_) => "blob bytes",
                Value::Json(_) => "a JSON value",
            };
            Err(ErrorRecord::new(
                ErrorKind::DecodeError,
                origin,
                format!("declared encoding is {enc:?} but the callable produced {shape}"),
            ))
        }
    }
}
