// src/hashing.rs

//! Content digests and canonical serialization.
//!
//! Every entity identity in the store is a 20-byte truncated blake3 digest of
//! a canonical byte form. The canonical rules are fixed:
//!
//! - strings and byte strings are length-prefixed (u64 big-endian),
//! - integers are fixed-width big-endian,
//! - mappings are fed in ascending key order,
//! - sequences keep their order,
//! - every form starts with a domain tag so that e.g. a funsie and an
//!   operation can never collide byte-for-byte.
//!
//! Changing any of this invalidates every existing database, which is why the
//! schema version in `meta:version` exists.

use std::fmt;
use std::str::FromStr;

use blake3::Hasher;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{EngineError, Result};

/// Width of a digest in bytes. Hex form is twice this.
pub const DIGEST_LEN: usize = 20;

/// Length of short hashes used in log lines.
const SHORT: usize = 6;

/// A fixed-width content digest, the identity of every stored entity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Digest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }

    /// Shortened hex form for logs and DOT labels.
    pub fn short(&self) -> String {
        self.to_hex()[..SHORT].to_string()
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes =
            from_hex(s).ok_or_else(|| EngineError::UnknownObject(format!("bad hex: {s}")))?;
        let arr: [u8; DIGEST_LEN] = bytes
            .try_into()
            .map_err(|_| EngineError::UnknownObject(format!("bad digest length: {s}")))?;
        Ok(Digest(arr))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

impl FromStr for Digest {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Digest::from_hex(s)
    }
}

// Digests are persisted inside JSON records as their hex form.
impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).map_err(D::Error::custom)
    }
}

/// Incremental hasher that applies the canonical serialization rules.
pub struct CanonicalHasher {
    inner: Hasher,
}

impl CanonicalHasher {
    /// Start a new canonical form under the given domain tag.
    pub fn new(tag: &str) -> Self {
        let mut h = CanonicalHasher {
            inner: Hasher::new(),
        };
        h.write_str(tag);
        h
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_u64(bytes.len() as u64);
        self.inner.update(bytes);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.inner.update(&v.to_be_bytes());
    }

    pub fn write_u8(&mut self, v: u8) {
        self.inner.update(&[v]);
    }

    /// Digests are fixed-width, so they go in raw, without a length prefix.
    pub fn write_digest(&mut self, d: &Digest) {
        self.inner.update(d.as_bytes());
    }

    pub fn finish(self) -> Digest {
        let full = self.inner.finalize();
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&full.as_bytes()[..DIGEST_LEN]);
        Digest(out)
    }
}

/// Hash arbitrary bytes (used for the content-dedup index).
pub fn content_digest(bytes: &[u8]) -> Digest {
    let mut h = CanonicalHasher::new("content");
    h.write_bytes(bytes);
    h.finish()
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

pub(crate) fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
