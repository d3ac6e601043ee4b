// src/graph/artifact.rs

//! Artifacts: named handles to (possibly not-yet-computed) byte blobs.
//!
//! The identity rule is the heart of the engine (causal hashing):
//!
//! - a `const` artifact is hashed from its encoding and bytes, so identical
//!   content collapses to one identity;
//! - a derived artifact is hashed from (producing operation, slot name) — who
//!   will make it and which output — not from its future bytes. Two workers
//!   independently creating the same operation therefore write to the same
//!   keys, which is what makes memoization deterministic and cheap.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{EngineError, Result};
use crate::hashing::{content_digest, CanonicalHasher, Digest};
use crate::store::{keys, Store, Txn};

use super::error::{ErrorKind, ErrorRecord};
use super::value::Encoding;

/// Where an artifact comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Parent {
    /// Provided by the user; content is the identity.
    Const,
    /// Output `slot` of operation `op`; the pair is the identity.
    Derived { op: Digest, slot: String },
}

/// Persisted artifact metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub hash: Digest,
    pub encoding: Encoding,
    pub parent: Parent,
}

/// The user-facing artifact handle: hash and declared encoding, nothing
/// else. Handles are never resolved eagerly; they are pointers to future
/// data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Artifact {
    pub hash: Digest,
    pub encoding: Encoding,
}

/// KV-stored artifact status.
///
/// Transitions are monotone: `Unresolved` to one of the terminal states.
/// `Linked` means the bytes live under another artifact's key (dedup).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStatus {
    Unresolved,
    Ready,
    Error,
    Linked,
}

impl ArtifactStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ArtifactStatus::Unresolved)
    }

    fn to_byte(self) -> u8 {
        match self {
            ArtifactStatus::Unresolved => b'u',
            ArtifactStatus::Ready => b'r',
            ArtifactStatus::Error => b'e',
            ArtifactStatus::Linked => b'l',
        }
    }

    fn from_bytes(raw: Option<Vec<u8>>) -> Self {
        match raw.as_deref() {
            Some([b'r']) => ArtifactStatus::Ready,
            Some([b'e']) => ArtifactStatus::Error,
            Some([b'l']) => ArtifactStatus::Linked,
            _ => ArtifactStatus::Unresolved,
        }
    }
}

/// Identity of a const artifact: encoding + content.
pub fn const_digest(encoding: Encoding, bytes: &[u8]) -> Digest {
    let mut h = CanonicalHasher::new("artifact");
    h.write_str("const");
    h.write_u8(encoding.tag());
    h.write_bytes(bytes);
    h.finish()
}

/// Identity of a derived artifact: producer + slot name.
pub fn derived_digest(op: &Digest, slot: &str) -> Digest {
    let mut h = CanonicalHasher::new("artifact");
    h.write_str("derived");
    h.write_digest(op);
    h.write_str(slot);
    h.finish()
}

/// Store a const artifact: metadata, bytes and `Ready` status in one atomic
/// step. Idempotent; a second writer with the same content is a no-op, a
/// second writer with different content under the same key is a fatal
/// collision.
pub fn put_const(store: &dyn Store, encoding: Encoding, bytes: &[u8]) -> Result<Artifact> {
    let hash = const_digest(encoding, bytes);
    let record = ArtifactRecord {
        hash,
        encoding,
        parent: Parent::Const,
    };
    let raw = serde_json::to_vec(&record)?;
    let content_hex = content_digest(bytes).to_hex();

    store.atomically(&mut |t| {
        if !t.set_if_absent(&keys::art(&hash), raw.clone()) {
            debug!(artifact = %hash.short(), "const artifact already exists");
        }
        write_once(t, &keys::art_data(&hash), bytes)?;
        t.set(&keys::art_status(&hash), vec![ArtifactStatus::Ready.to_byte()]);
        t.set_if_absent(&keys::data_index(&content_hex), hash.to_hex().into_bytes());
        t.set_if_absent(&keys::idx(&hash), b"a".to_vec());
        Ok(())
    })?;

    Ok(Artifact { hash, encoding })
}

/// Create the metadata for a derived (not-yet-computed) artifact inside an
/// operation-creation transaction. Status stays absent, which reads as
/// `Unresolved`.
pub(crate) fn create_derived(
    t: &mut dyn Txn,
    op: &Digest,
    slot: &str,
    encoding: Encoding,
) -> Result<Digest> {
    let hash = derived_digest(op, slot);
    let record = ArtifactRecord {
        hash,
        encoding,
        parent: Parent::Derived {
            op: *op,
            slot: slot.to_string(),
        },
    };
    t.set_if_absent(&keys::art(&hash), serde_json::to_vec(&record)?);
    t.set(&keys::art_prod(&hash), op.to_hex().into_bytes());
    t.set_if_absent(&keys::idx(&hash), b"a".to_vec());
    Ok(hash)
}

/// Load artifact metadata.
pub fn get_record(store: &dyn Store, h: &Digest) -> Result<ArtifactRecord> {
    let mut raw = None;
    store.atomically(&mut |t| {
        raw = t.get(&keys::art(h));
        Ok(())
    })?;
    let raw = raw.ok_or_else(|| EngineError::UnknownObject(format!("artifact {h}")))?;
    Ok(serde_json::from_slice(&raw)?)
}

pub fn get_status(store: &dyn Store, h: &Digest) -> Result<ArtifactStatus> {
    let mut status = ArtifactStatus::Unresolved;
    store.atomically(&mut |t| {
        status = status_in(t, h);
        Ok(())
    })?;
    Ok(status)
}

pub(crate) fn status_in(t: &dyn Txn, h: &Digest) -> ArtifactStatus {
    ArtifactStatus::from_bytes(t.get(&keys::art_status(h)))
}

/// Digest of the operation producing this artifact, if any.
pub(crate) fn producer_in(t: &dyn Txn, h: &Digest) -> Option<Digest> {
    t.get(&keys::art_prod(h))
        .and_then(|raw| String::from_utf8(raw).ok())
        .and_then(|hex| Digest::from_hex(&hex).ok())
}

/// Follow `Linked` redirects until a non-linked artifact is reached.
pub(crate) fn resolve_link_in(t: &dyn Txn, h: &Digest) -> Digest {
    let mut current = *h;
    // The link graph is acyclic by construction; the bound is a guard
    // against store corruption.
    for _ in 0..64 {
        if status_in(t, &current) != ArtifactStatus::Linked {
            return current;
        }
        match t
            .get(&keys::art_link(&current))
            .and_then(|raw| String::from_utf8(raw).ok())
            .and_then(|hex| Digest::from_hex(&hex).ok())
        {
            Some(next) => current = next,
            None => return current,
        }
    }
    warn!(artifact = %h.short(), "link chain too deep; treating as terminal");
    current
}

pub fn resolve_link(store: &dyn Store, h: &Digest) -> Result<Digest> {
    let mut out = *h;
    store.atomically(&mut |t| {
        out = resolve_link_in(t, h);
        Ok(())
    })?;
    Ok(out)
}

/// Status of an artifact after following redirects. This is the status that
/// readiness checks care about.
pub fn resolved_status(store: &dyn Store, h: &Digest) -> Result<ArtifactStatus> {
    let mut status = ArtifactStatus::Unresolved;
    store.atomically(&mut |t| {
        let target = resolve_link_in(t, h);
        status = status_in(t, &target);
        Ok(())
    })?;
    Ok(status)
}

/// Retrieve the bytes (or error value) behind an artifact.
pub fn get_data(store: &dyn Store, h: &Digest) -> Result<std::result::Result<Vec<u8>, ErrorRecord>> {
    let mut out: Option<std::result::Result<Vec<u8>, ErrorRecord>> = None;
    store.atomically(&mut |t| {
        out = Some(read_data_in(t, h));
        Ok(())
    })?;
    Ok(out.expect("transaction body always fills the result"))
}

pub(crate) fn read_data_in(t: &dyn Txn, h: &Digest) -> std::result::Result<Vec<u8>, ErrorRecord> {
    let target = resolve_link_in(t, h);
    match status_in(t, &target) {
        ArtifactStatus::Ready => match t.get(&keys::art_data(&target)) {
            Some(bytes) => Ok(bytes),
            None => Err(ErrorRecord::new(
                ErrorKind::NotFound,
                None,
                format!("artifact {target} is ready but its data is missing"),
            )),
        },
        ArtifactStatus::Error => match t.get(&keys::art_err(&target)) {
            Some(raw) => match serde_json::from_slice::<ErrorRecord>(&raw) {
                Ok(record) => Err(record),
                Err(e) => Err(ErrorRecord::new(
                    ErrorKind::NotFound,
                    None,
                    format!("corrupt error record for {target}: {e}"),
                )),
            },
            None => Err(ErrorRecord::new(
                ErrorKind::NotFound,
                None,
                format!("artifact {target} errored but carries no record"),
            )),
        },
        ArtifactStatus::Unresolved => Err(ErrorRecord::new(
            ErrorKind::NotFound,
            None,
            format!("no data associated with artifact {target}"),
        )),
        ArtifactStatus::Linked => Err(ErrorRecord::new(
            ErrorKind::NotFound,
            None,
            format!("artifact {target} is an unresolved link"),
        )),
    }
}

/// Mark an artifact errored. Terminal states are never overwritten.
pub(crate) fn mark_error_in(t: &mut dyn Txn, h: &Digest, error: &ErrorRecord) -> Result<()> {
    match status_in(t, h) {
        ArtifactStatus::Unresolved => {
            t.set(&keys::art_err(h), serde_json::to_vec(error)?);
            t.set(&keys::art_status(h), vec![ArtifactStatus::Error.to_byte()]);
        }
        status => {
            warn!(
                artifact = %h.short(),
                ?status,
                "refusing to mark a terminal artifact as errored"
            );
        }
    }
    Ok(())
}

/// Write produced bytes under an artifact, deduplicating against identical
/// content elsewhere in the store. Returns the status that was written.
pub(crate) fn write_output_in(
    t: &mut dyn Txn,
    h: &Digest,
    bytes: &[u8],
) -> Result<ArtifactStatus> {
    match status_in(t, h) {
        ArtifactStatus::Unresolved => {}
        status => {
            // A concurrent attempt already resolved this artifact; keep the
            // first terminal state.
            debug!(artifact = %h.short(), ?status, "output already terminal");
            return Ok(status);
        }
    }

    let content_hex = content_digest(bytes).to_hex();
    let owner = t
        .get(&keys::data_index(&content_hex))
        .and_then(|raw| String::from_utf8(raw).ok())
        .and_then(|hex| Digest::from_hex(&hex).ok());

    if let Some(owner) = owner {
        if owner != *h && status_in(t, &owner) == ArtifactStatus::Ready {
            t.set(&keys::art_link(h), owner.to_hex().into_bytes());
            t.set(&keys::art_status(h), vec![ArtifactStatus::Linked.to_byte()]);
            debug!(artifact = %h.short(), owner = %owner.short(), "deduplicated output");
            return Ok(ArtifactStatus::Linked);
        }
    }

    write_once(t, &keys::art_data(h), bytes)?;
    t.set(&keys::art_status(h), vec![ArtifactStatus::Ready.to_byte()]);
    t.set_if_absent(&keys::data_index(&content_hex), h.to_hex().into_bytes());
    Ok(ArtifactStatus::Ready)
}

/// Enforce the write-once invariant on a data key: a second write must carry
/// identical bytes, anything else is a fatal hash collision.
fn write_once(t: &mut dyn Txn, key: &str, bytes: &[u8]) -> Result<()> {
    if let Some(existing) = t.get(key) {
        if existing != bytes {
            return Err(EngineError::HashCollision(key.to_string()));
        }
        return Ok(());
    }
    t.set(key, bytes.to_vec());
    Ok(())
}
