// src/graph/funsie.rs

//! The funsie: a pure operation descriptor, independent of concrete inputs.

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};
use crate::hashing::{CanonicalHasher, Digest};
use crate::store::{keys, Store};

use super::value::Encoding;

/// Kinds of funsies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FunsieKind {
    Shell,
    Callable,
    Subdag,
    DataSource,
}

/// The kind-specific payload: *what* to compute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FunsieSpec {
    /// Ordered shell commands, run in sequence in one scratch directory.
    Shell { commands: Vec<String> },
    /// A registered in-process callable, referenced by stable name.
    Callable { name: String },
    /// A registered sub-DAG generator, referenced by stable name.
    Subdag { generator: String },
    /// Never executed; the artifact's content is the payload.
    DataSource,
}

impl FunsieSpec {
    pub fn kind(&self) -> FunsieKind {
        match self {
            FunsieSpec::Shell { .. } => FunsieKind::Shell,
            FunsieSpec::Callable { .. } => FunsieKind::Callable,
            FunsieSpec::Subdag { .. } => FunsieKind::Subdag,
            FunsieSpec::DataSource => FunsieKind::DataSource,
        }
    }
}

/// A named input or output slot with its declared encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub name: String,
    pub encoding: Encoding,
}

impl Slot {
    pub fn new(name: impl Into<String>, encoding: Encoding) -> Self {
        Slot {
            name: name.into(),
            encoding,
        }
    }
}

/// A pure operation descriptor.
///
/// Two funsies with identical canonical form share an identity, no matter
/// which machine or process created them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Funsie {
    pub spec: FunsieSpec,
    /// Ordered input slots.
    pub inputs: Vec<Slot>,
    /// Ordered output slots.
    pub outputs: Vec<Slot>,
    /// Whether an errored input short-circuits this operation. Changes
    /// runtime behavior, so it participates in the hash.
    pub strict: bool,
    /// Opaque bytes that participate in the hash. Lets a user force a
    /// recompute or disambiguate otherwise-identical operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Vec<u8>>,
}

impl Funsie {
    /// Identity: hash of the canonical serialization of every field.
    pub fn digest(&self) -> Digest {
        let mut h = CanonicalHasher::new("funsie");
        h.write_u8(self.spec.kind() as u8);
        match &self.spec {
            FunsieSpec::Shell { commands } => {
                h.write_u64(commands.len() as u64);
                for cmd in commands {
                    h.write_str(cmd);
                }
            }
            FunsieSpec::Callable { name } => h.write_str(name),
            FunsieSpec::Subdag { generator } => h.write_str(generator),
            FunsieSpec::DataSource => {}
        }
        for slots in [&self.inputs, &self.outputs] {
            h.write_u64(slots.len() as u64);
            for slot in slots.iter() {
                h.write_str(&slot.name);
                h.write_u8(slot.encoding.tag());
            }
        }
        h.write_u8(self.strict as u8);
        match &self.extra {
            Some(extra) => {
                h.write_u8(1);
                h.write_bytes(extra);
            }
            None => h.write_u8(0),
        }
        h.finish()
    }

    pub fn input(&self, name: &str) -> Option<&Slot> {
        self.inputs.iter().find(|s| s.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Slot> {
        self.outputs.iter().find(|s| s.name == name)
    }
}

/// Store a funsie record. Idempotent: an existing record is left untouched.
pub fn put_funsie(store: &dyn Store, funsie: &Funsie) -> Result<Digest> {
    let h = funsie.digest();
    let record = serde_json::to_vec(funsie)?;
    store.atomically(&mut |t| {
        t.set_if_absent(&keys::funsie(&h), record.clone());
        t.set_if_absent(&keys::idx(&h), b"f".to_vec());
        Ok(())
    })?;
    Ok(h)
}

/// Load a funsie record.
pub fn get_funsie(store: &dyn Store, h: &Digest) -> Result<Funsie> {
    let mut raw = None;
    store.atomically(&mut |t| {
        raw = t.get(&keys::funsie(h));
        Ok(())
    })?;
    let raw = raw.ok_or_else(|| EngineError::UnknownObject(format!("funsie {h}")))?;
    Ok(serde_json::from_slice(&raw)?)
}
