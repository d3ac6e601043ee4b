// src/graph/op.rs

//! Operations: a funsie bound to concrete input artifacts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{EngineError, Result};
use crate::hashing::{CanonicalHasher, Digest};
use crate::store::{keys, Store, StoreExt, Txn};

use super::artifact::{self, Artifact};
use super::funsie::{put_funsie, Funsie};

/// Persisted operation record.
///
/// `outputs` is derivable from the hash and the funsie, but storing it makes
/// reads cheap and keeps the record self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub hash: Digest,
    pub funsie: Digest,
    pub inputs: BTreeMap<String, Digest>,
    pub outputs: BTreeMap<String, Digest>,
}

/// KV-stored operation status. `Pending -> Running -> Done | Error`, with
/// `Running -> Pending` allowed only through stale-claim reclaim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl OpStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OpStatus::Done | OpStatus::Error)
    }

    fn to_byte(self) -> u8 {
        match self {
            OpStatus::Pending => b'p',
            OpStatus::Running => b'r',
            OpStatus::Done => b'd',
            OpStatus::Error => b'e',
        }
    }

    fn from_bytes(raw: Option<Vec<u8>>) -> Option<Self> {
        match raw.as_deref() {
            Some([b'p']) => Some(OpStatus::Pending),
            Some([b'r']) => Some(OpStatus::Running),
            Some([b'd']) => Some(OpStatus::Done),
            Some([b'e']) => Some(OpStatus::Error),
            _ => None,
        }
    }
}

/// Per-operation runtime options. Stored next to the record; deliberately
/// *not* part of the operation identity, so changing a timeout does not
/// invalidate caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpOptions {
    /// Queue this operation should be picked up from.
    pub queue: String,
    /// Wall-clock timeout in seconds; exceeding it errors the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for OpOptions {
    fn default() -> Self {
        OpOptions {
            queue: "default".to_string(),
            timeout_secs: None,
        }
    }
}

/// Identity: hash of (funsie identity, canonical input bindings).
pub fn operation_digest(funsie: &Digest, inputs: &BTreeMap<String, Digest>) -> Digest {
    let mut h = CanonicalHasher::new("operation");
    h.write_digest(funsie);
    h.write_u64(inputs.len() as u64);
    for (name, art) in inputs {
        h.write_str(name);
        h.write_digest(art);
    }
    h.finish()
}

/// Create an operation: funsie, record, unresolved output artifacts, reverse
/// indexes and status, all in one atomic step.
///
/// Idempotent: if the operation already exists, the stored record is
/// returned unchanged. Input bindings whose transitive producer set would
/// include the new operation itself are refused (the provenance graph stays
/// acyclic by construction).
pub fn put_operation(
    store: &dyn Store,
    funsie: &Funsie,
    inputs: &BTreeMap<String, Artifact>,
    options: &OpOptions,
) -> Result<OperationRecord> {
    // Validate the bindings against the funsie's declared slots.
    for name in inputs.keys() {
        if funsie.input(name).is_none() {
            return Err(EngineError::SlotMismatch(format!(
                "extra input slot '{name}'"
            )));
        }
    }
    for slot in &funsie.inputs {
        if !inputs.contains_key(&slot.name) {
            return Err(EngineError::SlotMismatch(format!(
                "missing input slot '{}'",
                slot.name
            )));
        }
    }

    let funsie_hash = put_funsie(store, funsie)?;
    let bindings: BTreeMap<String, Digest> =
        inputs.iter().map(|(k, a)| (k.clone(), a.hash)).collect();
    let op_hash = operation_digest(&funsie_hash, &bindings);

    refuse_cycles(store, &op_hash, &bindings)?;

    let options_raw = serde_json::to_vec(options)?;
    let mut record: Option<OperationRecord> = None;

    store.atomically(&mut |t| {
        if let Some(raw) = t.get(&keys::op(&op_hash)) {
            debug!(op = %op_hash.short(), "operation already exists");
            record = Some(serde_json::from_slice(&raw)?);
            return Ok(());
        }

        let mut outputs = BTreeMap::new();
        for slot in &funsie.outputs {
            let art = artifact::create_derived(t, &op_hash, &slot.name, slot.encoding)?;
            outputs.insert(slot.name.clone(), art);
        }

        let node = OperationRecord {
            hash: op_hash,
            funsie: funsie_hash,
            inputs: bindings.clone(),
            outputs,
        };
        t.set(&keys::op(&op_hash), serde_json::to_vec(&node)?);
        t.set(&keys::op_options(&op_hash), options_raw.clone());
        t.set(&keys::op_status(&op_hash), vec![OpStatus::Pending.to_byte()]);
        t.set_if_absent(&keys::idx(&op_hash), b"o".to_vec());

        for art in bindings.values() {
            t.sadd(&keys::op_deps(&op_hash), &art.to_hex());
            // Reverse index: tell the producer that this operation is a
            // dependent, so completions can enqueue us directly.
            if let Some(producer) = artifact::producer_in(t, art) {
                t.sadd(&keys::op_children(&producer), &op_hash.to_hex());
            }
        }

        record = Some(node);
        Ok(())
    })?;

    Ok(record.expect("transaction body always fills the record"))
}

/// Walk the transitive producers of the given bindings and refuse the
/// operation if it appears among them. A cycle cannot normally be expressed
/// (an operation would need to know its own hash before creating itself),
/// so hitting this means hand-crafted records or a hash collision.
fn refuse_cycles(
    store: &dyn Store,
    op_hash: &Digest,
    bindings: &BTreeMap<String, Digest>,
) -> Result<()> {
    let mut queue: Vec<Digest> = bindings.values().copied().collect();
    let mut seen = std::collections::HashSet::new();

    while let Some(art) = queue.pop() {
        let mut producer = None;
        store.atomically(&mut |t| {
            producer = artifact::producer_in(t, &art);
            Ok(())
        })?;
        let Some(producer) = producer else { continue };
        if producer == *op_hash {
            return Err(EngineError::Cycle(op_hash.to_hex()));
        }
        if !seen.insert(producer) {
            continue;
        }
        let op = get_op(store, &producer)?;
        queue.extend(op.inputs.values().copied());
    }
    Ok(())
}

pub fn get_op(store: &dyn Store, h: &Digest) -> Result<OperationRecord> {
    let raw = store
        .get(&keys::op(h))?
        .ok_or_else(|| EngineError::UnknownObject(format!("operation {h}")))?;
    Ok(serde_json::from_slice(&raw)?)
}

pub fn get_options(store: &dyn Store, h: &Digest) -> Result<OpOptions> {
    match store.get(&keys::op_options(h))? {
        Some(raw) => Ok(serde_json::from_slice(&raw)?),
        None => Ok(OpOptions::default()),
    }
}

pub fn get_status(store: &dyn Store, h: &Digest) -> Result<Option<OpStatus>> {
    let mut status = None;
    store.atomically(&mut |t| {
        status = status_in(t, h);
        Ok(())
    })?;
    Ok(status)
}

pub(crate) fn status_in(t: &dyn Txn, h: &Digest) -> Option<OpStatus> {
    OpStatus::from_bytes(t.get(&keys::op_status(h)))
}

pub(crate) fn set_status_in(t: &mut dyn Txn, h: &Digest, status: OpStatus) {
    t.set(&keys::op_status(h), vec![status.to_byte()]);
}
