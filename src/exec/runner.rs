// src/exec/runner.rs

//! Per-operation execution: resolve inputs, dispatch by kind, write back,
//! commit.
//!
//! `run_op` is called with the claim already held (`op:status = running`).
//! Its contract: every declared output reaches `Ready`, `Linked` or `Error`,
//! the operation reaches `Done` or `Error`, and dependents whose inputs are
//! now terminal are enqueued — all inside one atomic commit, so a crash
//! before the commit leaves nothing half-finished and the claim is simply
//! reclaimed later.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::graph::{
    artifact_status_in, get_funsie, get_op, get_options, mark_error_in, op_status_in, producer_in,
    read_data_in, resolve_link_in, resolved_status, set_op_status_in, write_output_in, ErrorKind,
    ErrorRecord, Funsie, FunsieSpec, OpOptions, OpStatus, OperationRecord, ValueResult,
};
use crate::hashing::Digest;
use crate::queue::JobQueue;
use crate::store::{keys, SharedStore, Txn};

use super::callable::{run_callable, CallableInputs, CallableRegistry};
use super::shell::run_shell;
use super::subdag::{error_outcomes, run_subdag};

/// What happened to a claimed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// All outputs were already terminal; nothing executed.
    Cached,
    /// The operation body ran (successfully or not).
    Executed,
    /// A strict operation short-circuited on an errored input.
    ShortCircuited,
    /// Claimed too early; handed back as pending.
    NotReady,
}

/// Result of one output slot after execution.
#[derive(Debug, Clone)]
pub(crate) enum SlotOutcome {
    /// Produced bytes, to be stored (or deduplicated away).
    Bytes(Vec<u8>),
    /// Stand-in for another artifact (sub-DAG outputs).
    Link(Digest),
    Error(ErrorRecord),
}

/// Executes single operations end to end.
pub struct Runner {
    store: SharedStore,
    registry: Arc<CallableRegistry>,
    scratch_root: PathBuf,
}

impl Runner {
    pub fn new(store: SharedStore, registry: Arc<CallableRegistry>, scratch_root: PathBuf) -> Self {
        Runner {
            store,
            registry,
            scratch_root,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Run one claimed operation.
    ///
    /// Engine errors returned here mean the store itself misbehaved; the
    /// operation is left `Running` and will be reclaimed once its heartbeat
    /// goes stale.
    pub async fn run_op(&self, op_hash: Digest) -> Result<RunStatus> {
        let op = get_op(self.store.as_ref(), &op_hash)?;
        let funsie = get_funsie(self.store.as_ref(), &op.funsie)?;
        let options = get_options(self.store.as_ref(), &op_hash)?;

        info!(op = %op_hash.short(), kind = ?funsie.spec.kind(), "evaluating");

        if self.outputs_terminal(&op)? {
            info!(op = %op_hash.short(), "done: using cached outputs");
            self.finish_cached(&op)?;
            return Ok(RunStatus::Cached);
        }

        if !self.inputs_terminal(&op)? {
            // Enqueued prematurely (e.g. a direct enqueue by hash). Hand the
            // claim back; the next readiness pass re-enqueues when the
            // inputs actually are terminal.
            warn!(op = %op_hash.short(), "claimed with unmet dependencies; releasing");
            self.store.atomically(&mut |t| {
                set_op_status_in(t, &op_hash, OpStatus::Pending);
                JobQueue::release_in(t, &op_hash);
                Ok(())
            })?;
            return Ok(RunStatus::NotReady);
        }

        // Resolve raw input bytes (or the stored upstream errors).
        let mut raw: BTreeMap<String, std::result::Result<Vec<u8>, ErrorRecord>> = BTreeMap::new();
        self.store.atomically(&mut |t| {
            raw.clear();
            for slot in &funsie.inputs {
                let art = op.inputs[&slot.name];
                raw.insert(slot.name.clone(), read_data_in(t, &art));
            }
            Ok(())
        })?;

        // Strict operations never see upstream errors: forward the earliest
        // one (in slot order), origin preserved, and stop.
        let upstream = funsie
            .inputs
            .iter()
            .find_map(|slot| match &raw[&slot.name] {
                Err(record) => Some((slot.name.clone(), record.clone())),
                Ok(_) => None,
            });
        if let Some((slot, record)) = upstream {
            if funsie.strict || matches!(funsie.spec, FunsieSpec::Shell { .. }) {
                info!(op = %op_hash.short(), slot = %slot, "done: short-circuit on errored input");
                let origin = match record.origin {
                    Some(origin) => Some(origin),
                    None => self.producer_of(&op.inputs[&slot])?,
                };
                let forwarded = ErrorRecord::new(
                    ErrorKind::Upstream,
                    origin,
                    format!("input '{slot}' errored: {}", record.message),
                );
                self.commit(&op, error_outcomes(&funsie, forwarded), None)?;
                return Ok(RunStatus::ShortCircuited);
            }
        }

        // Dispatch by kind.
        let (outcomes, generated) = match &funsie.spec {
            FunsieSpec::Shell { .. } => {
                let bytes: BTreeMap<String, Vec<u8>> = raw
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone().expect("shell inputs checked above")))
                    .collect();
                let fut = run_shell(&op, &funsie, &bytes, &self.scratch_root);
                match with_timeout(options.timeout_secs, fut).await {
                    Some(outcomes) => (outcomes?, None),
                    None => (timeout_outcomes(&op, &funsie, &options), None),
                }
            }
            FunsieSpec::Callable { .. } => {
                let inputs = decode_inputs(&funsie, &raw, op_hash);
                if let Some(record) = strict_decode_failure(&funsie, &inputs) {
                    (error_outcomes(&funsie, record), None)
                } else {
                    let fut = run_callable(&self.registry, &op, &funsie, inputs);
                    match with_timeout(options.timeout_secs, fut).await {
                        Some(outcomes) => (outcomes, None),
                        None => (timeout_outcomes(&op, &funsie, &options), None),
                    }
                }
            }
            FunsieSpec::Subdag { .. } => {
                let inputs = decode_inputs(&funsie, &raw, op_hash);
                if let Some(record) = strict_decode_failure(&funsie, &inputs) {
                    (error_outcomes(&funsie, record), None)
                } else {
                    let fut =
                        run_subdag(&self.store, &self.registry, &op, &funsie, inputs, &options);
                    match with_timeout(options.timeout_secs, fut).await {
                        Some(result) => {
                            let (outcomes, generated) = result?;
                            (outcomes, Some(generated))
                        }
                        None => (timeout_outcomes(&op, &funsie, &options), None),
                    }
                }
            }
            FunsieSpec::DataSource => {
                // Data sources are never executed; their artifact is const.
                warn!(op = %op_hash.short(), "data-source operation claimed; nothing to run");
                self.finish_cached(&op)?;
                return Ok(RunStatus::Cached);
            }
        };

        self.commit(&op, outcomes, generated)?;
        info!(op = %op_hash.short(), "done: evaluated");
        Ok(RunStatus::Executed)
    }

    fn outputs_terminal(&self, op: &OperationRecord) -> Result<bool> {
        for art in op.outputs.values() {
            if !resolved_status(self.store.as_ref(), art)?.is_terminal() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn inputs_terminal(&self, op: &OperationRecord) -> Result<bool> {
        for art in op.inputs.values() {
            if !resolved_status(self.store.as_ref(), art)?.is_terminal() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn producer_of(&self, art: &Digest) -> Result<Option<Digest>> {
        let mut producer = None;
        self.store.atomically(&mut |t| {
            let target = resolve_link_in(t, art);
            producer = producer_in(t, &target);
            Ok(())
        })?;
        Ok(producer)
    }

    /// Terminal bookkeeping when there is nothing to execute: settle the
    /// operation status from its outputs, release the claim and wake
    /// whatever is now runnable.
    fn finish_cached(&self, op: &OperationRecord) -> Result<()> {
        let mut queues = Vec::new();
        self.store.atomically(&mut |t| {
            queues.clear();
            if !op_status_in(t, &op.hash).map(OpStatus::is_terminal).unwrap_or(false) {
                let status = settled_status_in(t, op);
                set_op_status_in(t, &op.hash, status);
            }
            JobQueue::release_in(t, &op.hash);
            for (queue, child) in ready_children_in(t, op) {
                JobQueue::enqueue_in(t, &queue, &child);
                queues.push(queue);
            }
            Ok(())
        })?;
        self.wake(queues);
        Ok(())
    }

    /// The atomic commit: output statuses, operation status, sub-DAG link
    /// table, claim release and dependent enqueues all land together.
    fn commit(
        &self,
        op: &OperationRecord,
        outcomes: BTreeMap<String, SlotOutcome>,
        generated: Option<Vec<Digest>>,
    ) -> Result<()> {
        let mut queues = Vec::new();
        self.store.atomically(&mut |t| {
            queues.clear();
            let mut any_ok = false;
            for (slot, outcome) in &outcomes {
                let Some(art) = op.outputs.get(slot) else {
                    warn!(op = %op.hash.short(), slot = %slot, "outcome for unknown output slot");
                    continue;
                };
                match outcome {
                    SlotOutcome::Bytes(bytes) => {
                        write_output_in(t, art, bytes)?;
                        any_ok = true;
                    }
                    SlotOutcome::Link(target) => {
                        link_output_in(t, art, target);
                        any_ok = true;
                    }
                    SlotOutcome::Error(record) => {
                        mark_error_in(t, art, record)?;
                    }
                }
            }

            let status = if any_ok || outcomes.is_empty() {
                OpStatus::Done
            } else {
                OpStatus::Error
            };
            set_op_status_in(t, &op.hash, status);

            if let Some(generated) = &generated {
                for g in generated {
                    t.sadd(&keys::op_subdag(&op.hash), &g.to_hex());
                }
            }

            JobQueue::release_in(t, &op.hash);
            for (queue, child) in ready_children_in(t, op) {
                JobQueue::enqueue_in(t, &queue, &child);
                queues.push(queue);
            }
            Ok(())
        })?;
        self.wake(queues);
        Ok(())
    }

    fn wake(&self, mut queues: Vec<String>) {
        queues.sort();
        queues.dedup();
        for queue in queues {
            self.store.publish(&keys::queue(&queue));
        }
        self.store.publish(keys::WAKE_CHANNEL);
    }
}

/// Settle an operation status from the statuses of its outputs: `Error` only
/// when every output errored.
fn settled_status_in(t: &dyn Txn, op: &OperationRecord) -> OpStatus {
    let mut any_ok = op.outputs.is_empty();
    for art in op.outputs.values() {
        let target = resolve_link_in(t, art);
        match artifact_status_in(t, &target) {
            crate::graph::ArtifactStatus::Error => {}
            _ => any_ok = true,
        }
    }
    if any_ok {
        OpStatus::Done
    } else {
        OpStatus::Error
    }
}

/// Dependents of `op` that are pending with fully terminal inputs, paired
/// with the queue they should land on.
fn ready_children_in(t: &dyn Txn, op: &OperationRecord) -> Vec<(String, Digest)> {
    let mut out = Vec::new();
    for entry in t.smembers(&keys::op_children(&op.hash)) {
        let Ok(child) = Digest::from_hex(&entry) else {
            continue;
        };
        if op_status_in(t, &child) != Some(OpStatus::Pending) {
            continue;
        }
        let deps = t.smembers(&keys::op_deps(&child));
        let ready = deps.iter().all(|d| {
            Digest::from_hex(d)
                .map(|d| {
                    let target = resolve_link_in(t, &d);
                    artifact_status_in(t, &target).is_terminal()
                })
                .unwrap_or(false)
        });
        if !ready {
            continue;
        }
        let queue = t
            .get(&keys::op_options(&child))
            .and_then(|raw| serde_json::from_slice::<OpOptions>(&raw).ok())
            .map(|o| o.queue)
            .unwrap_or_else(|| OpOptions::default().queue);
        debug!(parent = %op.hash.short(), child = %child.short(), "dependent is ready");
        out.push((queue, child));
    }
    out
}

/// Link a declared output to a generated artifact. Terminal outputs are
/// left alone (first terminal state wins).
fn link_output_in(t: &mut dyn Txn, art: &Digest, target: &Digest) {
    match artifact_status_in(t, art) {
        crate::graph::ArtifactStatus::Unresolved => {
            t.set(&keys::art_link(art), target.to_hex().into_bytes());
            t.set(&keys::art_status(art), b"l".to_vec());
        }
        status => {
            warn!(artifact = %art.short(), ?status, "refusing to relink a terminal artifact");
        }
    }
}

/// Decode raw input bytes according to each slot's declared encoding.
fn decode_inputs(
    funsie: &Funsie,
    raw: &BTreeMap<String, std::result::Result<Vec<u8>, ErrorRecord>>,
    op_hash: Digest,
) -> CallableInputs {
    funsie
        .inputs
        .iter()
        .map(|slot| {
            let result: ValueResult = match &raw[&slot.name] {
                Ok(bytes) => crate::graph::decode(slot.encoding, bytes, Some(op_hash)),
                Err(record) => Err(record.clone()),
            };
            (slot.name.clone(), result)
        })
        .collect()
}

/// A strict operation also refuses to run on inputs that fail to decode;
/// upstream errors were already handled before decoding, so any `Err` left
/// here is a fresh decode failure originating at this operation.
fn strict_decode_failure(funsie: &Funsie, inputs: &CallableInputs) -> Option<ErrorRecord> {
    if !funsie.strict {
        return None;
    }
    funsie.inputs.iter().find_map(|slot| match &inputs[&slot.name] {
        Err(record) if record.kind == ErrorKind::DecodeError => Some(record.clone()),
        _ => None,
    })
}

fn timeout_outcomes(
    op: &OperationRecord,
    funsie: &Funsie,
    options: &OpOptions,
) -> BTreeMap<String, SlotOutcome> {
    let secs = options.timeout_secs.unwrap_or(0);
    warn!(op = %op.hash.short(), secs, "operation timed out");
    error_outcomes(
        funsie,
        ErrorRecord::new(
            ErrorKind::Timeout,
            Some(op.hash),
            format!("operation exceeded its {secs}s wall-clock timeout"),
        ),
    )
}

/// Run a future under an optional wall-clock limit; `None` means it timed
/// out. Shell children are killed on drop; a blocking callable thread keeps
/// running in the background and its eventual result is discarded.
async fn with_timeout<T>(timeout_secs: Option<u64>, fut: impl Future<Output = T>) -> Option<T> {
    match timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), fut)
            .await
            .ok(),
        None => Some(fut.await),
    }
}
