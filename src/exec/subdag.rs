// src/exec/subdag.rs

//! Dynamic sub-DAG generation.
//!
//! A subdag operation does not compute values; executing it runs a
//! registered generator over the resolved inputs. The generator builds new
//! operations through a [`SubdagScope`] and returns which of their output
//! artifacts stand in for the subdag's own declared outputs. Those declared
//! outputs are then *linked* to the generated artifacts, and the link table
//! under the operation records what was generated — a later cache hit on the
//! subdag operation never re-runs the generator.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, warn};

use crate::api::{build_callable, build_shell, ShellOutput};
use crate::errors::Result;
use crate::graph::{
    put_const, Artifact, Encoding, ErrorKind, ErrorRecord, Funsie, FunsieKind, FunsieSpec,
    OpOptions, OperationRecord,
};
use crate::hashing::Digest;
use crate::store::SharedStore;

use super::callable::{CallableInputs, CallableRegistry};
use super::runner::SlotOutcome;

/// Workflow-construction capability handed to sub-DAG generators.
///
/// Everything created through the scope is recorded, so the runtime can
/// write the link table after the generator returns. Generators may nest:
/// `put_subdag` from inside a generator is how recursive workflows bottom
/// out.
#[derive(Clone)]
pub struct SubdagScope {
    store: SharedStore,
    options: OpOptions,
    created: Arc<Mutex<Vec<Digest>>>,
}

impl SubdagScope {
    pub(crate) fn new(store: SharedStore, options: OpOptions) -> Self {
        SubdagScope {
            store,
            options,
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Store a user-provided artifact.
    pub fn put_const(&self, encoding: Encoding, bytes: &[u8]) -> Result<Artifact> {
        put_const(self.store.as_ref(), encoding, bytes)
    }

    /// Promote a bare value to a JSON const artifact.
    pub fn put_json<T: Serialize>(&self, value: &T) -> Result<Artifact> {
        let bytes = serde_json::to_vec(value)?;
        put_const(self.store.as_ref(), Encoding::Json, &bytes)
    }

    pub fn put_shell(
        &self,
        commands: &[&str],
        inputs: &[(&str, Artifact)],
        outputs: &[&str],
    ) -> Result<ShellOutput> {
        let out = build_shell(&self.store, commands, inputs, outputs, None, &self.options)?;
        self.record(out.op());
        Ok(out)
    }

    pub fn put_callable(
        &self,
        name: &str,
        inputs: &[(&str, Artifact)],
        outputs: &[(&str, Encoding)],
        strict: bool,
    ) -> Result<Vec<Artifact>> {
        let (record, arts) = build_callable(
            &self.store,
            FunsieKind::Callable,
            name,
            inputs,
            outputs,
            strict,
            None,
            &self.options,
        )?;
        self.record(record.hash);
        Ok(arts)
    }

    pub fn put_subdag(
        &self,
        generator: &str,
        inputs: &[(&str, Artifact)],
        outputs: &[(&str, Encoding)],
        strict: bool,
    ) -> Result<Vec<Artifact>> {
        let (record, arts) = build_callable(
            &self.store,
            FunsieKind::Subdag,
            generator,
            inputs,
            outputs,
            strict,
            None,
            &self.options,
        )?;
        self.record(record.hash);
        Ok(arts)
    }

    fn record(&self, op: Digest) {
        self.created.lock().expect("scope lock poisoned").push(op);
    }

    pub(crate) fn created(&self) -> Vec<Digest> {
        self.created.lock().expect("scope lock poisoned").clone()
    }
}

/// Execute a subdag generator and turn its answer into slot outcomes.
///
/// Returns the outcomes plus the operations the generator created (for the
/// link table). Any arity mismatch between the generator's answer and the
/// declared output slots fails *all* outputs with `SubdagArity`.
pub(crate) async fn run_subdag(
    store: &SharedStore,
    registry: &Arc<CallableRegistry>,
    op: &OperationRecord,
    funsie: &Funsie,
    inputs: CallableInputs,
    options: &OpOptions,
) -> Result<(BTreeMap<String, SlotOutcome>, Vec<Digest>)> {
    let FunsieSpec::Subdag { generator } = &funsie.spec else {
        unreachable!("run_subdag dispatched on a non-subdag funsie");
    };

    let Some(body) = registry.generator(generator) else {
        warn!(op = %op.hash.short(), %generator, "generator not registered on this worker");
        let record = ErrorRecord::new(
            ErrorKind::CallableRaised,
            Some(op.hash),
            format!("no generator registered under name '{generator}'"),
        );
        return Ok((error_outcomes(funsie, record), Vec::new()));
    };

    info!(op = %op.hash.short(), %generator, "running sub-DAG generator");
    let scope = SubdagScope::new(store.clone(), options.clone());
    let scope_handle = scope.clone();
    let joined =
        tokio::task::spawn_blocking(move || body(&scope_handle, inputs)).await;

    let answer = match joined {
        Err(join_err) => {
            let record = ErrorRecord::new(
                ErrorKind::CallableRaised,
                Some(op.hash),
                format!("generator '{generator}' panicked: {join_err}"),
            );
            return Ok((error_outcomes(funsie, record), scope.created()));
        }
        Ok(Err(e)) => {
            let record = ErrorRecord::new(
                ErrorKind::CallableRaised,
                Some(op.hash),
                format!("generator '{generator}' failed: {e:#}"),
            );
            return Ok((error_outcomes(funsie, record), scope.created()));
        }
        Ok(Ok(answer)) => answer,
    };

    let generated = scope.created();

    if let Some(problem) = arity_problem(funsie, &answer) {
        warn!(op = %op.hash.short(), %generator, %problem, "generator output arity mismatch");
        let record = ErrorRecord::new(ErrorKind::SubdagArity, Some(op.hash), problem);
        return Ok((error_outcomes(funsie, record), generated));
    }

    let outcomes = funsie
        .outputs
        .iter()
        .map(|slot| {
            let art = answer[&slot.name];
            (slot.name.clone(), SlotOutcome::Link(art.hash))
        })
        .collect();

    info!(
        op = %op.hash.short(),
        generated = generated.len(),
        "sub-DAG attached"
    );
    Ok((outcomes, generated))
}

fn arity_problem(funsie: &Funsie, answer: &BTreeMap<String, Artifact>) -> Option<String> {
    for slot in &funsie.outputs {
        match answer.get(&slot.name) {
            None => return Some(format!("generator did not return output slot '{}'", slot.name)),
            Some(art) if art.encoding != slot.encoding => {
                return Some(format!(
                    "generator returned slot '{}' with encoding {:?}, declared {:?}",
                    slot.name, art.encoding, slot.encoding
                ));
            }
            Some(_) => {}
        }
    }
    for name in answer.keys() {
        if funsie.output(name).is_none() {
            return Some(format!("generator returned undeclared output slot '{name}'"));
        }
    }
    None
}

pub(crate) fn error_outcomes(
    funsie: &Funsie,
    record: ErrorRecord,
) -> BTreeMap<String, SlotOutcome> {
    funsie
        .outputs
        .iter()
        .map(|slot| (slot.name.clone(), SlotOutcome::Error(record.clone())))
        .collect()
}
