// src/exec/callable.rs

//! The callable registry.
//!
//! Workflows never store code. A callable funsie carries only a stable,
//! user-assigned name (which participates in the funsie hash); the body is
//! resolved on the worker through this registry. That decoupling is what
//! lets a cache hit cross machines: two workers with the same registered
//! name agree on identity without agreeing on a function pointer.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::graph::{
    encode, Artifact, ErrorKind, ErrorRecord, Funsie, FunsieSpec, OperationRecord, Value,
    ValueResult,
};

use super::runner::SlotOutcome;
use super::subdag::{error_outcomes, SubdagScope};

/// Decoded inputs as handed to a callable, keyed by slot name.
///
/// Strict callables only ever see the `Ok` arm; non-strict ones receive
/// upstream failures as `Err` and may recover.
pub type CallableInputs = BTreeMap<String, ValueResult>;

/// Values produced by a callable, keyed by output slot name.
pub type CallableOutputs = BTreeMap<String, Value>;

/// An in-process pure function.
pub type CallableFn = dyn Fn(CallableInputs) -> anyhow::Result<CallableOutputs> + Send + Sync;

/// A sub-DAG generator: instead of producing values it builds new
/// operations through the scope and returns which of their outputs stand in
/// for its own declared outputs.
pub type GeneratorFn =
    dyn Fn(&SubdagScope, CallableInputs) -> anyhow::Result<BTreeMap<String, Artifact>> + Send + Sync;

/// Process-local registry mapping stable names to executable bodies.
#[derive(Default)]
pub struct CallableRegistry {
    callables: RwLock<HashMap<String, Arc<CallableFn>>>,
    generators: RwLock<HashMap<String, Arc<GeneratorFn>>>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callable under a stable name. Re-registering a name
    /// replaces the body (the identity is the name, not the code).
    pub fn register<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(CallableInputs) -> anyhow::Result<CallableOutputs> + Send + Sync + 'static,
    {
        self.callables
            .write()
            .expect("registry lock poisoned")
            .insert(name.into(), Arc::new(f));
    }

    /// Register a sub-DAG generator under a stable name.
    pub fn register_generator<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&SubdagScope, CallableInputs) -> anyhow::Result<BTreeMap<String, Artifact>>
            + Send
            + Sync
            + 'static,
    {
        self.generators
            .write()
            .expect("registry lock poisoned")
            .insert(name.into(), Arc::new(f));
    }

    pub fn callable(&self, name: &str) -> Option<Arc<CallableFn>> {
        self.callables
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn generator(&self, name: &str) -> Option<Arc<GeneratorFn>> {
        self.generators
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
    }
}

/// Execute a callable funsie over decoded inputs and turn the result into
/// per-slot outcomes.
///
/// The body runs on the blocking pool — user code is free to burn CPU. A
/// missing declared output becomes `MissingOutput` for that slot only;
/// undeclared extras are dropped with a warning; a returned error or a panic
/// fails every output with `CallableRaised`.
pub(crate) async fn run_callable(
    registry: &Arc<CallableRegistry>,
    op: &OperationRecord,
    funsie: &Funsie,
    inputs: CallableInputs,
) -> BTreeMap<String, SlotOutcome> {
    let FunsieSpec::Callable { name } = &funsie.spec else {
        unreachable!("run_callable dispatched on a non-callable funsie");
    };

    let Some(body) = registry.callable(name) else {
        warn!(op = %op.hash.short(), %name, "callable not registered on this worker");
        let record = ErrorRecord::new(
            ErrorKind::CallableRaised,
            Some(op.hash),
            format!("no callable registered under name '{name}'"),
        );
        return error_outcomes(funsie, record);
    };

    info!(op = %op.hash.short(), %name, "running callable");
    let joined = tokio::task::spawn_blocking(move || body(inputs)).await;

    let values = match joined {
        Err(join_err) => {
            let record = ErrorRecord::new(
                ErrorKind::CallableRaised,
                Some(op.hash),
                format!("callable '{name}' panicked: {join_err}"),
            );
            return error_outcomes(funsie, record);
        }
        Ok(Err(e)) => {
            let record = ErrorRecord::new(
                ErrorKind::CallableRaised,
                Some(op.hash),
                format!("callable '{name}' failed: {e:#}"),
            );
            return error_outcomes(funsie, record);
        }
        Ok(Ok(values)) => values,
    };

    for extra in values.keys() {
        if funsie.output(extra).is_none() {
            warn!(op = %op.hash.short(), slot = %extra, "dropping undeclared output slot");
        }
    }

    funsie
        .outputs
        .iter()
        .map(|slot| {
            let outcome = match values.get(&slot.name) {
                Some(value) => match encode(slot.encoding, value, Some(op.hash)) {
                    Ok(bytes) => SlotOutcome::Bytes(bytes),
                    Err(record) => SlotOutcome::Error(record),
                },
                None => SlotOutcome::Error(ErrorRecord::new(
                    ErrorKind::MissingOutput,
                    Some(op.hash),
                    format!("callable '{name}' did not return output '{}'", slot.name),
                )),
            };
            (slot.name.clone(), outcome)
        })
        .collect()
}
