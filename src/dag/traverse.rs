// src/dag/traverse.rs

//! Reverse-BFS readiness pass over the provenance graph.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::errors::Result;
use crate::graph::{
    get_op, get_op_status, get_options, resolved_status, ArtifactStatus, OpStatus,
};
use crate::hashing::Digest;
use crate::queue::JobQueue;
use crate::store::SharedStore;

/// Walk the graph backwards from `targets` and enqueue every `Pending`
/// operation whose inputs are all terminal.
///
/// The pass is idempotent and cheap to repeat: enqueuing is deduplicated by
/// operation hash, terminal branches are skipped, and `Running` operations
/// are left to their workers. Re-running the pass after a sub-DAG operation
/// completes is what discovers the freshly attached operations.
///
/// Operations with errored inputs are enqueued like any other ready
/// operation; the worker short-circuits them so that the error propagates
/// with its origin preserved.
pub fn schedule_pass(store: &SharedStore, targets: &[Digest]) -> Result<usize> {
    let mut frontier: Vec<Digest> = targets.to_vec();
    let mut seen_arts: HashSet<Digest> = HashSet::new();
    let mut seen_ops: HashSet<Digest> = HashSet::new();
    let mut enqueued = 0;

    while let Some(art) = frontier.pop() {
        if !seen_arts.insert(art) {
            continue;
        }
        if resolved_status(store.as_ref(), &art)?.is_terminal() {
            continue;
        }

        let Some(producer) = producer_of(store, &art)? else {
            // An unresolved artifact without a producer cannot make
            // progress; surface it in the logs instead of spinning.
            warn!(artifact = %art.short(), "unresolved artifact has no producing operation");
            continue;
        };
        if !seen_ops.insert(producer) {
            continue;
        }

        match get_op_status(store.as_ref(), &producer)? {
            Some(OpStatus::Done) | Some(OpStatus::Error) => {
                // Commit is atomic, so terminal operations come with
                // terminal outputs; nothing to do here.
                continue;
            }
            Some(OpStatus::Running) => {
                debug!(op = %producer.short(), "operation already running");
                continue;
            }
            Some(OpStatus::Pending) | None => {}
        }

        let op = get_op(store.as_ref(), &producer)?;
        let mut ready = true;
        for input in op.inputs.values() {
            let status = resolved_status(store.as_ref(), input)?;
            if !status.is_terminal() {
                ready = false;
                frontier.push(*input);
            }
        }

        if ready {
            let options = get_options(store.as_ref(), &producer)?;
            let queue = JobQueue::new(store.clone(), options.queue);
            if queue.enqueue(producer)? {
                enqueued += 1;
            }
        }
    }

    Ok(enqueued)
}

/// Whether every target artifact has reached a terminal status.
pub fn targets_terminal(store: &SharedStore, targets: &[Digest]) -> Result<bool> {
    for target in targets {
        let status = resolved_status(store.as_ref(), target)?;
        if !matches!(status, ArtifactStatus::Ready | ArtifactStatus::Error) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn producer_of(store: &SharedStore, art: &Digest) -> Result<Option<Digest>> {
    let mut producer = None;
    store.atomically(&mut |t| {
        let target = crate::graph::resolve_link_in(t, art);
        producer = crate::graph::producer_in(t, &target);
        Ok(())
    })?;
    Ok(producer)
}
