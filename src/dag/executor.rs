// src/dag/executor.rs

//! Target-driven execution: schedule what is ready, wait for the rest.

use std::time::Duration;

use tracing::{debug, info};

use crate::errors::Result;
use crate::hashing::Digest;
use crate::store::{keys, SharedStore};

use super::traverse::{schedule_pass, targets_terminal};

/// Submit everything needed to produce `targets` and block until every
/// target is terminal (`Ready` or `Error` — errors do not cut the wait
/// short, sibling branches run to completion either way).
///
/// The loop subscribes to the wake channel *before* the first readiness
/// pass, so a completion landing between "check" and "wait" is never lost;
/// `poll` bounds the wait anyway, because a worker on a polling store
/// backend has no channel to publish on.
pub async fn execute(store: &SharedStore, targets: &[Digest], poll: Duration) -> Result<()> {
    // Waiting on something that is not an artifact would never end.
    for target in targets {
        crate::graph::get_record(store.as_ref(), target)?;
    }

    let mut signal = store.watch(keys::WAKE_CHANNEL);
    info!(targets = targets.len(), "starting DAG execution");

    loop {
        let enqueued = schedule_pass(store, targets)?;
        if enqueued > 0 {
            debug!(enqueued, "readiness pass enqueued operations");
        }

        if targets_terminal(store, targets)? {
            info!("all targets terminal");
            return Ok(());
        }

        signal.wait(poll).await;
    }
}
