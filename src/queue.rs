// src/queue.rs

//! In-store job queue.
//!
//! A queue is a store list plus a member set. The set makes enqueuing
//! idempotent (keyed by operation hash), the list gives FIFO claiming, and
//! claiming doubles as the `Pending -> Running` compare-and-set: the claim
//! and the status transition happen in one transaction, so of two workers
//! contending for the same operation exactly one wins.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::graph::{op_status_in, set_op_status_in, OpOptions, OpStatus};
use crate::hashing::Digest;
use crate::store::{keys, SharedStore, Signal, Txn};

#[derive(Clone)]
pub struct JobQueue {
    store: SharedStore,
    name: String,
}

impl JobQueue {
    pub fn new(store: SharedStore, name: impl Into<String>) -> Self {
        JobQueue {
            store,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue an operation. Idempotent: an operation already sitting in the
    /// queue is not enqueued twice. Returns `true` if the entry was new.
    pub fn enqueue(&self, op: Digest) -> Result<bool> {
        let mut fresh = false;
        let mut depth = 0;
        self.store.atomically(&mut |t| {
            fresh = false;
            if t.sadd(&keys::queue_members(&self.name), &op.to_hex()) {
                t.rpush(&keys::queue(&self.name), op.to_hex());
                fresh = true;
            }
            depth = t.llen(&keys::queue(&self.name));
            Ok(())
        })?;
        if fresh {
            debug!(op = %op.short(), queue = %self.name, depth, "enqueued operation");
            self.store.publish(&keys::queue(&self.name));
        }
        Ok(fresh)
    }

    /// Pop and claim the next runnable operation.
    ///
    /// Popping and the `Pending -> Running` transition are one atomic step;
    /// entries whose status is no longer `Pending` (claimed elsewhere,
    /// already finished) are dropped silently.
    pub fn claim(&self) -> Result<Option<Digest>> {
        loop {
            let mut popped: Option<Digest> = None;
            let mut claimed = false;
            self.store.atomically(&mut |t| {
                popped = None;
                claimed = false;
                let Some(entry) = t.lpop(&keys::queue(&self.name)) else {
                    return Ok(());
                };
                t.srem(&keys::queue_members(&self.name), &entry);
                let Ok(op) = Digest::from_hex(&entry) else {
                    warn!(%entry, "dropping malformed queue entry");
                    return Ok(());
                };
                popped = Some(op);
                if op_status_in(t, &op) == Some(OpStatus::Pending) {
                    set_op_status_in(t, &op, OpStatus::Running);
                    t.sadd(keys::RUNNING_SET, &entry);
                    t.set(&keys::op_heartbeat(&op), now_secs().to_string().into_bytes());
                    claimed = true;
                }
                Ok(())
            })?;

            match (popped, claimed) {
                (None, _) => return Ok(None),
                (Some(op), true) => {
                    debug!(op = %op.short(), queue = %self.name, "claimed operation");
                    return Ok(Some(op));
                }
                (Some(op), false) => {
                    // Lost the race or the operation is already terminal;
                    // keep draining.
                    debug!(op = %op.short(), "dropping stale queue entry");
                }
            }
        }
    }

    /// Refresh the heartbeat of a claimed operation.
    pub fn heartbeat(&self, op: Digest) -> Result<()> {
        self.store.atomically(&mut |t| {
            t.set(&keys::op_heartbeat(&op), now_secs().to_string().into_bytes());
            Ok(())
        })
    }

    /// Release a claimed operation after it finished: drop it from the
    /// running set and clear its heartbeat. Called from inside the commit
    /// transaction of the runtime.
    pub(crate) fn release_in(t: &mut dyn Txn, op: &Digest) {
        t.srem(keys::RUNNING_SET, &op.to_hex());
        t.del(&keys::op_heartbeat(op));
    }

    /// Transaction-level enqueue, for use inside a wider commit. The caller
    /// is responsible for publishing on the queue channel afterwards.
    pub(crate) fn enqueue_in(t: &mut dyn Txn, queue: &str, op: &Digest) -> bool {
        if t.sadd(&keys::queue_members(queue), &op.to_hex()) {
            t.rpush(&keys::queue(queue), op.to_hex());
            true
        } else {
            false
        }
    }

    /// Scan for operations whose worker stopped heartbeating and hand them
    /// back. Returns the reclaimed operations.
    ///
    /// The running set is global, so any idle worker can heal any claim —
    /// but each reclaimed operation goes back to its *own* `OpOptions`
    /// queue, not the scanning worker's, or it would land in front of the
    /// wrong pool.
    pub fn reclaim_stale(&self, threshold: Duration) -> Result<Vec<Digest>> {
        let now = now_secs();
        let mut reclaimed: Vec<(Digest, String)> = Vec::new();
        self.store.atomically(&mut |t| {
            reclaimed.clear();
            for entry in t.smembers(keys::RUNNING_SET) {
                let Ok(op) = Digest::from_hex(&entry) else {
                    continue;
                };
                let beat = t
                    .get(&keys::op_heartbeat(&op))
                    .and_then(|raw| String::from_utf8(raw).ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(0);
                if now.saturating_sub(beat) < threshold.as_secs() {
                    continue;
                }
                if op_status_in(t, &op) != Some(OpStatus::Running) {
                    t.srem(keys::RUNNING_SET, &entry);
                    continue;
                }
                set_op_status_in(t, &op, OpStatus::Pending);
                t.srem(keys::RUNNING_SET, &entry);
                t.del(&keys::op_heartbeat(&op));
                let op_queue = t
                    .get(&keys::op_options(&op))
                    .and_then(|raw| serde_json::from_slice::<OpOptions>(&raw).ok())
                    .map(|o| o.queue)
                    .unwrap_or_else(|| OpOptions::default().queue);
                JobQueue::enqueue_in(t, &op_queue, &op);
                reclaimed.push((op, op_queue));
            }
            Ok(())
        })?;

        let mut queues: Vec<&str> = Vec::new();
        for (op, queue) in &reclaimed {
            info!(op = %op.short(), queue = %queue, "reclaimed stale operation");
            queues.push(queue.as_str());
        }
        queues.sort_unstable();
        queues.dedup();
        for queue in queues {
            self.store.publish(&keys::queue(queue));
        }
        Ok(reclaimed.into_iter().map(|(op, _)| op).collect())
    }

    /// Subscription handle for "something was enqueued here".
    pub fn signal(&self) -> Signal {
        self.store.watch(&keys::queue(&self.name))
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
