// src/worker.rs

//! The worker: claim, run, repeat.
//!
//! Workers are stateless. Each one long-polls its queue, claims one
//! operation at a time, runs it through the [`Runner`](crate::exec::Runner)
//! and goes back for more. Coordination happens entirely through the store:
//! claims are compare-and-set status transitions, liveness is a heartbeat
//! key, and crashed workers are healed by the stale-claim reclaim scan that
//! every worker performs while idle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::errors::Result;
use crate::exec::{CallableRegistry, RunStatus, Runner};
use crate::hashing::Digest;
use crate::queue::JobQueue;
use crate::store::{keys, SharedStore, StoreExt};

/// Worker tuning knobs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue: String,
    /// How often a running operation refreshes its heartbeat.
    pub heartbeat: Duration,
    /// Claims whose heartbeat is older than this are handed back.
    pub reclaim_after: Duration,
    /// Where scratch directories for shell operations live.
    pub scratch_root: PathBuf,
    /// Upper bound on one idle wait for work.
    pub idle_poll: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            queue: "default".to_string(),
            heartbeat: Duration::from_secs(15),
            reclaim_after: Duration::from_secs(15 * 60),
            scratch_root: std::env::temp_dir().join("hashdag"),
            idle_poll: Duration::from_secs(1),
        }
    }
}

/// Counters shared with tests and diagnostics.
#[derive(Default)]
pub struct WorkerStats {
    /// Operations whose body actually ran (cache hits excluded).
    pub executed: AtomicU64,
    /// Claims resolved from cache.
    pub cached: AtomicU64,
}

pub struct Worker {
    store: SharedStore,
    queue: JobQueue,
    runner: Runner,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        store: SharedStore,
        registry: Arc<CallableRegistry>,
        config: WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let queue = JobQueue::new(store.clone(), config.queue.clone());
        let runner = Runner::new(store.clone(), registry, config.scratch_root.clone());
        Worker {
            store,
            queue,
            runner,
            config,
            stats: Arc::new(WorkerStats::default()),
            shutdown,
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Run until shutdown is requested or a drain flag is raised.
    ///
    /// Draining is graceful: the current operation finishes and publishes
    /// its result before the loop exits.
    pub async fn run(mut self) -> Result<()> {
        info!(queue = %self.config.queue, "worker started");
        let mut signal = self.queue.signal();

        loop {
            if *self.shutdown.borrow() {
                info!("worker shutting down (signal)");
                break;
            }
            if self.drain_requested()? {
                info!("worker shutting down (drain flag)");
                break;
            }

            match self.queue.claim()? {
                Some(op) => {
                    self.run_claimed(op).await?;
                }
                None => {
                    // Idle: heal crashed claims, then wait for work.
                    let reclaimed = self.queue.reclaim_stale(self.config.reclaim_after)?;
                    if !reclaimed.is_empty() {
                        continue;
                    }
                    tokio::select! {
                        _ = signal.wait(self.config.idle_poll) => {}
                        _ = self.shutdown.changed() => {}
                    }
                }
            }
        }

        info!(
            executed = self.stats.executed.load(Ordering::Relaxed),
            cached = self.stats.cached.load(Ordering::Relaxed),
            "worker exiting"
        );
        Ok(())
    }

    async fn run_claimed(&self, op: Digest) -> Result<()> {
        debug!(op = %op.short(), "worker picked up operation");

        // Keep the claim alive while the body runs.
        let beat_queue = self.queue.clone();
        let beat_every = self.config.heartbeat;
        let beat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(beat_every);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                if let Err(e) = beat_queue.heartbeat(op) {
                    warn!(op = %op.short(), error = %e, "heartbeat failed");
                }
            }
        });

        let result = self.runner.run_op(op).await;
        beat.abort();

        match result {
            Ok(RunStatus::Executed) | Ok(RunStatus::ShortCircuited) => {
                self.stats.executed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(RunStatus::Cached) => {
                self.stats.cached.fetch_add(1, Ordering::Relaxed);
            }
            Ok(RunStatus::NotReady) => {}
            Err(e) => {
                // Store trouble: leave the claim for reclaim and surface the
                // error to the caller (a worker process treats this as
                // fatal).
                error!(op = %op.short(), error = %e, "operation run failed");
                return Err(e);
            }
        }
        Ok(())
    }

    fn drain_requested(&self) -> Result<bool> {
        if self.store.get(keys::DRAIN_ALL)?.is_some() {
            return Ok(true);
        }
        Ok(self
            .store
            .get(&keys::drain(&self.config.queue))?
            .is_some())
    }
}

/// Clear drain flags so that freshly started workers stay up.
pub fn reset_drain(store: &SharedStore, queue: &str) -> Result<()> {
    store.atomically(&mut |t| {
        t.del(keys::DRAIN_ALL);
        t.del(&keys::drain(queue));
        Ok(())
    })
}

/// Raise a drain flag: all workers (or those on `queue`) finish their
/// current operation and exit.
pub fn request_drain(store: &SharedStore, queue: Option<&str>) -> Result<()> {
    store.atomically(&mut |t| {
        match queue {
            Some(q) => t.set(&keys::drain(q), b"1".to_vec()),
            None => t.set(keys::DRAIN_ALL, b"1".to_vec()),
        }
        Ok(())
    })?;
    // Wake idle workers so they notice promptly.
    match queue {
        Some(q) => store.publish(&keys::queue(q)),
        None => store.publish(keys::WAKE_CHANNEL),
    }
    Ok(())
}
