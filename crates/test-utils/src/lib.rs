// crates/test-utils/src/lib.rs

//! Shared helpers for hashdag integration tests.

pub mod registry;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Once};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use hashdag::api::Session;
use hashdag::exec::CallableRegistry;
use hashdag::store::{MemoryStore, SharedStore};
use hashdag::worker::{Worker, WorkerConfig, WorkerStats};

static INIT: Once = Once::new();

/// Initialise tracing once for the whole test binary. Controlled with
/// `HASHDAG_LOG` / `RUST_LOG`-style filters via `tracing-subscriber`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_env("HASHDAG_LOG")
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .try_init();
    });
}

pub fn memory_store() -> SharedStore {
    Arc::new(MemoryStore::new())
}

/// A session over a fresh in-memory store with the standard test registry.
pub fn test_session() -> Session {
    session_on(memory_store())
}

pub fn session_on(store: SharedStore) -> Session {
    let registry = Arc::new(CallableRegistry::new());
    registry::register_standard(&registry);
    Session::open(store, registry)
        .expect("opening a session on a fresh store")
        .with_poll_interval(Duration::from_millis(50))
}

/// Worker config tuned for fast tests.
pub fn fast_worker_config(queue: &str) -> WorkerConfig {
    WorkerConfig {
        queue: queue.to_string(),
        heartbeat: Duration::from_millis(200),
        reclaim_after: Duration::from_secs(60),
        scratch_root: std::env::temp_dir().join("hashdag-tests"),
        idle_poll: Duration::from_millis(50),
    }
}

/// A handful of in-process workers over one store, with pooled stats.
pub struct WorkerFleet {
    handles: Vec<JoinHandle<()>>,
    stats: Vec<Arc<WorkerStats>>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerFleet {
    /// Spawn `n` workers sharing `session`'s store and registry, claiming
    /// from the default queue.
    pub fn spawn(session: &Session, n: usize) -> Self {
        Self::spawn_with(session, n, fast_worker_config("default"))
    }

    pub fn spawn_with(session: &Session, n: usize, config: WorkerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();
        let mut stats = Vec::new();

        for _ in 0..n {
            let worker = Worker::new(
                session.store().clone(),
                session.registry().clone(),
                config.clone(),
                shutdown_rx.clone(),
            );
            stats.push(worker.stats());
            handles.push(tokio::spawn(async move {
                if let Err(e) = worker.run().await {
                    panic!("worker failed: {e}");
                }
            }));
        }

        WorkerFleet {
            handles,
            stats,
            shutdown_tx,
        }
    }

    /// Total operations whose body actually ran across the fleet.
    pub fn executed(&self) -> u64 {
        self.stats
            .iter()
            .map(|s| s.executed.load(Ordering::Relaxed))
            .sum()
    }

    /// Total cache-hit claims across the fleet.
    pub fn cached(&self) -> u64 {
        self.stats
            .iter()
            .map(|s| s.cached.load(Ordering::Relaxed))
            .sum()
    }

    /// Stop all workers and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
