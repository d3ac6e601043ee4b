// src/lib.rs

pub mod api;
pub mod cli;
pub mod config;
pub mod dag;
pub mod errors;
pub mod exec;
pub mod graph;
pub mod graphviz;
pub mod hashing;
pub mod logging;
pub mod queue;
pub mod store;
pub mod worker;

use std::io::Write as _;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use crate::api::Session;
use crate::cli::{CliArgs, Command};
use crate::errors::Result;
use crate::exec::CallableRegistry;
use crate::graph::{ErrorKind, ErrorRecord};
use crate::worker::{request_drain, reset_drain, Worker};

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - config loading and store opening
/// - the selected subcommand (worker / execute / cat / shutdown / graph)
/// - Ctrl-C / SIGTERM handling for the worker loop
///
/// Note on callables: the stock binary ships with an empty registry, so it
/// can run shell operations only. Embedders that use callables build their
/// own worker binary around [`Worker`] with their registry filled in —
/// workflow identity references callables by name, the body always comes
/// from the process (see `exec::CallableRegistry`).
pub async fn run(args: CliArgs) -> Result<i32> {
    let cfg = config::load(&args.config)?;
    let store = config::open_store(&cfg)?;
    let registry = Arc::new(CallableRegistry::new());

    match args.command {
        Command::Worker { queue } => {
            let worker_cfg = config::worker_config(&cfg, queue.as_deref());
            reset_drain(&store, &worker_cfg.queue)?;

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            spawn_signal_handler(shutdown_tx);

            // Session::open validates the schema version before any claim.
            let _session = Session::open(store.clone(), registry.clone())?;
            let worker = Worker::new(store, registry, worker_cfg, shutdown_rx);
            worker.run().await?;
            Ok(0)
        }

        Command::Execute { hashes } => {
            let session = Session::open(store, registry)?;
            let mut targets = Vec::new();
            for hash in &hashes {
                let digest = session.resolve_prefix(hash)?;
                targets.extend(session.expand_target(&digest)?);
            }

            session.execute_hashes(&targets).await?;

            let mut all_ready = true;
            for target in &targets {
                let status = graph::resolved_status(session.store().as_ref(), target)?;
                if status != graph::ArtifactStatus::Ready {
                    all_ready = false;
                    error!(artifact = %target.short(), ?status, "target did not end ready");
                }
            }
            Ok(if all_ready { 0 } else { 1 })
        }

        Command::Cat { hash } => {
            let session = Session::open(store, registry)?;
            let digest = match session.resolve_prefix(&hash) {
                Ok(d) => d,
                Err(errors::EngineError::UnknownObject(_)) => return Ok(2),
                Err(e) => return Err(e),
            };
            let artifact = match session.artifact(&digest) {
                Ok(a) => a,
                Err(errors::EngineError::UnknownObject(_)) => return Ok(2),
                Err(e) => return Err(e),
            };
            match session.fetch_bytes(&artifact)? {
                Ok(bytes) => {
                    std::io::stdout().write_all(&bytes)?;
                    Ok(0)
                }
                Err(ErrorRecord {
                    kind: ErrorKind::NotFound,
                    ..
                }) => Ok(2),
                Err(record) => {
                    error!(
                        kind = %record.kind,
                        origin = ?record.origin,
                        message = %record.message,
                        "artifact is in error"
                    );
                    Ok(1)
                }
            }
        }

        Command::Shutdown { all } => {
            let queue = cfg.worker.queue.clone();
            request_drain(&store, if all { None } else { Some(&queue) })?;
            info!(all, "drain requested");
            Ok(0)
        }

        Command::Graph => {
            let dot = graphviz::provenance_dot(&store)?;
            println!("{dot}");
            Ok(0)
        }
    }
}

/// Ctrl-C (and SIGTERM on unix) flips the shutdown flag; workers finish
/// their current operation and exit.
fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("failed to install SIGTERM handler: {e}");
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = ctrl_c.await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
        }

        info!("shutdown signal received; draining");
        let _ = shutdown_tx.send(true);
    });
}
