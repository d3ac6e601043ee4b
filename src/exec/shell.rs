// src/exec/shell.rs

//! Shell operation runner.
//!
//! Isolation contract: a shell operation sees nothing of the host
//! filesystem it did not receive as input. Every attempt gets a fresh
//! scratch directory; inputs are materialized there under their slot names,
//! commands run with it as their working directory, and whatever lands
//! outside it is discarded. The directory is removed on all exit paths via
//! the `TempDir` guard.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::graph::{ErrorKind, ErrorRecord, Funsie, FunsieSpec, OperationRecord};

use super::runner::SlotOutcome;

/// Name of the captured-stdout slot for command `i`.
pub fn stdout_slot(i: usize) -> String {
    format!("stdout{i}")
}

/// Name of the captured-stderr slot for command `i`.
pub fn stderr_slot(i: usize) -> String {
    format!("stderr{i}")
}

/// Run every command of a shell funsie in sequence inside one scratch
/// directory and collect per-slot outcomes.
///
/// - `stdout{i}` / `stderr{i}` of commands that ran are always `Ready`.
/// - The first nonzero exit stops the sequence: declared file outputs and
///   the auto slots of skipped commands become `NonzeroExit` errors.
/// - After a fully clean run, a declared file that is missing from the
///   scratch directory becomes a `MissingOutput` error.
pub(crate) async fn run_shell(
    op: &OperationRecord,
    funsie: &Funsie,
    inputs: &BTreeMap<String, Vec<u8>>,
    scratch_root: &Path,
) -> Result<BTreeMap<String, SlotOutcome>> {
    let FunsieSpec::Shell { commands } = &funsie.spec else {
        unreachable!("run_shell dispatched on a non-shell funsie");
    };

    std::fs::create_dir_all(scratch_root)?;
    let scratch = TempDir::with_prefix_in(format!("op-{}-", op.hash.short()), scratch_root)?;
    debug!(op = %op.hash.short(), dir = ?scratch.path(), "created scratch directory");

    for (slot, bytes) in inputs {
        std::fs::write(scratch.path().join(slot), bytes)?;
    }

    let mut outcomes = BTreeMap::new();
    let mut failed: Option<(usize, i32)> = None;

    for (i, command) in commands.iter().enumerate() {
        info!(op = %op.hash.short(), cmd = %command, "running command {i}");
        match run_command(scratch.path(), command).await {
            Ok(output) => {
                let code = output.status.code().unwrap_or(-1);
                outcomes.insert(stdout_slot(i), SlotOutcome::Bytes(output.stdout));
                outcomes.insert(stderr_slot(i), SlotOutcome::Bytes(output.stderr));
                if !output.status.success() {
                    warn!(
                        op = %op.hash.short(),
                        exit_code = code,
                        "command {i} exited nonzero; skipping the rest"
                    );
                    failed = Some((i, code));
                    break;
                }
            }
            Err(e) => {
                warn!(op = %op.hash.short(), error = %e, "command {i} failed to run");
                let record = ErrorRecord::new(
                    ErrorKind::NonzeroExit,
                    Some(op.hash),
                    format!("command {i} failed to run: {e}"),
                );
                outcomes.insert(stdout_slot(i), SlotOutcome::Error(record.clone()));
                outcomes.insert(stderr_slot(i), SlotOutcome::Error(record));
                failed = Some((i, -1));
                break;
            }
        }
    }

    // Auto slots of commands that never ran.
    if let Some((failed_at, code)) = failed {
        for i in (failed_at + 1)..commands.len() {
            let record = ErrorRecord::new(
                ErrorKind::NonzeroExit,
                Some(op.hash),
                format!("command {i} did not run: command {failed_at} exited with code {code}"),
            );
            outcomes.insert(stdout_slot(i), SlotOutcome::Error(record.clone()));
            outcomes.insert(stderr_slot(i), SlotOutcome::Error(record));
        }
    }

    // Declared file outputs: everything that is not an auto slot.
    for slot in &funsie.outputs {
        if outcomes.contains_key(&slot.name) {
            continue;
        }
        let outcome = match failed {
            Some((failed_at, code)) => SlotOutcome::Error(ErrorRecord::new(
                ErrorKind::NonzeroExit,
                Some(op.hash),
                format!("command {failed_at} exited with code {code}"),
            )),
            None => match std::fs::read(scratch.path().join(&slot.name)) {
                Ok(bytes) => SlotOutcome::Bytes(bytes),
                Err(_) => SlotOutcome::Error(ErrorRecord::new(
                    ErrorKind::MissingOutput,
                    Some(op.hash),
                    format!("expected output file '{}' was not produced", slot.name),
                )),
            },
        };
        outcomes.insert(slot.name.clone(), outcome);
    }

    Ok(outcomes)
}

async fn run_command(dir: &Path, command: &str) -> std::io::Result<std::process::Output> {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };

    cmd.current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd.output().await
}
