// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The effective filter is resolved in this order:
//! 1. `--log-level` CLI flag (applies to the whole crate)
//! 2. `HASHDAG_LOG` environment variable, which accepts full `EnvFilter`
//!    directives (e.g. `info,hashdag::exec=debug`)
//! 3. default to `info`
//!
//! Logs go to STDERR so that `cat` can pipe artifact bytes cleanly through
//! stdout.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::cli::LogLevel;

/// Initialise the global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(level_directive(level)),
        None => EnvFilter::try_from_env("HASHDAG_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn level_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
