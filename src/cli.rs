// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `hashdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "hashdag",
    version,
    about = "Content-addressed DAG workflows over a shared key/value store.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Hashdag.toml` in the current working directory. A missing
    /// file means built-in defaults.
    #[arg(long, value_name = "PATH", default_value = "Hashdag.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `HASHDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run one worker against the configured store.
    ///
    /// Exits 0 on clean shutdown (drain or SIGTERM), nonzero on a fatal
    /// store failure.
    Worker {
        /// Queue to claim operations from (overrides the config file).
        #[arg(long, value_name = "NAME")]
        queue: Option<String>,
    },

    /// Enqueue the DAGs behind the given hashes and wait for them.
    ///
    /// Exits 0 if every target ends ready, 1 if any ends in error. Hashes
    /// may be unambiguous prefixes (at least 4 hex characters).
    Execute {
        #[arg(value_name = "HASH", required = true)]
        hashes: Vec<String>,
    },

    /// Print the bytes of a ready artifact to stdout.
    ///
    /// Exits 0 on success, 1 if the artifact is in error, 2 if it cannot be
    /// found (or holds no data yet).
    Cat {
        #[arg(value_name = "HASH")]
        hash: String,
    },

    /// Ask workers to finish their current operation and exit.
    Shutdown {
        /// Drain every queue, not just the configured one.
        #[arg(long)]
        all: bool,
    },

    /// Emit the full provenance graph as DOT on stdout.
    Graph,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
