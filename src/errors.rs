// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! These are *engine* errors: store trouble, broken invariants, bad
//! configuration. A failed operation is not an engine error — it is an
//! [`ErrorRecord`](crate::graph::ErrorRecord) value stored in the graph and
//! propagated along the DAG.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("store failure: {0}")]
    StoreFailure(String),

    #[error("hash collision: key {0} already holds different bytes")]
    HashCollision(String),

    #[error("unknown object: {0}")]
    UnknownObject(String),

    #[error("hash prefix '{0}' is too short (need at least 4 hex characters)")]
    PrefixTooShort(String),

    #[error("hash prefix '{prefix}' is ambiguous: {candidates:?}")]
    AmbiguousPrefix {
        prefix: String,
        candidates: Vec<String>,
    },

    #[error("store schema version is {found}, this build expects {expected}")]
    VersionMismatch { found: String, expected: String },

    #[error("cycle detected: operation {0} would consume its own output")]
    Cycle(String),

    #[error("input bindings do not match funsie slots: {0}")]
    SlotMismatch(String),

    #[error("record encoding error: {0}")]
    RecordError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, EngineError>;
