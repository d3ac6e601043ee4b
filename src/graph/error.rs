// src/graph/error.rs

//! Errors as values.
//!
//! A failed operation does not unwind anything: it stores an [`ErrorRecord`]
//! under its output artifacts and the record flows along the DAG like data.
//! Strict downstream operations short-circuit on it; non-strict ones receive
//! it as the `Err` arm of a [`ValueResult`] and may recover.

use serde::{Deserialize, Serialize};

use crate::hashing::Digest;

use super::value::Value;

/// Kinds of data-level errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// A shell operation finished but did not produce a declared output file.
    MissingOutput,
    /// A shell command exited with a nonzero code.
    NonzeroExit,
    /// The operation exceeded its declared wall-clock timeout.
    Timeout,
    /// A user callable returned an error or panicked.
    CallableRaised,
    /// Input bytes did not match the slot's declared encoding.
    DecodeError,
    /// A strict operation consumed an input that was itself in error.
    Upstream,
    /// A sub-DAG generator returned outputs that do not match the declared
    /// output slots.
    SubdagArity,
    /// No data for this artifact (yet).
    NotFound,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::MissingOutput => "missing-output",
            ErrorKind::NonzeroExit => "nonzero-exit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CallableRaised => "callable-raised",
            ErrorKind::DecodeError => "decode-error",
            ErrorKind::Upstream => "upstream",
            ErrorKind::SubdagArity => "subdag-arity",
            ErrorKind::NotFound => "not-found",
        };
        f.write_str(s)
    }
}

/// The error value stored under an errored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    /// The operation where the failure originated. Preserved across
    /// propagation, so a long chain of `Upstream` errors still names the
    /// operation that actually failed.
    pub origin: Option<Digest>,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, origin: Option<Digest>, message: impl Into<String>) -> Self {
        ErrorRecord {
            kind,
            origin,
            message: message.into(),
        }
    }
}

/// What a non-strict callable sees per input slot.
pub type ValueResult = std::result::Result<Value, ErrorRecord>;
