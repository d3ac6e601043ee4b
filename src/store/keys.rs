// src/store/keys.rs

//! Names of everything in the key/value store.
//!
//! Key names derive from entity digests only, so two workers creating the
//! same operation always touch the same keys.

use crate::hashing::Digest;

/// Schema version tag. Bumped whenever the canonical hash form or the key
/// layout changes; stores written by another version are refused.
pub const VERSION_KEY: &str = "meta:version";
pub const SCHEMA_VERSION: &str = "2";

/// Counter key bumped by `publish` on backends without real pub/sub.
pub const PULSE_KEY: &str = "meta:pulse";

/// Channel that workers publish on whenever statuses change.
pub const WAKE_CHANNEL: &str = "wake";

/// Set of operation digests currently claimed by a worker.
pub const RUNNING_SET: &str = "running";

/// Global drain flag; every worker exits after its current operation.
pub const DRAIN_ALL: &str = "control:drain:all";

pub fn funsie(h: &Digest) -> String {
    format!("funsie:{h}")
}

pub fn op(h: &Digest) -> String {
    format!("op:{h}")
}

pub fn op_status(h: &Digest) -> String {
    format!("op:status:{h}")
}

pub fn op_options(h: &Digest) -> String {
    format!("op:options:{h}")
}

/// Set of artifact digests this operation consumes.
pub fn op_deps(h: &Digest) -> String {
    format!("op:deps:{h}")
}

/// Set of operation digests that consume at least one output of this one.
pub fn op_children(h: &Digest) -> String {
    format!("op:children:{h}")
}

/// Link table for dynamic sub-DAGs: operations generated by this one.
pub fn op_subdag(h: &Digest) -> String {
    format!("op:subdag:{h}")
}

pub fn op_heartbeat(h: &Digest) -> String {
    format!("op:heartbeat:{h}")
}

pub fn art(h: &Digest) -> String {
    format!("art:{h}")
}

pub fn art_data(h: &Digest) -> String {
    format!("art:data:{h}")
}

pub fn art_status(h: &Digest) -> String {
    format!("art:status:{h}")
}

pub fn art_err(h: &Digest) -> String {
    format!("art:err:{h}")
}

/// Digest of the operation that produces this artifact; absent for const.
pub fn art_prod(h: &Digest) -> String {
    format!("art:prod:{h}")
}

/// Redirect target for deduplicated (`linked`) artifacts.
pub fn art_link(h: &Digest) -> String {
    format!("art:link:{h}")
}

/// Content-dedup index: content digest (hex) to owning artifact digest.
pub fn data_index(content_hex: &str) -> String {
    format!("data:index:{content_hex}")
}

pub fn queue(name: &str) -> String {
    format!("queue:{name}")
}

pub fn queue_members(name: &str) -> String {
    format!("queue:{name}:members")
}

pub fn drain(queue: &str) -> String {
    format!("control:drain:{queue}")
}

/// Short-hash index entry. The value is a one-byte tag: `a`rtifact,
/// `o`peration or `f`unsie.
pub fn idx(h: &Digest) -> String {
    format!("idx:{h}")
}

pub const IDX_PREFIX: &str = "idx:";
