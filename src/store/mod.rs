// src/store/mod.rs

//! Pluggable key/value store abstraction.
//!
//! The engine never talks to a concrete database; it talks to a [`Store`].
//! This keeps the graph layer portable across backends and makes it easy to
//! run the whole engine against an in-memory store in tests.
//!
//! - [`MemoryStore`] is the in-process reference implementation.
//! - [`FileStore`] keeps the whole map in a single JSON file guarded by a
//!   lock file, which is enough for single-machine multi-process use.
//!
//! A production deployment implements [`Store`] over its own KV product. The
//! contract is small: an atomic multi-key transaction, a handful of value
//! shapes (bytes, string sets, string lists), ordered prefix scans, and a
//! wake-up channel.

pub mod keys;

mod file;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::errors::Result;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Shared handle to a store backend.
pub type SharedStore = Arc<dyn Store>;

/// One atomic view of the store.
///
/// Everything done through a [`Txn`] commits together or not at all; a body
/// returning an error leaves the store untouched.
///
/// Each key holds exactly one value shape (bytes, set or list). Accessing a
/// key with the wrong shape reads as empty and is a programming error.
pub trait Txn {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&mut self, key: &str, value: Vec<u8>);
    /// Write-once helper: returns `false` (and leaves the value alone) if the
    /// key already exists.
    fn set_if_absent(&mut self, key: &str, value: Vec<u8>) -> bool;
    fn del(&mut self, key: &str);

    /// Add to a string set; returns `true` if the member was new.
    fn sadd(&mut self, key: &str, member: &str) -> bool;
    fn srem(&mut self, key: &str, member: &str) -> bool;
    fn smembers(&self, key: &str) -> Vec<String>;

    fn rpush(&mut self, key: &str, value: String);
    fn lpop(&mut self, key: &str) -> Option<String>;
    fn llen(&self, key: &str) -> usize;

    /// All keys starting with `prefix`, in ascending order.
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;
}

/// A transactional byte store with wake-up channels.
pub trait Store: Send + Sync {
    /// Run `body` against one atomic view of the store.
    ///
    /// Mutations commit only if the body returns `Ok`.
    fn atomically(&self, body: &mut dyn FnMut(&mut dyn Txn) -> Result<()>) -> Result<()>;

    /// Publish a wake-up on `channel`. Fire-and-forget.
    fn publish(&self, channel: &str);

    /// Subscribe to wake-ups on `channel`.
    fn watch(&self, channel: &str) -> Signal;
}

/// A wake-up subscription handle.
///
/// Backends with real pub/sub hand out a channel-backed signal; backends
/// without one (e.g. [`FileStore`]) fall back to a fixed polling interval.
/// Either way, [`Signal::wait`] returns when something *may* have changed;
/// callers re-check their condition in a loop.
pub struct Signal {
    inner: SignalInner,
}

enum SignalInner {
    Channel(watch::Receiver<u64>),
    Poll(Duration),
}

impl Signal {
    pub(crate) fn channel(rx: watch::Receiver<u64>) -> Self {
        Signal {
            inner: SignalInner::Channel(rx),
        }
    }

    pub(crate) fn poll(interval: Duration) -> Self {
        Signal {
            inner: SignalInner::Poll(interval),
        }
    }

    /// Wait until the next wake-up (or poll tick). Bounded by `cap` so that a
    /// lost notification can never wedge a caller.
    pub async fn wait(&mut self, cap: Duration) {
        match &mut self.inner {
            SignalInner::Channel(rx) => {
                let _ = tokio::time::timeout(cap, rx.changed()).await;
            }
            SignalInner::Poll(interval) => {
                tokio::time::sleep((*interval).min(cap)).await;
            }
        }
    }
}

/// Convenience wrappers for single-key access outside a wider transaction.
pub trait StoreExt: Store {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut out = None;
        self.atomically(&mut |t| {
            out = t.get(key);
            Ok(())
        })?;
        Ok(out)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.atomically(&mut |t| {
            t.set(key, value.to_vec());
            Ok(())
        })
    }

    fn del(&self, key: &str) -> Result<()> {
        self.atomically(&mut |t| {
            t.del(key);
            Ok(())
        })
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        self.atomically(&mut |t| {
            out = t.smembers(key);
            Ok(())
        })?;
        Ok(out)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        self.atomically(&mut |t| {
            out = t.keys_with_prefix(prefix);
            Ok(())
        })?;
        Ok(out)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

/// Check or initialise the schema version tag.
///
/// A fresh store gets stamped with [`keys::SCHEMA_VERSION`]; an existing
/// store with a different stamp is refused (no cross-version compatibility).
pub fn check_version(store: &dyn Store) -> Result<()> {
    store.atomically(&mut |t| {
        match t.get(keys::VERSION_KEY) {
            None => t.set(keys::VERSION_KEY, keys::SCHEMA_VERSION.as_bytes().to_vec()),
            Some(found) => {
                let found = String::from_utf8_lossy(&found).to_string();
                if found != keys::SCHEMA_VERSION {
                    return Err(crate::errors::EngineError::VersionMismatch {
                        found,
                        expected: keys::SCHEMA_VERSION.to_string(),
                    });
                }
            }
        }
        Ok(())
    })
}
