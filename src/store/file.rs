// src/store/file.rs

//! Single-file store backend.
//!
//! The whole map is kept as one JSON document next to a lock file. Every
//! transaction takes the lock, loads the document, runs the body, and writes
//! the document back via a temp-file rename. This is the same
//! load-everything / save-everything approach used for small on-disk state
//! elsewhere in the ecosystem, and it is deliberately simple: correctness
//! over throughput. Good enough for a workstation-sized fleet of worker
//! processes sharing one filesystem; anything bigger wants a real KV server
//! behind the [`Store`] trait.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{EngineError, Result};
use crate::hashing::{from_hex, to_hex};

use super::keys::PULSE_KEY;
use super::memory::{MapTxn, StoreMap, StoreValue};
use super::{Signal, Store, Txn};

/// How long to keep retrying the lock before giving up with a store failure.
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// A lock file older than this is assumed to belong to a dead process.
const LOCK_STALE: Duration = Duration::from_secs(60);

/// File-backed store: `<path>` holds the JSON map, `<path>.lock` the lock.
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    poll: Duration,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let lock_path = path.with_extension("lock");
        Ok(FileStore {
            path,
            lock_path,
            poll: Duration::from_millis(250),
        })
    }

    /// Polling interval handed out by [`FileStore::watch`].
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    fn acquire_lock(&self) -> Result<LockGuard<'_>> {
        let start = SystemTime::now();
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(_) => return Ok(LockGuard { path: &self.lock_path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    self.break_stale_lock();
                    if start.elapsed().unwrap_or_default() > LOCK_TIMEOUT {
                        return Err(EngineError::StoreFailure(format!(
                            "could not acquire {:?} within {LOCK_TIMEOUT:?}",
                            self.lock_path
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Remove a lock file left behind by a crashed process.
    fn break_stale_lock(&self) {
        let age = fs::metadata(&self.lock_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok());
        if let Some(age) = age {
            if age > LOCK_STALE {
                warn!(lock = ?self.lock_path, ?age, "breaking stale store lock");
                let _ = fs::remove_file(&self.lock_path);
            }
        }
    }

    fn load(&self) -> Result<StoreMap> {
        if !self.path.exists() {
            return Ok(StoreMap::new());
        }
        let raw = fs::read(&self.path)?;
        let doc: BTreeMap<String, FileValue> = serde_json::from_slice(&raw)?;
        let mut map = StoreMap::new();
        for (k, v) in doc {
            map.insert(k, v.into_store_value()?);
        }
        Ok(map)
    }

    fn save(&self, map: &StoreMap) -> Result<()> {
        let doc: BTreeMap<&String, FileValue> = map
            .iter()
            .map(|(k, v)| (k, FileValue::from_store_value(v)))
            .collect();
        let raw = serde_json::to_vec(&doc)?;

        let tmp = self.path.with_extension("tmp");
        let mut f = File::create(&tmp)?;
        f.write_all(&raw)?;
        f.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Store for FileStore {
    fn atomically(&self, body: &mut dyn FnMut(&mut dyn Txn) -> Result<()>) -> Result<()> {
        let _lock = self.acquire_lock()?;
        let mut map = self.load()?;
        let mut txn = MapTxn { map: &mut map };
        body(&mut txn)?;
        self.save(&map)
    }

    fn publish(&self, channel: &str) {
        // No real pub/sub on a plain file; bump a counter so that an
        // observer could at least detect activity. Watchers poll.
        debug!(channel, "file store publish (pulse bump)");
        let _ = self.atomically(&mut |t| {
            let next = t
                .get(PULSE_KEY)
                .and_then(|b| String::from_utf8(b).ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0)
                + 1;
            t.set(PULSE_KEY, next.to_string().into_bytes());
            Ok(())
        });
    }

    fn watch(&self, _channel: &str) -> Signal {
        Signal::poll(self.poll)
    }
}

struct LockGuard<'a> {
    path: &'a Path,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let _ = fs::remove_file(self.path);
    }
}

/// On-disk value shape. Byte values are hex-encoded so the document stays
/// valid UTF-8 JSON.
#[derive(Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
enum FileValue {
    #[serde(rename = "b")]
    Bytes(String),
    #[serde(rename = "s")]
    Set(Vec<String>),
    #[serde(rename = "l")]
    List(Vec<String>),
}

impl FileValue {
    fn from_store_value(v: &StoreValue) -> Self {
        match v {
            StoreValue::Bytes(b) => FileValue::Bytes(to_hex(b)),
            StoreValue::Set(s) => FileValue::Set(s.iter().cloned().collect()),
            StoreValue::List(l) => FileValue::List(l.iter().cloned().collect()),
        }
    }

    fn into_store_value(self) -> Result<StoreValue> {
        Ok(match self {
            FileValue::Bytes(hex) => StoreValue::Bytes(from_hex(&hex).ok_or_else(|| {
                EngineError::StoreFailure("corrupt hex value in store file".to_string())
            })?),
            FileValue::Set(s) => StoreValue::Set(s.into_iter().collect()),
            FileValue::List(l) => StoreValue::List(l.into_iter().collect()),
        })
    }
}
