// src/config.rs

//! Configuration loading (`Hashdag.toml`).
//!
//! All sections are optional and have defaults, so a missing config file is
//! a valid configuration:
//!
//! ```toml
//! [store]
//! backend = "file"           # or "memory"
//! path = ".hashdag/store.json"
//!
//! [worker]
//! queue = "default"
//! heartbeat_secs = 15
//! reclaim_after_secs = 900
//!
//! [exec]
//! scratch_root = "/tmp/hashdag"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::{EngineError, Result};
use crate::store::{FileStore, MemoryStore, SharedStore};
use crate::worker::WorkerConfig;

/// Top-level configuration as read from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub exec: ExecSection,
}

/// `[store]` section: which backend to open.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// `"file"` (default) or `"memory"`.
    ///
    /// The memory backend lives and dies with one process; it is mostly
    /// useful for tests and demos.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Location of the store file for the `file` backend.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        StoreSection {
            backend: default_backend(),
            path: default_store_path(),
        }
    }
}

/// `[worker]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    #[serde(default = "default_queue")]
    pub queue: String,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Claims without a heartbeat for this long are handed back to the
    /// queue.
    #[serde(default = "default_reclaim_after_secs")]
    pub reclaim_after_secs: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        WorkerSection {
            queue: default_queue(),
            heartbeat_secs: default_heartbeat_secs(),
            reclaim_after_secs: default_reclaim_after_secs(),
        }
    }
}

/// `[exec]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecSection {
    /// Scratch directories for shell operations are created under this
    /// root, one per execution attempt.
    #[serde(default = "default_scratch_root")]
    pub scratch_root: PathBuf,
}

impl Default for ExecSection {
    fn default() -> Self {
        ExecSection {
            scratch_root: default_scratch_root(),
        }
    }
}

fn default_backend() -> String {
    "file".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".hashdag/store.json")
}

fn default_queue() -> String {
    "default".to_string()
}

fn default_heartbeat_secs() -> u64 {
    15
}

fn default_reclaim_after_secs() -> u64 {
    15 * 60
}

fn default_scratch_root() -> PathBuf {
    std::env::temp_dir().join("hashdag")
}

/// Load a configuration file. A missing file yields the defaults; a present
/// but malformed file is an error.
pub fn load(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    if !path.exists() {
        debug!(?path, "no config file; using defaults");
        return Ok(ConfigFile::default());
    }
    let contents = fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Open the store backend named by the configuration.
pub fn open_store(config: &ConfigFile) -> Result<SharedStore> {
    match config.store.backend.as_str() {
        "file" => Ok(Arc::new(FileStore::open(&config.store.path)?)),
        "memory" => {
            warn!("memory store backend: state is private to this process");
            Ok(Arc::new(MemoryStore::new()))
        }
        other => Err(EngineError::ConfigError(format!(
            "unknown store backend '{other}' (expected \"file\" or \"memory\")"
        ))),
    }
}

/// Worker configuration derived from the file (CLI flags may override the
/// queue).
pub fn worker_config(config: &ConfigFile, queue_override: Option<&str>) -> WorkerConfig {
    WorkerConfig {
        queue: queue_override
            .map(str::to_string)
            .unwrap_or_else(|| config.worker.queue.clone()),
        heartbeat: Duration::from_secs(config.worker.heartbeat_secs),
        reclaim_after: Duration::from_secs(config.worker.reclaim_after_secs),
        scratch_root: config.exec.scratch_root.clone(),
        idle_poll: Duration::from_secs(1),
    }
}
