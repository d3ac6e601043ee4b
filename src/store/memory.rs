// src/store/memory.rs

//! In-memory store backend.
//!
//! The whole map lives behind one mutex, so "atomic transaction" is simply
//! "run the body while holding the lock". The map is snapshotted before the
//! body runs and restored if it fails, which gives real rollback semantics
//! at reference-implementation cost.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::Mutex;

use tokio::sync::watch;

use crate::errors::Result;

use super::{Signal, Store, Txn};

#[derive(Debug, Clone)]
pub(crate) enum StoreValue {
    Bytes(Vec<u8>),
    Set(BTreeSet<String>),
    List(VecDeque<String>),
}

pub(crate) type StoreMap = BTreeMap<String, StoreValue>;

/// In-process reference store. Cheap to create, shared via `Arc`.
pub struct MemoryStore {
    map: Mutex<StoreMap>,
    channels: Mutex<HashMap<String, watch::Sender<u64>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            map: Mutex::new(BTreeMap::new()),
            channels: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn atomically(&self, body: &mut dyn FnMut(&mut dyn Txn) -> Result<()>) -> Result<()> {
        let mut guard = self.map.lock().expect("store mutex poisoned");
        let snapshot = guard.clone();
        let mut txn = MapTxn { map: &mut guard };
        match body(&mut txn) {
            Ok(()) => Ok(()),
            Err(e) => {
                *guard = snapshot;
                Err(e)
            }
        }
    }

    fn publish(&self, channel: &str) {
        let mut channels = self.channels.lock().expect("channel mutex poisoned");
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| watch::channel(0).0);
        tx.send_modify(|v| *v += 1);
    }

    fn watch(&self, channel: &str) -> Signal {
        let mut channels = self.channels.lock().expect("channel mutex poisoned");
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| watch::channel(0).0);
        Signal::channel(tx.subscribe())
    }
}

/// [`Txn`] over a plain `BTreeMap`. Shared with [`FileStore`](super::FileStore),
/// which loads its file into the same map shape.
pub(crate) struct MapTxn<'a> {
    pub(crate) map: &'a mut StoreMap,
}

impl Txn for MapTxn<'_> {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.map.get(key) {
            Some(StoreValue::Bytes(b)) => Some(b.clone()),
            _ => None,
        }
    }

    fn set(&mut self, key: &str, value: Vec<u8>) {
        self.map.insert(key.to_string(), StoreValue::Bytes(value));
    }

    fn set_if_absent(&mut self, key: &str, value: Vec<u8>) -> bool {
        if self.map.contains_key(key) {
            return false;
        }
        self.map.insert(key.to_string(), StoreValue::Bytes(value));
        true
    }

    fn del(&mut self, key: &str) {
        self.map.remove(key);
    }

    fn sadd(&mut self, key: &str, member: &str) -> bool {
        match self
            .map
            .entry(key.to_string())
            .or_insert_with(|| StoreValue::Set(BTreeSet::new()))
        {
            StoreValue::Set(s) => s.insert(member.to_string()),
            _ => false,
        }
    }

    fn srem(&mut self, key: &str, member: &str) -> bool {
        match self.map.get_mut(key) {
            Some(StoreValue::Set(s)) => s.remove(member),
            _ => false,
        }
    }

    fn smembers(&self, key: &str) -> Vec<String> {
        match self.map.get(key) {
            Some(StoreValue::Set(s)) => s.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn rpush(&mut self, key: &str, value: String) {
        match self
            .map
            .entry(key.to_string())
            .or_insert_with(|| StoreValue::List(VecDeque::new()))
        {
            StoreValue::List(l) => l.push_back(value),
            _ => {}
        }
    }

    fn lpop(&mut self, key: &str) -> Option<String> {
        match self.map.get_mut(key) {
            Some(StoreValue::List(l)) => l.pop_front(),
            _ => None,
        }
    }

    fn llen(&self, key: &str) -> usize {
        match self.map.get(key) {
            Some(StoreValue::List(l)) => l.len(),
            _ => 0,
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.map
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }
}
