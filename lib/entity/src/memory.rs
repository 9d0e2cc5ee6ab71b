use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde_json::Value;

use crate::error::EntityError;
use crate::query::run_query;
use crate::traits::{EntityPage, EntityQuery, EntityStore};

struct Entry {
    seq: u64,
    doc: Value,
}

/// In-memory entity store.
///
/// Each key gets a monotone sequence number on first write; replacing a
/// document keeps its original sequence, so insertion order survives
/// updates and serves as the tie-break in sorted queries.
pub struct MemoryStore {
    inner: RwLock<HashMap<String, Entry>>,
    seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore for MemoryStore {
    fn get(&self, id: &str) -> Result<Option<Value>, EntityError> {
        let map = self
            .inner
            .read()
            .map_err(|_| EntityError::Storage("store lock poisoned".into()))?;
        Ok(map.get(id).map(|e| e.doc.clone()))
    }

    fn set(&self, id: &str, doc: &Value) -> Result<(), EntityError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| EntityError::Storage("store lock poisoned".into()))?;
        match map.get_mut(id) {
            Some(entry) => entry.doc = doc.clone(),
            None => {
                let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                map.insert(id.to_string(), Entry { seq, doc: doc.clone() });
            }
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool, EntityError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| EntityError::Storage("store lock poisoned".into()))?;
        Ok(map.remove(id).is_some())
    }

    fn query(&self, query: &EntityQuery) -> Result<EntityPage, EntityError> {
        let rows: Vec<(u64, Value)> = {
            let map = self
                .inner
                .read()
                .map_err(|_| EntityError::Storage("store lock poisoned".into()))?;
            map.values().map(|e| (e.seq, e.doc.clone())).collect()
        };
        run_query(rows, query)
    }
}
