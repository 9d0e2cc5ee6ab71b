use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use ::redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EntityError;
use crate::query::run_query;
use crate::traits::{EntityPage, EntityQuery, EntityStore};

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("entities");

/// Row envelope: the document plus its insertion sequence, which survives
/// replacement and provides the stable tie-break for sorted queries.
#[derive(Serialize, Deserialize)]
struct Stored {
    seq: u64,
    doc: Value,
}

/// Durable entity store backed by redb — a pure-Rust embedded key-value
/// database. Documents are stored as JSON envelopes in a single table.
pub struct RedbStore {
    db: Database,
    next_seq: AtomicU64,
}

impl RedbStore {
    /// Open or create a redb database at the given path.
    pub fn open(path: &Path) -> Result<Self, EntityError> {
        let db = Database::create(path).map_err(|e| EntityError::Storage(e.to_string()))?;

        // Ensure the table exists by doing a write transaction.
        let write_txn = db
            .begin_write()
            .map_err(|e| EntityError::Storage(e.to_string()))?;
        {
            let _table = write_txn
                .open_table(TABLE)
                .map_err(|e| EntityError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| EntityError::Storage(e.to_string()))?;

        // Resume the sequence counter past everything already stored.
        let mut max_seq = 0u64;
        {
            let read_txn = db
                .begin_read()
                .map_err(|e| EntityError::Storage(e.to_string()))?;
            let table = read_txn
                .open_table(TABLE)
                .map_err(|e| EntityError::Storage(e.to_string()))?;
            let iter = table
                .iter()
                .map_err(|e| EntityError::Storage(e.to_string()))?;
            for entry in iter {
                let entry = entry.map_err(|e| EntityError::Storage(e.to_string()))?;
                let stored = decode(entry.1.value())?;
                max_seq = max_seq.max(stored.seq + 1);
            }
        }

        Ok(Self {
            db,
            next_seq: AtomicU64::new(max_seq),
        })
    }
}

fn decode(bytes: &[u8]) -> Result<Stored, EntityError> {
    serde_json::from_slice(bytes).map_err(|e| EntityError::Encoding(format!("bad entity row: {e}")))
}

impl EntityStore for RedbStore {
    fn get(&self, id: &str) -> Result<Option<Value>, EntityError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| EntityError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(TABLE)
            .map_err(|e| EntityError::Storage(e.to_string()))?;

        match table.get(id) {
            Ok(Some(guard)) => Ok(Some(decode(guard.value())?.doc)),
            Ok(None) => Ok(None),
            Err(e) => Err(EntityError::Storage(e.to_string())),
        }
    }

    fn set(&self, id: &str, doc: &Value) -> Result<(), EntityError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| EntityError::Storage(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(TABLE)
                .map_err(|e| EntityError::Storage(e.to_string()))?;

            // A replaced document keeps its original insertion sequence.
            let seq = match table.get(id) {
                Ok(Some(guard)) => decode(guard.value())?.seq,
                Ok(None) => self.next_seq.fetch_add(1, Ordering::Relaxed),
                Err(e) => return Err(EntityError::Storage(e.to_string())),
            };

            let stored = Stored { seq, doc: doc.clone() };
            let bytes = serde_json::to_vec(&stored)
                .map_err(|e| EntityError::Encoding(e.to_string()))?;
            table
                .insert(id, bytes.as_slice())
                .map_err(|e| EntityError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| EntityError::Storage(e.to_string()))?;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool, EntityError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| EntityError::Storage(e.to_string()))?;
        let existed;
        {
            let mut table = write_txn
                .open_table(TABLE)
                .map_err(|e| EntityError::Storage(e.to_string()))?;
            existed = table
                .remove(id)
                .map_err(|e| EntityError::Storage(e.to_string()))?
                .is_some();
        }
        write_txn
            .commit()
            .map_err(|e| EntityError::Storage(e.to_string()))?;
        Ok(existed)
    }

    fn query(&self, query: &EntityQuery) -> Result<EntityPage, EntityError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| EntityError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(TABLE)
            .map_err(|e| EntityError::Storage(e.to_string()))?;

        let mut rows = Vec::new();
        let iter = table
            .iter()
            .map_err(|e| EntityError::Storage(e.to_string()))?;
        for entry in iter {
            let entry = entry.map_err(|e| EntityError::Storage(e.to_string()))?;
            let stored = decode(entry.1.value())?;
            rows.push((stored.seq, stored.doc));
        }

        run_query(rows, query)
    }
}
