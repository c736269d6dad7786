//! Ordered KV store backed by redb.
//!
//! A single table holds every record; the keyspace is partitioned by
//! string prefix (see [`crate::keys`]). Values are opaque bytes; callers
//! use the JSON helpers for records and `Add` batch ops for the 8-byte
//! little-endian counters that back tenant usage accounting.

use redb::{Database, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Metadata store error
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("database error: {0}")]
    Db(#[from] redb::DatabaseError),

    #[error("transaction error: {0}")]
    Txn(#[from] redb::TransactionError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// One operation in an atomic batch
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Insert or overwrite a key
    Put { key: String, value: Vec<u8> },
    /// Insert only if the key is absent; aborts the whole batch with
    /// [`MetaError::AlreadyExists`] otherwise
    PutIfAbsent { key: String, value: Vec<u8> },
    /// Remove a key (absent keys are fine)
    Delete { key: String },
    /// Adjust an 8-byte little-endian i64 counter, creating it at zero
    Add { key: String, delta: i64 },
}

impl BatchOp {
    /// Convenience constructor for a JSON record write
    pub fn put_json<T: Serialize>(key: impl Into<String>, value: &T) -> Result<Self, MetaError> {
        Ok(Self::Put {
            key: key.into(),
            value: serde_json::to_vec(value)?,
        })
    }

    /// Convenience constructor for a guarded JSON record write
    pub fn put_json_if_absent<T: Serialize>(
        key: impl Into<String>,
        value: &T,
    ) -> Result<Self, MetaError> {
        Ok(Self::PutIfAbsent {
            key: key.into(),
            value: serde_json::to_vec(value)?,
        })
    }

    /// Convenience constructor for a delete
    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    /// Convenience constructor for a counter adjustment
    pub fn add(key: impl Into<String>, delta: i64) -> Self {
        Self::Add {
            key: key.into(),
            delta,
        }
    }
}

/// A key/value pair returned from a scan
#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub key: String,
    pub value: Vec<u8>,
}

impl ScanEntry {
    /// Deserialize the value as JSON
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, MetaError> {
        Ok(serde_json::from_slice(&self.value)?)
    }
}

/// Ordered KV metadata store.
///
/// Writers serialize on redb's single write transaction; readers run
/// concurrently against consistent snapshots. A committed batch is
/// durable: after restart either all of its ops are visible or none.
pub struct MetaStore {
    db: Arc<Database>,
}

impl MetaStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MetaError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Ensure the table exists
        let wtx = db.begin_write()?;
        wtx.open_table(META)?;
        wtx.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a single value.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, MetaError> {
        let rtx = self.db.begin_read()?;
        let table = rtx.open_table(META)?;
        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    /// Get and JSON-decode a single record.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, MetaError> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert or overwrite a single key.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), MetaError> {
        self.batch(vec![BatchOp::Put {
            key: key.to_string(),
            value: value.to_vec(),
        }])
    }

    /// JSON-encode and write a single record.
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), MetaError> {
        self.put(key, &serde_json::to_vec(value)?)
    }

    /// Remove a single key.
    pub fn delete(&self, key: &str) -> Result<(), MetaError> {
        self.batch(vec![BatchOp::delete(key)])
    }

    /// Read an i64 counter (zero when absent).
    pub fn counter(&self, key: &str) -> Result<i64, MetaError> {
        Ok(self
            .get(key)?
            .map(|bytes| decode_counter(&bytes))
            .unwrap_or(0))
    }

    /// Scan keys beginning with `prefix`, in lexicographic order,
    /// starting strictly after `start_after` when given, returning at
    /// most `limit` entries.
    pub fn scan(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScanEntry>, MetaError> {
        let rtx = self.db.begin_read()?;
        let table = rtx.open_table(META)?;

        let lower = match start_after {
            Some(s) if s.as_bytes() >= prefix.as_bytes() => s.to_string(),
            _ => prefix.to_string(),
        };

        let mut out = Vec::new();
        for entry in table.range(lower.as_str()..)? {
            let (k, v) = entry?;
            let key = k.value();
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(after) = start_after {
                if key <= after {
                    continue;
                }
            }
            out.push(ScanEntry {
                key: key.to_string(),
                value: v.value().to_vec(),
            });
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Count keys beginning with `prefix`, up to `limit`.
    pub fn count_prefix(&self, prefix: &str, limit: usize) -> Result<usize, MetaError> {
        let rtx = self.db.begin_read()?;
        let table = rtx.open_table(META)?;
        let mut n = 0usize;
        for entry in table.range(prefix..)? {
            let (k, _) = entry?;
            if !k.value().starts_with(prefix) {
                break;
            }
            n += 1;
            if n >= limit {
                break;
            }
        }
        Ok(n)
    }

    /// Apply a batch of operations in one durable transaction.
    ///
    /// If any `PutIfAbsent` hits an existing key, the transaction is
    /// aborted and nothing is applied.
    pub fn batch(&self, ops: Vec<BatchOp>) -> Result<(), MetaError> {
        let wtx = self.db.begin_write()?;
        {
            let mut table = wtx.open_table(META)?;
            for op in &ops {
                match op {
                    BatchOp::Put { key, value } => {
                        table.insert(key.as_str(), value.as_slice())?;
                    }
                    BatchOp::PutIfAbsent { key, value } => {
                        if table.get(key.as_str())?.is_some() {
                            drop(table);
                            wtx.abort()?;
                            return Err(MetaError::AlreadyExists(key.clone()));
                        }
                        table.insert(key.as_str(), value.as_slice())?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_str())?;
                    }
                    BatchOp::Add { key, delta } => {
                        let current = table
                            .get(key.as_str())?
                            .map(|v| decode_counter(v.value()))
                            .unwrap_or(0);
                        let next = (current + delta).to_le_bytes();
                        table.insert(key.as_str(), next.as_slice())?;
                    }
                }
            }
        }
        wtx.commit()?;
        Ok(())
    }
}

fn decode_counter(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    i64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, MetaStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MetaStore::open(dir.path().join("meta.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_get_delete() {
        let (_dir, store) = open_store();
        store.put("bkt:a", b"one").unwrap();
        assert_eq!(store.get("bkt:a").unwrap().unwrap(), b"one");
        store.delete("bkt:a").unwrap();
        assert!(store.get("bkt:a").unwrap().is_none());
    }

    #[test]
    fn test_scan_prefix_order() {
        let (_dir, store) = open_store();
        for k in ["obj:t/b/a\x00v1", "obj:t/b/a\x00v2", "obj:t/b/b\x00v1", "obj:t/c/a\x00v1"] {
            store.put(k, b"x").unwrap();
        }
        let entries = store.scan("obj:t/b/", None, 100).unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["obj:t/b/a\x00v1", "obj:t/b/a\x00v2", "obj:t/b/b\x00v1"]
        );
    }

    #[test]
    fn test_scan_start_after_and_limit() {
        let (_dir, store) = open_store();
        for k in ["p:1", "p:2", "p:3", "p:4"] {
            store.put(k, b"x").unwrap();
        }
        let entries = store.scan("p:", Some("p:2"), 2).unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["p:3", "p:4"]);
    }

    #[test]
    fn test_batch_atomic() {
        let (_dir, store) = open_store();
        store.put("k:existing", b"x").unwrap();

        // A batch with a failing guard applies nothing
        let err = store
            .batch(vec![
                BatchOp::Put {
                    key: "k:new".into(),
                    value: b"y".to_vec(),
                },
                BatchOp::PutIfAbsent {
                    key: "k:existing".into(),
                    value: b"z".to_vec(),
                },
            ])
            .unwrap_err();
        assert!(matches!(err, MetaError::AlreadyExists(_)));
        assert!(store.get("k:new").unwrap().is_none());
        assert_eq!(store.get("k:existing").unwrap().unwrap(), b"x");
    }

    #[test]
    fn test_counters() {
        let (_dir, store) = open_store();
        store.batch(vec![BatchOp::add("usage:t1:bytes", 100)]).unwrap();
        store.batch(vec![BatchOp::add("usage:t1:bytes", -30)]).unwrap();
        assert_eq!(store.counter("usage:t1:bytes").unwrap(), 70);
        assert_eq!(store.counter("usage:t1:objects").unwrap(), 0);
    }

    #[test]
    fn test_reopen_sees_committed_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.redb");
        {
            let store = MetaStore::open(&path).unwrap();
            store
                .batch(vec![
                    BatchOp::Put {
                        key: "a".into(),
                        value: b"1".to_vec(),
                    },
                    BatchOp::Put {
                        key: "b".into(),
                        value: b"2".to_vec(),
                    },
                ])
                .unwrap();
        }
        let store = MetaStore::open(&path).unwrap();
        assert_eq!(store.get("a").unwrap().unwrap(), b"1");
        assert_eq!(store.get("b").unwrap().unwrap(), b"2");
    }
}
