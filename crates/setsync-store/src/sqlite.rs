//! SQLite implementation of the KeyValueStore trait.
//!
//! This is the persistent storage backend. It uses rusqlite with bundled
//! SQLite; every record lives in a single `kv` table.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{KeyValueStore, KvPairs, WriteBatch, WriteOp};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. Cloning shares the connection.
#[derive(Clone)]
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        tracing::debug!(path = %path.display(), "opened sqlite store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Execute a blocking operation on the connection.
    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        f(&conn)
    }

    /// Execute a blocking operation that needs mutable access.
    fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        f(&mut conn)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(value)
        })
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
            Ok(())
        })
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            Ok(())
        })
    }

    fn clear(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM kv", [])?;
            Ok(())
        })
    }

    fn iterate(&self, prefix: &[u8]) -> Result<KvPairs> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT key, value FROM kv WHERE key >= ?1 ORDER BY key")?;
            let rows = stmt.query_map(params![prefix], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;

            let mut pairs = Vec::new();
            for row in rows {
                let (key, value) = row?;
                // BLOB ordering is memcmp, so prefix matches are contiguous.
                if !key.starts_with(prefix) {
                    break;
                }
                pairs.push((key, value));
            }
            Ok(pairs)
        })
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let count = batch.len();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let mut put =
                    tx.prepare_cached("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")?;
                let mut delete = tx.prepare_cached("DELETE FROM kv WHERE key = ?1")?;
                for op in batch {
                    match op {
                        WriteOp::Put { key, value } => {
                            put.execute(params![key, value])?;
                        }
                        WriteOp::Delete { key } => {
                            delete.execute(params![key])?;
                        }
                    }
                }
            }
            tx.commit()?;
            tracing::trace!(writes = count, "sqlite batch committed");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StoreExt;

    #[test]
    fn test_put_and_get() {
        let store = SqliteStore::open_memory().unwrap();
        store.put(b"key", b"value").unwrap();
        assert_eq!(store.get(b"key").unwrap(), Some(b"value".to_vec()));
        assert!(store.get(b"missing").unwrap().is_none());

        store.put(b"key", b"replaced").unwrap();
        assert_eq!(store.get(b"key").unwrap(), Some(b"replaced".to_vec()));
    }

    #[test]
    fn test_delete_and_clear() {
        let store = SqliteStore::open_memory().unwrap();
        store.put(b"a", b"1").unwrap();
        store.put(b"b", b"2").unwrap();

        store.delete(b"a").unwrap();
        store.delete(b"a").unwrap();
        assert!(!store.contains_key(b"a").unwrap());

        store.clear().unwrap();
        assert!(store.iterate(b"").unwrap().is_empty());
    }

    #[test]
    fn test_iterate_prefix_with_binary_keys() {
        let store = SqliteStore::open_memory().unwrap();
        let mut key = b"bf/i/".to_vec();
        key.extend_from_slice(&7u64.to_be_bytes());
        store.put(&key, b"seven").unwrap();
        let mut key = b"bf/i/".to_vec();
        key.extend_from_slice(&300u64.to_be_bytes());
        store.put(&key, b"three hundred").unwrap();
        store.put(b"bf/params", b"p").unwrap();
        store.put(b"mt/root", b"r").unwrap();

        let pairs = store.iterate(b"bf/i/").unwrap();
        let values: Vec<&[u8]> = pairs.iter().map(|(_, v)| v.as_slice()).collect();
        assert_eq!(values, vec![b"seven".as_slice(), b"three hundred".as_slice()]);
    }

    #[test]
    fn test_transaction_commit() {
        let store = SqliteStore::open_memory().unwrap();
        store.put(b"old", b"x").unwrap();

        let mut tx = store.transaction();
        tx.put(b"new".to_vec(), b"y".to_vec());
        tx.delete(b"old".to_vec());
        assert_eq!(tx.commit().unwrap(), 2);

        assert_eq!(store.get(b"new").unwrap(), Some(b"y".to_vec()));
        assert!(store.get(b"old").unwrap().is_none());
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put(b"mt/size", &3u64.to_le_bytes()).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_u64(b"mt/size").unwrap(), Some(3));
    }

    #[test]
    fn test_get_u64_rejects_bad_length() {
        let store = SqliteStore::open_memory().unwrap();
        store.put(b"mt/size", b"abc").unwrap();
        assert!(matches!(
            store.get_u64(b"mt/size"),
            Err(StoreError::InvalidData(_))
        ));
    }

    proptest::proptest! {
        #[test]
        fn test_sqlite_matches_memory(
            ops in proptest::collection::vec(
                (proptest::collection::vec(0u8..4, 1..3), proptest::option::of(proptest::collection::vec(proptest::prelude::any::<u8>(), 0..4))),
                0..40,
            )
        ) {
            let sqlite = SqliteStore::open_memory().unwrap();
            let memory = crate::memory::MemoryStore::new();
            for (key, value) in &ops {
                match value {
                    Some(v) => {
                        sqlite.put(key, v).unwrap();
                        memory.put(key, v).unwrap();
                    }
                    None => {
                        sqlite.delete(key).unwrap();
                        memory.delete(key).unwrap();
                    }
                }
            }
            proptest::prop_assert_eq!(sqlite.iterate(b"").unwrap(), memory.iterate(b"").unwrap());
            proptest::prop_assert_eq!(sqlite.iterate(&[1]).unwrap(), memory.iterate(&[1]).unwrap());
        }
    }
}
