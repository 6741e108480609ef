//! Transactions: a read-your-writes overlay over a [`KeyValueStore`].
//!
//! Structures stage a whole mutation in a transaction and then either
//! commit it as one atomic [`WriteBatch`] or drop it (abort). Reads through
//! the transaction observe the staged writes first.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::traits::{decode_u64, KeyValueStore, KvPairs, WriteBatch};

/// A staged group of writes against a store.
///
/// Dropping a transaction without calling [`commit`](Self::commit) discards
/// every staged write.
#[must_use = "a transaction does nothing unless committed"]
pub struct Transaction<'s, S: KeyValueStore + ?Sized> {
    store: &'s S,
    /// Staged writes: `Some` = put, `None` = delete. Last write wins.
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'s, S: KeyValueStore + ?Sized> Transaction<'s, S> {
    /// Start an empty transaction.
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            pending: BTreeMap::new(),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &'s S {
        self.store
    }

    /// Read `key`, preferring staged writes.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.pending.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.store.get(key),
        }
    }

    /// Read a little-endian `u64` record, preferring staged writes.
    pub fn get_u64(&self, key: &[u8]) -> Result<Option<u64>> {
        self.get(key)?.map(|bytes| decode_u64(key, &bytes)).transpose()
    }

    /// Stage a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.pending.insert(key.into(), Some(value.into()));
    }

    /// Stage a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.pending.insert(key.into(), None);
    }

    /// Pairs under `prefix` as they would look after commit, ordered by key.
    pub fn iterate(&self, prefix: &[u8]) -> Result<KvPairs> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.store.iterate(prefix)?.into_iter().collect();
        for (key, staged) in self.pending.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match staged {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Number of staged keys.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Convert the staged writes into a batch without applying it.
    pub fn into_batch(self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (key, staged) in self.pending {
            match staged {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        batch
    }

    /// Apply every staged write atomically.
    ///
    /// Returns the number of writes applied.
    pub fn commit(self) -> Result<usize> {
        let store = self.store;
        let batch = self.into_batch();
        let count = batch.len();
        if count > 0 {
            store.write_batch(batch)?;
        }
        tracing::trace!(writes = count, "transaction committed");
        Ok(count)
    }

    /// Discard every staged write.
    pub fn abort(self) {
        tracing::trace!(writes = self.pending.len(), "transaction aborted");
    }
}
