//! KeyValueStore trait: the abstract byte-key to byte-value map.
//!
//! Every stateful structure in setsync (Bloom filter reverse index, trie
//! nodes, root pointer) is persisted through this trait. Implementations
//! include SQLite (persistent) and in-memory (for tests).

use std::sync::Arc;

use crate::error::Result;
use crate::transaction::Transaction;

/// A single buffered write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or overwrite `key`.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Remove `key` if present.
    Delete { key: Vec<u8> },
}

/// An ordered group of writes applied atomically by [`KeyValueStore::write_batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Queue a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Delete { key: key.into() });
    }

    /// Number of queued writes.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The queued writes, in order.
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }
}

impl IntoIterator for WriteBatch {
    type Item = WriteOp;
    type IntoIter = std::vec::IntoIter<WriteOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

/// Key/value pairs returned by [`KeyValueStore::iterate`], ordered by key.
pub type KvPairs = Vec<(Vec<u8>, Vec<u8>)>;

/// The KeyValueStore trait: synchronous byte map.
///
/// All methods take `&self`; implementations provide their own interior
/// locking so a store can be shared (via `Arc`) between the structures
/// built on top of it.
///
/// # Design Notes
///
/// - **Missing keys are not errors**: `get` returns `None`, `delete` of an
///   absent key succeeds.
/// - **Atomic batches**: `write_batch` applies every write or none of them.
///   Trie and Bloom filter mutations go through a [`Transaction`] that ends
///   in exactly one batch, so a crash cannot leave dangling node references.
pub trait KeyValueStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Single-key Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite `key`.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove `key` if present.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Check whether `key` is present.
    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Bulk Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Remove every key.
    fn clear(&self) -> Result<()>;

    /// All pairs whose key starts with `prefix`, ordered by key.
    ///
    /// An empty prefix iterates the whole store.
    fn iterate(&self, prefix: &[u8]) -> Result<KvPairs>;

    /// Apply `batch` atomically, in order.
    fn write_batch(&self, batch: WriteBatch) -> Result<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        (**self).delete(key)
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        (**self).contains_key(key)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }

    fn iterate(&self, prefix: &[u8]) -> Result<KvPairs> {
        (**self).iterate(prefix)
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        (**self).write_batch(batch)
    }
}

/// Extension trait for common store patterns.
pub trait StoreExt: KeyValueStore {
    /// Start a transaction: an overlay whose writes reach the store only on
    /// [`Transaction::commit`].
    fn transaction(&self) -> Transaction<'_, Self> {
        Transaction::new(self)
    }

    /// Read a little-endian `u64` record.
    fn get_u64(&self, key: &[u8]) -> Result<Option<u64>> {
        self.get(key)?.map(|bytes| decode_u64(key, &bytes)).transpose()
    }
}

impl<S: KeyValueStore + ?Sized> StoreExt for S {}

/// Decode a little-endian `u64` record stored under `key`.
pub fn decode_u64(key: &[u8], bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| {
        crate::error::StoreError::InvalidData(format!(
            "expected 8-byte counter under {:?}, got {} bytes",
            String::from_utf8_lossy(key),
            bytes.len()
        ))
    })?;
    Ok(u64::from_le_bytes(arr))
}
