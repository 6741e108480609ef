//! The counting Bloom filter.
//!
//! Bits live in memory; the reverse index (bit position to every digest that
//! set it) lives in the key-value store and is the source of truth. The bit
//! array is rebuilt from the index on open.

use std::collections::HashSet;
use std::sync::Arc;

use setsync_core::{Digest, DoubleHashing};
use setsync_store::{KeyValueStore, StoreExt, Transaction};

use crate::config::{BloomConfig, FilterParams};
use crate::error::{BloomError, Result};
use crate::snapshot::FilterSnapshot;

/// Prefix of reverse index records; followed by the bit position (u64 BE).
pub const INDEX_PREFIX: &[u8] = b"bf/i/";
/// Item count record (u64 LE).
pub const COUNT_KEY: &[u8] = b"bf/count";
/// Persisted [`FilterParams`] (CBOR).
pub const PARAMS_KEY: &[u8] = b"bf/params";

fn index_key(pos: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(INDEX_PREFIX.len() + 8);
    key.extend_from_slice(INDEX_PREFIX);
    key.extend_from_slice(&pos.to_be_bytes());
    key
}

fn position_from_key(key: &[u8]) -> Option<u64> {
    let raw: [u8; 8] = key.strip_prefix(INDEX_PREFIX)?.try_into().ok()?;
    Some(u64::from_be_bytes(raw))
}

pub(crate) fn bit_is_set(bits: &[u8], pos: u64) -> bool {
    bits[(pos / 8) as usize] & (1 << (pos % 8)) != 0
}

/// Bit positions touched by a staged mutation, applied after commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use = "a staged change must be applied after its transaction commits"]
pub struct BloomDelta {
    set: Vec<u64>,
    cleared: Vec<u64>,
    item_count: u64,
}

impl BloomDelta {
    /// Positions whose bit becomes 1.
    pub fn set_positions(&self) -> &[u64] {
        &self.set
    }

    /// Positions whose bit becomes 0.
    pub fn cleared_positions(&self) -> &[u64] {
        &self.cleared
    }
}

/// A counting Bloom filter over digests, persisted in a [`KeyValueStore`].
pub struct BloomFilter<S> {
    store: Arc<S>,
    params: FilterParams,
    max_items: Option<u64>,
    bits: Vec<u8>,
    item_count: u64,
}

impl<S: KeyValueStore> BloomFilter<S> {
    /// Open (or create) the filter stored in `store`.
    ///
    /// The parameters derived from `config` must match any parameters
    /// already persisted in the store.
    pub fn open(store: Arc<S>, digest_len: usize, config: &BloomConfig) -> Result<Self> {
        let params = FilterParams::from_config(config, digest_len)?;

        match store.get(PARAMS_KEY)? {
            Some(bytes) => {
                let stored = FilterParams::decode(&bytes)?;
                if stored != params {
                    return Err(BloomError::ParamsMismatch {
                        stored: stored.to_string(),
                        configured: params.to_string(),
                    });
                }
            }
            None => store.put(PARAMS_KEY, &params.encode()?)?,
        }

        let mut bits = vec![0u8; params.byte_len()];
        for (key, entries) in store.iterate(INDEX_PREFIX)? {
            let pos = position_from_key(&key)
                .filter(|pos| *pos < params.filter_size)
                .ok_or_else(|| BloomError::CorruptIndex(format!("bad key {:02x?}", key)))?;
            if entries.is_empty() || entries.len() % digest_len != 0 {
                return Err(BloomError::CorruptIndex(format!(
                    "position {} holds {} bytes",
                    pos,
                    entries.len()
                )));
            }
            bits[(pos / 8) as usize] |= 1 << (pos % 8);
        }
        let item_count = store.get_u64(COUNT_KEY)?.unwrap_or(0);

        tracing::debug!(%params, item_count, "opened bloom filter");

        Ok(Self {
            store,
            params,
            max_items: config.max_items,
            bits,
            item_count,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// The persisted parameters.
    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    /// Number of bits (`m`).
    pub fn filter_size(&self) -> u64 {
        self.params.filter_size
    }

    /// Number of hash functions (`k`).
    pub fn function_count(&self) -> u32 {
        self.params.function_count
    }

    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        self.params.digest_len as usize
    }

    /// Number of items currently stored.
    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    /// Length of the bit array in bytes.
    pub fn byte_len(&self) -> usize {
        self.bits.len()
    }

    /// The raw bit array.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Membership
    // ─────────────────────────────────────────────────────────────────────────

    /// Distinct bit positions for `digest`, ascending.
    pub fn positions(&self, digest: &Digest) -> Result<Vec<u64>> {
        let hashing =
            DoubleHashing::with_scheme(digest.as_bytes(), self.digest_len(), self.params.scheme)?;
        let mut positions: Vec<u64> = hashing
            .positions(self.params.function_count, self.params.filter_size)
            .collect();
        positions.sort_unstable();
        positions.dedup();
        Ok(positions)
    }

    /// True if every position of `digest` is set.
    ///
    /// May report false positives, never false negatives.
    pub fn contains(&self, digest: &Digest) -> Result<bool> {
        Ok(self
            .positions(digest)?
            .into_iter()
            .all(|pos| bit_is_set(&self.bits, pos)))
    }

    /// Add `digest` and commit immediately.
    pub fn add(&mut self, digest: &Digest) -> Result<()> {
        let store = Arc::clone(&self.store);
        let mut tx = Transaction::new(store.as_ref());
        let delta = self.stage_add(&mut tx, digest)?;
        tx.commit()?;
        self.apply(delta);
        Ok(())
    }

    /// Remove `digest` and commit immediately.
    ///
    /// Returns `false` without mutating anything if it was never added.
    pub fn remove(&mut self, digest: &Digest) -> Result<bool> {
        let store = Arc::clone(&self.store);
        let mut tx = Transaction::new(store.as_ref());
        let Some(delta) = self.stage_remove(&mut tx, digest)? else {
            return Ok(false);
        };
        tx.commit()?;
        self.apply(delta);
        Ok(true)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Staged Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Stage an add inside `tx`.
    ///
    /// The returned delta must be passed to [`apply`](Self::apply) once the
    /// transaction has committed.
    pub fn stage_add(&self, tx: &mut Transaction<'_, S>, digest: &Digest) -> Result<BloomDelta> {
        let positions = self.positions(digest)?;
        let count = tx.get_u64(COUNT_KEY)?.unwrap_or(0);
        if let Some(max) = self.max_items {
            if count >= max {
                return Err(BloomError::CapacityExceeded { max });
            }
        }

        for &pos in &positions {
            let key = index_key(pos);
            let mut entries = tx.get(&key)?.unwrap_or_default();
            entries.extend_from_slice(digest.as_bytes());
            tx.put(key, entries);
        }
        tx.put(COUNT_KEY, (count + 1).to_le_bytes());

        tracing::trace!(%digest, positions = positions.len(), "staged bloom add");
        Ok(BloomDelta {
            set: positions,
            cleared: Vec::new(),
            item_count: count + 1,
        })
    }

    /// Stage a remove inside `tx`.
    ///
    /// Returns `None` (nothing staged) unless every position of `digest`
    /// lists it in the reverse index.
    pub fn stage_remove(
        &self,
        tx: &mut Transaction<'_, S>,
        digest: &Digest,
    ) -> Result<Option<BloomDelta>> {
        let len = self.digest_len();
        let positions = self.positions(digest)?;

        // Verify first, mutate second.
        let mut updates = Vec::with_capacity(positions.len());
        for &pos in &positions {
            let key = index_key(pos);
            let Some(mut entries) = tx.get(&key)? else {
                return Ok(None);
            };
            let Some(slot) = entries
                .chunks_exact(len)
                .position(|entry| entry == digest.as_bytes())
            else {
                return Ok(None);
            };
            entries.drain(slot * len..(slot + 1) * len);
            updates.push((pos, key, entries));
        }

        let mut cleared = Vec::new();
        for (pos, key, remaining) in updates {
            if remaining.is_empty() {
                tx.delete(key);
                cleared.push(pos);
            } else {
                tx.put(key, remaining);
            }
        }
        let item_count = tx.get_u64(COUNT_KEY)?.unwrap_or(0).saturating_sub(1);
        tx.put(COUNT_KEY, item_count.to_le_bytes());

        tracing::trace!(%digest, cleared = cleared.len(), "staged bloom remove");
        Ok(Some(BloomDelta {
            set: Vec::new(),
            cleared,
            item_count,
        }))
    }

    /// Apply a committed delta to the in-memory bit array.
    pub fn apply(&mut self, delta: BloomDelta) {
        for pos in delta.set {
            self.bits[(pos / 8) as usize] |= 1 << (pos % 8);
        }
        for pos in delta.cleared {
            self.bits[(pos / 8) as usize] &= !(1 << (pos % 8));
        }
        self.item_count = delta.item_count;
    }

    /// Reset bits, reverse index and item count.
    pub fn clear(&mut self) -> Result<()> {
        let store = Arc::clone(&self.store);
        let mut tx = Transaction::new(store.as_ref());
        for (key, _) in tx.iterate(INDEX_PREFIX)? {
            tx.delete(key);
        }
        tx.put(COUNT_KEY, 0u64.to_le_bytes());
        tx.commit()?;

        self.bits.iter_mut().for_each(|b| *b = 0);
        self.item_count = 0;
        tracing::debug!("cleared bloom filter");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transfer
    // ─────────────────────────────────────────────────────────────────────────

    /// Copy bytes of the bit array starting at `offset` into `buf`.
    ///
    /// Returns the number of bytes written, less than `buf.len()` only at the
    /// end of the array.
    pub fn chunk(&self, offset: usize, buf: &mut [u8]) -> usize {
        copy_chunk(&self.bits, offset, buf)
    }

    /// Compare a segment of a remote bit array against the local one.
    ///
    /// `segment` holds remote bytes `[offset, offset + segment.len())`. For
    /// every bit set locally but clear remotely, `handler` receives each
    /// distinct digest recorded at that bit: candidates the remote side is
    /// missing. Returns the number of handler calls.
    pub fn diff<F>(&self, segment: &[u8], offset: usize, mut handler: F) -> Result<usize>
    where
        F: FnMut(Digest),
    {
        let end = offset
            .checked_add(segment.len())
            .filter(|end| *end <= self.bits.len())
            .ok_or(BloomError::SegmentOutOfRange {
                offset,
                len: segment.len(),
                filter_len: self.bits.len(),
            })?;

        let len = self.digest_len();
        let mut reported = 0;
        for (i, (&local, &remote)) in self.bits[offset..end].iter().zip(segment).enumerate() {
            let missing = local & !remote;
            if missing == 0 {
                continue;
            }
            for bit in 0..8u64 {
                if missing & (1 << bit) == 0 {
                    continue;
                }
                let pos = (offset + i) as u64 * 8 + bit;
                let Some(entries) = self.store.get(&index_key(pos))? else {
                    continue;
                };
                let mut seen = HashSet::new();
                for entry in entries.chunks_exact(len) {
                    let digest = Digest::from_slice(entry)?;
                    if seen.insert(digest) {
                        handler(digest);
                        reported += 1;
                    }
                }
            }
        }
        Ok(reported)
    }

    /// Immutable copy of the bit array and counters.
    pub fn snapshot(&self) -> FilterSnapshot {
        FilterSnapshot::new(
            self.params.filter_size,
            self.params.function_count,
            self.params.scheme,
            self.digest_len(),
            self.item_count,
            self.bits.clone(),
        )
    }

    /// Write a snapshot of the filter to `writer`.
    pub fn save<W: std::io::Write>(&self, writer: W) -> Result<()> {
        self.snapshot().save(writer)
    }
}

pub(crate) fn copy_chunk(bits: &[u8], offset: usize, buf: &mut [u8]) -> usize {
    if offset >= bits.len() {
        return 0;
    }
    let n = buf.len().min(bits.len() - offset);
    buf[..n].copy_from_slice(&bits[offset..offset + n]);
    n
}

impl<S> std::fmt::Debug for BloomFilter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("params", &self.params)
            .field("item_count", &self.item_count)
            .finish_non_exhaustive()
    }
}
