//! The synced set: a Merkle trie and a counting Bloom filter kept in step.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use setsync_bloom::{BloomConfig, BloomDelta, BloomFilter};
use setsync_core::{Blake3Digest, Digest, DigestFunction};
use setsync_store::{KeyValueStore, Transaction};
use setsync_sync::{SyncConfig, SyncEvent, SyncProcess, SyncReport, SyncSession, Transport};
use setsync_trie::{NodeKind, Trie};

use crate::error::{Result, SetError};

/// Configuration for a synced set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetConfig {
    /// Digest length in bytes.
    pub digest_len: usize,
    /// Bloom filter sizing.
    pub bloom: BloomConfig,
    /// Defaults for synchronization runs.
    pub sync: SyncConfig,
}

impl Default for SetConfig {
    fn default() -> Self {
        Self {
            digest_len: Blake3Digest::DEFAULT_LEN,
            bloom: BloomConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

/// A persistent set of digests that can synchronize with a peer.
///
/// Owns a [`Trie`] and a [`BloomFilter`] over one shared store. Every
/// mutation stages both structures into a single [`Transaction`], so after
/// any call either both have changed or neither has.
pub struct SyncedSet<S, H = Blake3Digest> {
    store: Arc<S>,
    trie: Trie<S, H>,
    filter: BloomFilter<S>,
    config: SetConfig,
}

impl<S: KeyValueStore> SyncedSet<S> {
    /// Open a set keyed by blake3 at the configured digest length.
    pub fn open(store: S, config: SetConfig) -> Result<Self> {
        let hasher = Blake3Digest::with_len(config.digest_len)?;
        Self::with_hasher(Arc::new(store), hasher, config)
    }
}

impl<S: KeyValueStore, H: DigestFunction> SyncedSet<S, H> {
    /// Open a set with a custom digest function.
    pub fn with_hasher(store: Arc<S>, hasher: H, config: SetConfig) -> Result<Self> {
        if hasher.output_len() != config.digest_len {
            return Err(SetError::Config(format!(
                "hash function produces {} bytes, configured digest length is {}",
                hasher.output_len(),
                config.digest_len
            )));
        }
        config.sync.validate()?;

        let trie = Trie::open(Arc::clone(&store), hasher)?;
        let filter = BloomFilter::open(Arc::clone(&store), config.digest_len, &config.bloom)?;
        if trie.len() != filter.item_count() {
            return Err(SetError::Inconsistent(format!(
                "trie holds {} digests, filter counts {}",
                trie.len(),
                filter.item_count()
            )));
        }

        tracing::debug!(
            items = trie.len(),
            digest_len = config.digest_len,
            filter_size = filter.filter_size(),
            "synced set opened"
        );
        Ok(Self {
            store,
            trie,
            filter,
            config,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// The set configuration.
    pub fn config(&self) -> &SetConfig {
        &self.config
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The Merkle trie (read-only).
    pub fn trie(&self) -> &Trie<S, H> {
        &self.trie
    }

    /// The Bloom filter (read-only).
    pub fn filter(&self) -> &BloomFilter<S> {
        &self.filter
    }

    /// The digest function.
    pub fn hasher(&self) -> &H {
        self.trie.hasher()
    }

    /// Number of digests in the set.
    pub fn len(&self) -> u64 {
        self.trie.len()
    }

    /// True if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a digest. Returns `false` if it was already present.
    pub fn insert(&mut self, digest: &Digest) -> Result<bool> {
        Ok(self.extend([*digest])? == 1)
    }

    /// Hash `data` and insert the result.
    pub fn insert_data(&mut self, data: &[u8]) -> Result<(Digest, bool)> {
        let digest = self.hasher().digest(data);
        let inserted = self.insert(&digest)?;
        Ok((digest, inserted))
    }

    /// Insert many digests with one rehash and one commit.
    ///
    /// Returns how many were new. On error nothing is written.
    pub fn extend<I>(&mut self, digests: I) -> Result<usize>
    where
        I: IntoIterator<Item = Digest>,
    {
        let store = Arc::clone(&self.store);
        let mut tx = Transaction::new(store.as_ref());

        let deltas = match self.stage_inserts(&mut tx, digests) {
            Ok(deltas) => deltas,
            Err(e) => {
                self.trie.abort();
                return Err(e);
            }
        };
        let added = deltas.len();
        self.commit(tx, deltas)?;

        if added > 0 {
            tracing::debug!(added, items = self.len(), "digests inserted");
        }
        Ok(added)
    }

    /// Remove a digest. Returns `false` if it was not present.
    pub fn remove(&mut self, digest: &Digest) -> Result<bool> {
        Ok(self.remove_all([*digest])? == 1)
    }

    /// Remove many digests with one rehash and one commit.
    pub fn remove_all<I>(&mut self, digests: I) -> Result<usize>
    where
        I: IntoIterator<Item = Digest>,
    {
        let store = Arc::clone(&self.store);
        let mut tx = Transaction::new(store.as_ref());

        let deltas = match self.stage_removes(&mut tx, digests) {
            Ok(deltas) => deltas,
            Err(e) => {
                self.trie.abort();
                return Err(e);
            }
        };
        let removed = deltas.len();
        self.commit(tx, deltas)?;

        if removed > 0 {
            tracing::debug!(removed, items = self.len(), "digests removed");
        }
        Ok(removed)
    }

    /// Insert the digests a synchronization reported missing.
    pub fn apply_missing<I>(&mut self, missing: I) -> Result<usize>
    where
        I: IntoIterator<Item = Digest>,
    {
        self.extend(missing)
    }

    fn stage_inserts<I>(&mut self, tx: &mut Transaction<'_, S>, digests: I) -> Result<Vec<BloomDelta>>
    where
        I: IntoIterator<Item = Digest>,
    {
        let mut deltas = Vec::new();
        for digest in digests {
            if self.trie.stage_insert(&digest)? {
                deltas.push(self.filter.stage_add(tx, &digest)?);
            }
        }
        Ok(deltas)
    }

    fn stage_removes<I>(&mut self, tx: &mut Transaction<'_, S>, digests: I) -> Result<Vec<BloomDelta>>
    where
        I: IntoIterator<Item = Digest>,
    {
        let mut deltas = Vec::new();
        for digest in digests {
            if !self.trie.stage_erase(&digest)? {
                continue;
            }
            match self.filter.stage_remove(tx, &digest)? {
                Some(delta) => deltas.push(delta),
                None => {
                    return Err(SetError::Inconsistent(format!(
                        "{} is in the trie but not in the filter",
                        digest
                    )))
                }
            }
        }
        Ok(deltas)
    }

    /// Stage the trie flush, commit, then publish both in-memory states.
    fn commit(&mut self, mut tx: Transaction<'_, S>, deltas: Vec<BloomDelta>) -> Result<()> {
        let report = match self.trie.stage_flush(&mut tx) {
            Ok(report) => report,
            Err(e) => {
                self.trie.abort();
                return Err(e.into());
            }
        };
        if tx.is_empty() {
            return Ok(());
        }
        tx.commit()?;

        for delta in deltas {
            self.filter.apply(delta);
        }
        if let Some(report) = &report {
            self.trie.finish(report);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Check membership. A Bloom negative answers without touching the trie.
    pub fn contains(&self, digest: &Digest) -> Result<bool> {
        self.hasher().parse(digest.as_bytes())?;
        if !self.filter.contains(digest)? {
            return Ok(false);
        }
        Ok(self.trie.contains_leaf(digest)?)
    }

    /// Classify `hash` as a leaf, an inner node or unknown.
    pub fn node_kind(&self, hash: &Digest) -> Result<NodeKind> {
        Ok(self.trie.contains(hash)?)
    }

    /// The Merkle root, or `None` for an empty set.
    pub fn root_hash(&self) -> Result<Option<Digest>> {
        Ok(self.trie.root_hash()?)
    }

    /// True if both sets hold exactly the same digests.
    pub fn same_content<S2, H2>(&self, other: &SyncedSet<S2, H2>) -> Result<bool>
    where
        S2: KeyValueStore,
        H2: DigestFunction,
    {
        Ok(self.trie.same_root(&other.trie)?)
    }

    /// All digests in ascending order.
    pub fn digests(&self) -> Result<Vec<Digest>> {
        Ok(self.trie.digests()?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Synchronization
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a synchronization process over this set.
    ///
    /// The process borrows the set, so the set cannot change until it is
    /// dropped. Apply what it reports with [`apply_missing`](Self::apply_missing).
    pub fn sync_process<F>(&self, config: &SyncConfig, handler: F) -> Result<SyncProcess<'_, S, H, F>>
    where
        F: FnMut(SyncEvent),
    {
        Ok(SyncProcess::new(&self.trie, &self.filter, config, handler)?)
    }

    /// Synchronize with the session's peer. Nothing is applied locally.
    pub async fn sync_with<T: Transport>(&self, session: &SyncSession<T>) -> Result<SyncReport> {
        Ok(session.run(&self.trie, &self.filter).await?)
    }

    /// Synchronize with the session's peer and insert what it has that we lack.
    pub async fn reconcile<T: Transport>(&mut self, session: &SyncSession<T>) -> Result<SyncReport> {
        let report = self.sync_with(session).await?;
        let added = self.apply_missing(report.missing.iter().copied())?;
        tracing::info!(peer = %session.peer(), added, items = self.len(), "reconciled with peer");
        Ok(report)
    }
}

impl<S, H: std::fmt::Debug> std::fmt::Debug for SyncedSet<S, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncedSet")
            .field("trie", &self.trie)
            .field("filter", &self.filter)
            .field("config", &self.config)
            .finish()
    }
}
