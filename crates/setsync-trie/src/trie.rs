//! The Merkle trie.
//!
//! A binary trie over digest bits whose nodes are addressed by their own
//! hash. Leaves hash to the inserted digest, inner nodes to
//! `H(smaller ‖ larger)`, so equal root hashes mean equal leaf sets.

use std::sync::Arc;

use setsync_core::{Blake3Digest, Digest, DigestFunction};
use setsync_store::{KeyValueStore, StoreExt, Transaction};

use crate::error::{Result, TrieError};
use crate::node::{node_key, NodeRecord, ROOT_KEY, SIZE_KEY};
use crate::working::{FlushReport, WorkingTree};

/// When a mutation recomputes ancestor hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Hashing {
    /// Rehash and persist as part of the operation.
    #[default]
    Immediate,
    /// Leave ancestors stale until [`Trie::flush`].
    Deferred,
}

/// What a hash refers to in the trie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Not a node of this trie.
    NotFound,
    /// A set member.
    Leaf,
    /// An inner node standing for a subtree.
    Inner,
}

/// A persistent Merkle trie over digests.
pub struct Trie<S, H = Blake3Digest> {
    store: Arc<S>,
    hasher: H,
    root: Option<Digest>,
    size: u64,
    pending: Option<WorkingTree>,
}

impl<S: KeyValueStore, H: DigestFunction> Trie<S, H> {
    /// Open (or create) the trie stored in `store`.
    pub fn open(store: Arc<S>, hasher: H) -> Result<Self> {
        let root = match store.get(ROOT_KEY)? {
            Some(bytes) => Some(hasher.parse(&bytes)?),
            None => None,
        };
        let size = store.get_u64(SIZE_KEY)?.unwrap_or(0);
        if root.is_none() != (size == 0) {
            return Err(TrieError::CorruptNode {
                hash: root.unwrap_or(Digest::zero(hasher.output_len())?),
                reason: format!("root pointer and size {} disagree", size),
            });
        }
        tracing::debug!(root = ?root, size, "opened trie");

        Ok(Self {
            store,
            hasher,
            root,
            size,
            pending: None,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// The hash function keying leaves and inner nodes.
    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        self.hasher.output_len()
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Number of leaves, including pending changes.
    pub fn len(&self) -> u64 {
        self.pending.as_ref().map_or(self.size, WorkingTree::size)
    }

    /// True if the trie has no leaves.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while deferred changes await a flush.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Persisted hashes of nodes made stale by deferred changes.
    pub fn dirty_nodes(&self) -> Vec<Digest> {
        self.pending
            .as_ref()
            .map(WorkingTree::dirty_nodes)
            .unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert `digest`. Returns `false` if it is already a leaf.
    pub fn insert(&mut self, digest: &Digest, hashing: Hashing) -> Result<bool> {
        let inserted = self.stage_insert(digest)?;
        if hashing == Hashing::Immediate {
            self.flush()?;
        }
        Ok(inserted)
    }

    /// Erase `digest`. Returns `false` if it is not a leaf.
    pub fn erase(&mut self, digest: &Digest, hashing: Hashing) -> Result<bool> {
        let erased = self.stage_erase(digest)?;
        if hashing == Hashing::Immediate {
            self.flush()?;
        }
        Ok(erased)
    }

    /// Insert into the working tree without rehashing.
    pub fn stage_insert(&mut self, digest: &Digest) -> Result<bool> {
        self.hasher.parse(digest.as_bytes())?;
        if let Some(bytes) = self.store.get(&node_key(digest))? {
            if !NodeRecord::decode(digest, &bytes)?.is_leaf() {
                return Err(TrieError::HashCollision(*digest));
            }
        }
        let store = Arc::clone(&self.store);
        let (root, size) = (self.root, self.size);
        self.pending
            .get_or_insert_with(|| WorkingTree::new(root, size))
            .insert(store.as_ref(), *digest)
    }

    /// Erase from the working tree without rehashing.
    pub fn stage_erase(&mut self, digest: &Digest) -> Result<bool> {
        self.hasher.parse(digest.as_bytes())?;
        let store = Arc::clone(&self.store);
        let (root, size) = (self.root, self.size);
        self.pending
            .get_or_insert_with(|| WorkingTree::new(root, size))
            .erase(store.as_ref(), *digest)
    }

    /// Rehash pending changes and stage their records into `tx`.
    ///
    /// The working tree is consumed; call [`finish`](Self::finish) with the
    /// report once `tx` commits. If the commit fails, the trie keeps its
    /// previous root and the changes are lost.
    pub fn stage_flush(&mut self, tx: &mut Transaction<'_, S>) -> Result<Option<FlushReport>> {
        let Some(mut work) = self.pending.take() else {
            return Ok(None);
        };
        if !work.is_modified() {
            return Ok(None);
        }
        work.flush(tx, &self.hasher).map(Some)
    }

    /// Adopt the root and size of a committed flush.
    pub fn finish(&mut self, report: &FlushReport) {
        self.root = report.root;
        self.size = report.size;
        self.pending = None;
        tracing::debug!(
            root = ?report.root,
            size = report.size,
            rehashed = report.rehashed,
            written = report.written,
            deleted = report.deleted,
            "trie flushed"
        );
    }

    /// Rehash and persist every pending change in one transaction.
    pub fn flush(&mut self) -> Result<FlushReport> {
        let store = Arc::clone(&self.store);
        let mut tx = Transaction::new(store.as_ref());
        let Some(report) = self.stage_flush(&mut tx)? else {
            return Ok(FlushReport {
                root: self.root,
                size: self.size,
                ..FlushReport::default()
            });
        };
        tx.commit()?;
        self.finish(&report);
        Ok(report)
    }

    /// Discard pending changes. Returns `true` if there were any.
    pub fn abort(&mut self) -> bool {
        self.pending.take().is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn ensure_flushed(&self) -> Result<()> {
        match self.pending {
            Some(_) => Err(TrieError::Unflushed),
            None => Ok(()),
        }
    }

    /// Hash of the root node, `None` for an empty trie.
    pub fn root_hash(&self) -> Result<Option<Digest>> {
        self.ensure_flushed()?;
        Ok(self.root)
    }

    /// True if both tries hold the same leaf set (both empty counts).
    pub fn same_root<S2, H2>(&self, other: &Trie<S2, H2>) -> Result<bool>
    where
        S2: KeyValueStore,
        H2: DigestFunction,
    {
        Ok(self.root_hash()? == other.root_hash()?)
    }

    /// Look up a node record by hash.
    pub fn node(&self, hash: &Digest) -> Result<Option<NodeRecord>> {
        self.ensure_flushed()?;
        self.hasher.parse(hash.as_bytes())?;
        self.store
            .get(&node_key(hash))?
            .map(|bytes| NodeRecord::decode(hash, &bytes))
            .transpose()
    }

    /// Classify `hash`.
    pub fn contains(&self, hash: &Digest) -> Result<NodeKind> {
        Ok(match self.node(hash)? {
            None => NodeKind::NotFound,
            Some(record) if record.is_leaf() => NodeKind::Leaf,
            Some(_) => NodeKind::Inner,
        })
    }

    /// True if `digest` is a member of the set.
    pub fn contains_leaf(&self, digest: &Digest) -> Result<bool> {
        Ok(self.contains(digest)? == NodeKind::Leaf)
    }

    /// Every leaf, in ascending order.
    pub fn digests(&self) -> Result<Vec<Digest>> {
        self.ensure_flushed()?;
        let mut out = Vec::with_capacity(self.size as usize);
        let mut stack: Vec<Digest> = self.root.into_iter().collect();
        while let Some(hash) = stack.pop() {
            let bytes = self
                .store
                .get(&node_key(&hash))?
                .ok_or(TrieError::MissingNode(hash))?;
            match NodeRecord::decode(&hash, &bytes)?.children {
                None => out.push(hash),
                Some([smaller, larger]) => {
                    stack.push(larger);
                    stack.push(smaller);
                }
            }
        }
        Ok(out)
    }
}

impl<S, H> Drop for Trie<S, H> {
    fn drop(&mut self) {
        if self.pending.as_ref().is_some_and(WorkingTree::is_modified) {
            tracing::warn!("trie dropped with unflushed changes");
        }
    }
}

impl<S, H: std::fmt::Debug> std::fmt::Debug for Trie<S, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trie")
            .field("hasher", &self.hasher)
            .field("root", &self.root)
            .field("size", &self.size)
            .field("pending", &self.pending.is_some())
            .finish()
    }
}
