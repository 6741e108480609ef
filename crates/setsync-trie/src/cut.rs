//! Bounded subtrie cuts and cut diffing.
//!
//! A cut of node `h` with budget `b` is a list of at most `b` hashes whose
//! subtrees partition the leaves under `h`. Inner hashes stand in for whole
//! unexpanded subtrees. The budget is split evenly between the two children
//! of every expanded node; a side that cannot use its half (fewer leaves than
//! budget) hands the rest to its sibling.

use std::collections::HashMap;

use setsync_core::{Digest, DigestFunction};
use setsync_store::KeyValueStore;

use crate::error::{Result, TrieError};
use crate::node::{node_key, NodeRecord};
use crate::trie::{NodeKind, Trie};

/// Records read while computing one cut.
struct NodeCache<'t, S> {
    store: &'t S,
    records: HashMap<Digest, NodeRecord>,
}

impl<'t, S: KeyValueStore> NodeCache<'t, S> {
    fn new(store: &'t S) -> Self {
        Self {
            store,
            records: HashMap::new(),
        }
    }

    fn get(&mut self, hash: &Digest) -> Result<NodeRecord> {
        if let Some(record) = self.records.get(hash) {
            return Ok(*record);
        }
        let bytes = self
            .store
            .get(&node_key(hash))?
            .ok_or(TrieError::MissingNode(*hash))?;
        let record = NodeRecord::decode(hash, &bytes)?;
        self.records.insert(*hash, record);
        Ok(record)
    }

    /// Leaves under `hash`, counting no further than `cap`.
    fn leaf_count(&mut self, hash: &Digest, cap: usize) -> Result<usize> {
        let mut count = 0;
        let mut stack = vec![*hash];
        while let Some(next) = stack.pop() {
            match self.get(&next)?.children {
                None => {
                    count += 1;
                    if count >= cap {
                        return Ok(cap);
                    }
                }
                Some(children) => stack.extend(children),
            }
        }
        Ok(count)
    }

    fn cut(&mut self, hash: Digest, budget: usize, out: &mut Vec<Digest>) -> Result<()> {
        let children = match self.get(&hash)?.children {
            Some(children) if budget >= 2 => children,
            _ => {
                out.push(hash);
                return Ok(());
            }
        };
        let [smaller, larger] = children;
        let smaller_leaves = self.leaf_count(&smaller, budget)?;
        let larger_leaves = self.leaf_count(&larger, budget)?;

        let mut left = budget / 2;
        let mut right = budget - left;
        if left > smaller_leaves {
            right += left - smaller_leaves;
            left = smaller_leaves;
        }
        if right > larger_leaves {
            left = smaller_leaves.min(left + right - larger_leaves);
            right = larger_leaves;
        }

        self.cut(smaller, left, out)?;
        self.cut(larger, right, out)
    }
}

impl<S: KeyValueStore, H: DigestFunction> Trie<S, H> {
    /// Cut of the subtree rooted at `root`, at most `budget` digests long.
    ///
    /// Returns `None` if `root` is not a node of this trie. A leaf's cut is
    /// the leaf itself.
    pub fn sub_trie(&self, root: &Digest, budget: usize) -> Result<Option<Vec<Digest>>> {
        if budget < 2 {
            return Err(TrieError::BudgetTooSmall(budget));
        }
        if self.contains(root)? == NodeKind::NotFound {
            return Ok(None);
        }
        let mut cache = NodeCache::new(self.store().as_ref());
        let mut out = Vec::with_capacity(budget);
        cache.cut(*root, budget, &mut out)?;
        Ok(Some(out))
    }

    /// Write the cut of `root` into `buf`, sized by how many digests fit.
    ///
    /// Returns the number of bytes written, zero if `root` is unknown.
    pub fn sub_trie_into(&self, root: &Digest, buf: &mut [u8]) -> Result<usize> {
        let digest_len = self.digest_len();
        let Some(cut) = self.sub_trie(root, buf.len() / digest_len)? else {
            return Ok(0);
        };
        for (slot, hash) in buf.chunks_exact_mut(digest_len).zip(&cut) {
            slot.copy_from_slice(hash.as_bytes());
        }
        Ok(cut.len() * digest_len)
    }

    /// Report every hash in a remote cut that this trie does not have.
    ///
    /// Returns the number of hashes reported.
    pub fn diff<F>(&self, cut: &[u8], mut handler: F) -> Result<usize>
    where
        F: FnMut(Digest),
    {
        let digest_len = self.digest_len();
        if cut.len() % digest_len != 0 {
            return Err(TrieError::InvalidCut {
                len: cut.len(),
                digest_len,
            });
        }
        let mut reported = 0;
        for chunk in cut.chunks_exact(digest_len) {
            let hash = self.hasher().parse(chunk)?;
            if self.contains(&hash)? == NodeKind::NotFound {
                handler(hash);
                reported += 1;
            }
        }
        Ok(reported)
    }
}
