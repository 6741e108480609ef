//! The working tree: an in-memory arena that mutations run against.
//!
//! Nodes are pulled out of the store on demand and kept in slots; children
//! that have not been visited stay referenced by hash. Mutations only touch
//! the arena and mark ancestors stale (hash `None`). [`WorkingTree::flush`]
//! then rehashes bottom-up and stages every record change into one
//! transaction.

use setsync_core::{Digest, DigestFunction};
use setsync_store::{KeyValueStore, Transaction};

use crate::error::{Result, TrieError};
use crate::node::{node_key, NodeRecord, ROOT_KEY, SIZE_KEY};

/// A reference from a parent (or the root pointer) to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    /// Not loaded; only the hash is known.
    Stored(Digest),
    /// Loaded into the arena.
    Slot(usize),
}

#[derive(Debug)]
struct WorkNode {
    /// Hash the node is persisted under, if any.
    stored: Option<Digest>,
    /// Record bytes as read from the store.
    loaded: Option<Vec<u8>>,
    /// Current hash; `None` while stale.
    hash: Option<Digest>,
    prefix: Digest,
    prefix_len: u16,
    /// `[smaller, larger]`; `None` for leaves.
    children: Option<[Link; 2]>,
    parent: Option<usize>,
}

impl WorkNode {
    fn leaf(digest: Digest, parent: Option<usize>) -> Self {
        Self {
            stored: None,
            loaded: None,
            hash: Some(digest),
            prefix: digest,
            prefix_len: digest.bit_len() as u16,
            children: None,
            parent,
        }
    }
}

/// Outcome of a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Inner nodes whose hash was recomputed.
    pub rehashed: usize,
    /// Node records written.
    pub written: usize,
    /// Node records deleted.
    pub deleted: usize,
    /// Root hash after the flush.
    pub root: Option<Digest>,
    /// Leaf count after the flush.
    pub size: u64,
}

/// Pending mutations against a trie.
#[derive(Debug)]
pub(crate) struct WorkingTree {
    nodes: Vec<WorkNode>,
    root: Option<Link>,
    size: u64,
    /// Persisted hashes of nodes that left the tree.
    obsolete: Vec<Digest>,
    modified: bool,
}

impl WorkingTree {
    pub(crate) fn new(root: Option<Digest>, size: u64) -> Self {
        Self {
            nodes: Vec::new(),
            root: root.map(Link::Stored),
            size,
            obsolete: Vec::new(),
            modified: false,
        }
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn is_modified(&self) -> bool {
        self.modified
    }

    /// Persisted hashes of nodes whose hash is stale.
    pub(crate) fn dirty_nodes(&self) -> Vec<Digest> {
        self.reachable()
            .into_iter()
            .filter(|slot| self.nodes[*slot].hash.is_none())
            .filter_map(|slot| self.nodes[slot].stored)
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a leaf. Returns `false` if it is already present.
    pub(crate) fn insert<S>(&mut self, store: &S, digest: Digest) -> Result<bool>
    where
        S: KeyValueStore + ?Sized,
    {
        let Some(mut cur) = self.root_slot(store)? else {
            let slot = self.push(WorkNode::leaf(digest, None));
            self.root = Some(Link::Slot(slot));
            self.size += 1;
            self.modified = true;
            return Ok(true);
        };

        loop {
            let node = &self.nodes[cur];
            let prefix_len = usize::from(node.prefix_len);
            let common = node.prefix.common_prefix_len(&digest, prefix_len);
            if common < prefix_len {
                self.split(cur, digest, common);
                self.size += 1;
                self.modified = true;
                return Ok(true);
            }
            let Some(children) = node.children else {
                // Full-length match on a leaf.
                return Ok(false);
            };
            let side = usize::from(digest.bit(prefix_len));
            cur = self.resolve(store, cur, side, children[side])?;
        }
    }

    /// Erase a leaf. Returns `false` if it is absent.
    pub(crate) fn erase<S>(&mut self, store: &S, digest: Digest) -> Result<bool>
    where
        S: KeyValueStore + ?Sized,
    {
        let Some(mut cur) = self.root_slot(store)? else {
            return Ok(false);
        };

        loop {
            let node = &self.nodes[cur];
            let prefix_len = usize::from(node.prefix_len);
            if node.prefix.common_prefix_len(&digest, prefix_len) < prefix_len {
                return Ok(false);
            }
            match node.children {
                None => break,
                Some(children) => {
                    let side = usize::from(digest.bit(prefix_len));
                    cur = self.resolve(store, cur, side, children[side])?;
                }
            }
        }

        self.retire(cur);
        match self.nodes[cur].parent {
            None => self.root = None,
            Some(parent) => {
                let Some(children) = self.nodes[parent].children else {
                    return Err(TrieError::CorruptNode {
                        hash: digest,
                        reason: "parent has no children".into(),
                    });
                };
                // Collapse: the sibling takes the parent's place.
                let sibling = if children[0] == Link::Slot(cur) {
                    children[1]
                } else {
                    children[0]
                };
                let grand = self.nodes[parent].parent;
                if let Link::Slot(s) = sibling {
                    self.nodes[s].parent = grand;
                }
                self.replace_link(grand, parent, sibling);
                self.retire(parent);
                self.invalidate(grand);
            }
        }
        self.size = self.size.saturating_sub(1);
        self.modified = true;
        Ok(true)
    }

    /// Rehash and stage every change into `tx`.
    pub(crate) fn flush<S, H>(&mut self, tx: &mut Transaction<'_, S>, hasher: &H) -> Result<FlushReport>
    where
        S: KeyValueStore + ?Sized,
        H: DigestFunction + ?Sized,
    {
        let mut report = FlushReport {
            size: self.size,
            ..FlushReport::default()
        };

        report.root = match self.root {
            None => None,
            Some(Link::Stored(hash)) => Some(hash),
            Some(Link::Slot(slot)) => Some(self.rehash(hasher, slot, &mut report.rehashed)),
        };

        let reachable = self.reachable();

        // Deletes go first: a key re-created in this batch must survive.
        let mut deletes = std::mem::take(&mut self.obsolete);
        for &slot in &reachable {
            let node = &self.nodes[slot];
            if let (Some(old), Some(new)) = (node.stored, node.hash) {
                if old != new {
                    deletes.push(old);
                }
            }
        }
        for hash in &deletes {
            tx.delete(node_key(hash));
        }
        report.deleted = deletes.len();

        // Unloaded nodes whose parent may have changed.
        let mut adopted: Vec<(Digest, Option<Digest>)> = Vec::new();
        for &slot in &reachable {
            let node = &self.nodes[slot];
            let hash = self.slot_hash(slot);
            let record = NodeRecord {
                prefix_len: node.prefix_len,
                prefix: node.prefix,
                parent: node.parent.map(|p| self.slot_hash(p)),
                children: node
                    .children
                    .map(|[smaller, larger]| [self.link_hash(smaller), self.link_hash(larger)]),
            }
            .encode();

            if node.stored != Some(hash) || node.loaded.as_deref() != Some(record.as_slice()) {
                tx.put(node_key(&hash), record);
                report.written += 1;
            }
            for link in node.children.into_iter().flatten() {
                if let Link::Stored(child) = link {
                    adopted.push((child, Some(hash)));
                }
            }
        }
        if let Some(Link::Stored(root)) = self.root {
            adopted.push((root, None));
        }

        for (child, parent) in adopted {
            let key = node_key(&child);
            let bytes = tx.get(&key)?.ok_or(TrieError::MissingNode(child))?;
            let mut record = NodeRecord::decode(&child, &bytes)?;
            if record.parent != parent {
                record.parent = parent;
                tx.put(key, record.encode());
                report.written += 1;
            }
        }

        match report.root {
            Some(root) => tx.put(ROOT_KEY, root.as_bytes()),
            None => tx.delete(ROOT_KEY),
        }
        tx.put(SIZE_KEY, self.size.to_le_bytes());

        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Arena helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn push(&mut self, node: WorkNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn load<S>(&mut self, store: &S, hash: Digest, parent: Option<usize>) -> Result<usize>
    where
        S: KeyValueStore + ?Sized,
    {
        let bytes = store
            .get(&node_key(&hash))?
            .ok_or(TrieError::MissingNode(hash))?;
        let record = NodeRecord::decode(&hash, &bytes)?;
        Ok(self.push(WorkNode {
            stored: Some(hash),
            loaded: Some(bytes),
            hash: Some(hash),
            prefix: record.prefix,
            prefix_len: record.prefix_len,
            children: record
                .children
                .map(|[smaller, larger]| [Link::Stored(smaller), Link::Stored(larger)]),
            parent,
        }))
    }

    fn root_slot<S>(&mut self, store: &S) -> Result<Option<usize>>
    where
        S: KeyValueStore + ?Sized,
    {
        match self.root {
            None => Ok(None),
            Some(Link::Slot(slot)) => Ok(Some(slot)),
            Some(Link::Stored(hash)) => {
                let slot = self.load(store, hash, None)?;
                self.root = Some(Link::Slot(slot));
                Ok(Some(slot))
            }
        }
    }

    /// Turn child `side` of `parent` into an arena slot.
    fn resolve<S>(&mut self, store: &S, parent: usize, side: usize, link: Link) -> Result<usize>
    where
        S: KeyValueStore + ?Sized,
    {
        match link {
            Link::Slot(slot) => Ok(slot),
            Link::Stored(hash) => {
                let slot = self.load(store, hash, Some(parent))?;
                if let Some(children) = self.nodes[parent].children.as_mut() {
                    children[side] = Link::Slot(slot);
                }
                Ok(slot)
            }
        }
    }

    /// Put a new inner node above `existing`, with a new leaf beside it.
    fn split(&mut self, existing: usize, digest: Digest, common: usize) {
        let parent = self.nodes[existing].parent;
        let inner = self.nodes.len();
        let leaf = inner + 1;
        let children = if digest.bit(common) {
            [Link::Slot(existing), Link::Slot(leaf)]
        } else {
            [Link::Slot(leaf), Link::Slot(existing)]
        };

        self.push(WorkNode {
            stored: None,
            loaded: None,
            hash: None,
            prefix: digest.truncated(common),
            prefix_len: common as u16,
            children: Some(children),
            parent,
        });
        self.push(WorkNode::leaf(digest, Some(inner)));
        self.nodes[existing].parent = Some(inner);
        self.replace_link(parent, existing, Link::Slot(inner));
        self.invalidate(parent);
    }

    fn replace_link(&mut self, parent: Option<usize>, old: usize, new: Link) {
        match parent {
            None => self.root = Some(new),
            Some(p) => {
                if let Some(children) = self.nodes[p].children.as_mut() {
                    for link in children.iter_mut() {
                        if *link == Link::Slot(old) {
                            *link = new;
                        }
                    }
                }
            }
        }
    }

    /// Mark `slot` and its ancestors stale.
    fn invalidate(&mut self, mut slot: Option<usize>) {
        while let Some(s) = slot {
            let node = &mut self.nodes[s];
            // Ancestors of a stale node are already stale.
            if node.hash.is_none() {
                break;
            }
            node.hash = None;
            slot = node.parent;
        }
    }

    /// Detach a node; its record is deleted at flush.
    fn retire(&mut self, slot: usize) {
        if let Some(hash) = self.nodes[slot].stored.take() {
            self.obsolete.push(hash);
        }
        self.nodes[slot].loaded = None;
    }

    fn rehash<H>(&mut self, hasher: &H, slot: usize, count: &mut usize) -> Digest
    where
        H: DigestFunction + ?Sized,
    {
        if let Some(hash) = self.nodes[slot].hash {
            return hash;
        }
        let Some(children) = self.nodes[slot].children else {
            return self.nodes[slot].prefix;
        };
        let mut hashes = [self.nodes[slot].prefix; 2];
        for (side, link) in children.into_iter().enumerate() {
            hashes[side] = match link {
                Link::Stored(hash) => hash,
                Link::Slot(child) => self.rehash(hasher, child, count),
            };
        }
        let hash = hasher.digest_pair(&hashes[0], &hashes[1]);
        self.nodes[slot].hash = Some(hash);
        *count += 1;
        hash
    }

    fn slot_hash(&self, slot: usize) -> Digest {
        let node = &self.nodes[slot];
        node.hash.unwrap_or(node.prefix)
    }

    fn link_hash(&self, link: Link) -> Digest {
        match link {
            Link::Stored(hash) => hash,
            Link::Slot(slot) => self.slot_hash(slot),
        }
    }

    /// Arena slots reachable from the root, parents before children.
    fn reachable(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = Vec::new();
        if let Some(Link::Slot(root)) = self.root {
            stack.push(root);
        }
        while let Some(slot) = stack.pop() {
            out.push(slot);
            for link in self.nodes[slot].children.into_iter().flatten() {
                if let Link::Slot(child) = link {
                    stack.push(child);
                }
            }
        }
        out
    }
}
