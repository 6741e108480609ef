//! Node records: the persisted form of a trie node.
//!
//! Each node is stored under `b"mt/n/" ‖ hash`. The hash is the key and is
//! not repeated in the value. Record layout (version 1):
//!
//! ```text
//! version   u8     = 1
//! flags     u8     bit0 = has parent, bit1 = has children
//! prefix_len u16 BE
//! prefix    digest_len bytes, bits past prefix_len zero
//! parent    digest_len bytes   (if has parent)
//! smaller   digest_len bytes   (if has children)
//! larger    digest_len bytes   (if has children)
//! ```

use setsync_core::Digest;

use crate::error::{Result, TrieError};

/// Prefix of node records.
pub const NODE_PREFIX: &[u8] = b"mt/n/";
/// Hash of the current root node; absent when the trie is empty.
pub const ROOT_KEY: &[u8] = b"mt/root";
/// Leaf count (u64 LE).
pub const SIZE_KEY: &[u8] = b"mt/size";

/// Current record version.
pub const RECORD_VERSION: u8 = 1;

const HAS_PARENT: u8 = 0b01;
const HAS_CHILDREN: u8 = 0b10;

/// Store key for the node with `hash`.
pub fn node_key(hash: &Digest) -> Vec<u8> {
    let mut key = Vec::with_capacity(NODE_PREFIX.len() + hash.len());
    key.extend_from_slice(NODE_PREFIX);
    key.extend_from_slice(hash.as_bytes());
    key
}

/// Decoded node record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRecord {
    /// Number of meaningful prefix bits.
    pub prefix_len: u16,
    /// Shared prefix of every leaf below, zero past `prefix_len`.
    pub prefix: Digest,
    /// Hash of the parent node, `None` for the root.
    pub parent: Option<Digest>,
    /// `[smaller, larger]` child hashes, `None` for leaves.
    pub children: Option<[Digest; 2]>,
}

impl NodeRecord {
    /// True if the record has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Serialize to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let digest_len = self.prefix.len();
        let mut flags = 0;
        if self.parent.is_some() {
            flags |= HAS_PARENT;
        }
        if self.children.is_some() {
            flags |= HAS_CHILDREN;
        }

        let mut out = Vec::with_capacity(4 + digest_len * 4);
        out.push(RECORD_VERSION);
        out.push(flags);
        out.extend_from_slice(&self.prefix_len.to_be_bytes());
        out.extend_from_slice(self.prefix.as_bytes());
        if let Some(parent) = &self.parent {
            out.extend_from_slice(parent.as_bytes());
        }
        if let Some([smaller, larger]) = &self.children {
            out.extend_from_slice(smaller.as_bytes());
            out.extend_from_slice(larger.as_bytes());
        }
        out
    }

    /// Parse the record stored under `hash`.
    pub fn decode(hash: &Digest, bytes: &[u8]) -> Result<Self> {
        let corrupt = |reason: String| TrieError::CorruptNode {
            hash: *hash,
            reason,
        };
        let digest_len = hash.len();

        if bytes.len() < 4 {
            return Err(corrupt(format!("record of {} bytes", bytes.len())));
        }
        if bytes[0] != RECORD_VERSION {
            return Err(corrupt(format!("unsupported record version {}", bytes[0])));
        }
        let flags = bytes[1];
        if flags & !(HAS_PARENT | HAS_CHILDREN) != 0 {
            return Err(corrupt(format!("unknown flags {:#04x}", flags)));
        }
        let prefix_len = u16::from_be_bytes([bytes[2], bytes[3]]);
        if usize::from(prefix_len) > digest_len * 8 {
            return Err(corrupt(format!("prefix length {} too long", prefix_len)));
        }

        let mut fields = 1;
        if flags & HAS_PARENT != 0 {
            fields += 1;
        }
        if flags & HAS_CHILDREN != 0 {
            fields += 2;
        }
        let expected = 4 + fields * digest_len;
        if bytes.len() != expected {
            return Err(corrupt(format!(
                "expected {} bytes, got {}",
                expected,
                bytes.len()
            )));
        }

        let mut digests = bytes[4..]
            .chunks_exact(digest_len)
            .map(Digest::from_slice);
        let mut next = || -> Result<Digest> {
            match digests.next() {
                Some(d) => Ok(d?),
                None => Err(corrupt("truncated record".into())),
            }
        };

        let prefix = next()?;
        let parent = if flags & HAS_PARENT != 0 {
            Some(next()?)
        } else {
            None
        };
        let children = if flags & HAS_CHILDREN != 0 {
            Some([next()?, next()?])
        } else {
            None
        };

        let record = Self {
            prefix_len,
            prefix,
            parent,
            children,
        };
        if record.is_leaf() && (usize::from(prefix_len) != digest_len * 8 || prefix != *hash) {
            return Err(corrupt("leaf prefix does not match its hash".into()));
        }
        if !record.is_leaf() && usize::from(prefix_len) == digest_len * 8 {
            return Err(corrupt("inner node with full-length prefix".into()));
        }
        Ok(record)
    }
}
