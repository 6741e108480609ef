//! # setsync Trie
//!
//! A content-addressed binary Merkle trie over fixed-length digests.
//!
//! ## Overview
//!
//! Set members are the leaves. Every inner node holds the common bit prefix
//! of the leaves below it and is hashed as `H(smaller ‖ larger)`, where the
//! smaller child is the one whose next bit is 0. The shape depends only on
//! the leaf set, so two tries are equal exactly when their root hashes are.
//!
//! Nodes are persisted one record per node under their own hash; parent and
//! child references are hashes, never pointers. Mutations run against an
//! in-memory working tree and are flushed as one store transaction.
//!
//! ## Key Types
//!
//! - [`Trie`] - The persistent trie
//! - [`Hashing`] - Rehash now, or defer until [`Trie::flush`]
//! - [`NodeKind`] - Classification of a hash (leaf, inner, unknown)
//! - [`NodeRecord`] - The versioned on-disk node record
//! - [`FlushReport`] - What a flush rehashed, wrote and deleted
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use setsync_core::{Blake3Digest, DigestFunction};
//! use setsync_store::MemoryStore;
//! use setsync_trie::{Hashing, Trie};
//!
//! let hasher = Blake3Digest::default();
//! let mut trie = Trie::open(Arc::new(MemoryStore::new()), hasher).unwrap();
//!
//! for item in ["bla1", "bla2", "bla3"] {
//!     trie.insert(&hasher.digest(item.as_bytes()), Hashing::Deferred).unwrap();
//! }
//! trie.flush().unwrap();
//!
//! let root = trie.root_hash().unwrap().unwrap();
//! let cut = trie.sub_trie(&root, 2).unwrap().unwrap();
//! assert_eq!(cut.len(), 2);
//! ```
//!
//! ## Design Notes
//!
//! - Reading hashes (root, equality, cuts, diffs) with deferred changes
//!   pending fails with [`TrieError::Unflushed`].
//! - A flush deletes the records of every node that left the tree, so the
//!   store never holds unreachable nodes.
//! - A digest equal to an existing inner node's hash cannot be inserted
//!   ([`TrieError::HashCollision`]).

pub mod cut;
pub mod error;
pub mod node;
pub mod trie;
mod working;

pub use error::{Result, TrieError};
pub use node::{node_key, NodeRecord, NODE_PREFIX, ROOT_KEY, SIZE_KEY};
pub use trie::{Hashing, NodeKind, Trie};
pub use working::FlushReport;
