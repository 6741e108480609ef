//! Error types for the Merkle trie.

use thiserror::Error;

use setsync_core::{CoreError, Digest};
use setsync_store::StoreError;

/// Errors that can occur in trie operations.
#[derive(Debug, Error)]
pub enum TrieError {
    /// Storage error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Digest error (usually a length mismatch).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A node referenced by another node is absent from the store.
    #[error("node {0} is referenced but missing from the store")]
    MissingNode(Digest),

    /// A stored node record is malformed.
    #[error("corrupt node {hash}: {reason}")]
    CorruptNode { hash: Digest, reason: String },

    /// Deferred work must be flushed before reading hashes.
    #[error("trie has unflushed changes")]
    Unflushed,

    /// A subtrie budget must hold at least two digests.
    #[error("subtrie budget {0} is too small, need at least 2")]
    BudgetTooSmall(usize),

    /// A remote cut is not a whole number of digests.
    #[error("cut of {len} bytes is not a multiple of digest length {digest_len}")]
    InvalidCut { len: usize, digest_len: usize },

    /// The digest equals the hash of an existing internal node.
    #[error("digest {0} collides with an internal node hash")]
    HashCollision(Digest),
}

/// Result type for trie operations.
pub type Result<T> = std::result::Result<T, TrieError>;
