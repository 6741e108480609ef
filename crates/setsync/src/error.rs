//! Error types for synced sets.

use setsync_bloom::BloomError;
use setsync_core::CoreError;
use setsync_store::StoreError;
use setsync_sync::SyncError;
use setsync_trie::TrieError;
use thiserror::Error;

/// Errors that can occur during set operations.
#[derive(Debug, Error)]
pub enum SetError {
    /// Digest error (usually a length mismatch).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Trie error.
    #[error("trie error: {0}")]
    Trie(#[from] TrieError),

    /// Bloom filter error.
    #[error("bloom filter error: {0}")]
    Bloom(#[from] BloomError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The trie and the filter disagree about the set.
    #[error("trie and filter are inconsistent: {0}")]
    Inconsistent(String),
}

/// Result type for set operations.
pub type Result<T> = std::result::Result<T, SetError>;
