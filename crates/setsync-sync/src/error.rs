//! Error types for the sync module.

use thiserror::Error;

use setsync_bloom::BloomError;
use setsync_core::CoreError;
use setsync_store::StoreError;
use setsync_trie::TrieError;

use crate::process::SyncState;

/// Errors that can occur during synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The peer's stream is malformed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer's stream ended before synchronization finished.
    #[error("input ended in state {state}")]
    Truncated { state: SyncState },

    /// The peer aborted with an error message.
    #[error("peer error: {0}")]
    PeerError(String),

    /// Trie operation failed.
    #[error("trie error: {0}")]
    Trie(#[from] TrieError),

    /// Bloom filter operation failed.
    #[error("bloom filter error: {0}")]
    Bloom(#[from] BloomError),

    /// Digest or packet codec error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Timeout waiting for peer.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
