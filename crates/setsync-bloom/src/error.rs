//! Error types for the Bloom filter.

use thiserror::Error;

use setsync_core::CoreError;
use setsync_store::StoreError;

/// Errors that can occur in Bloom filter operations.
#[derive(Debug, Error)]
pub enum BloomError {
    /// Storage error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Digest or hashing error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// False-positive rate outside the open interval (0, 1).
    #[error("false positive rate must be in (0, 1), got {0}")]
    InvalidFalsePositiveRate(f64),

    /// Sized for zero expected items.
    #[error("expected item count must be positive")]
    ZeroCapacity,

    /// The configured hard maximum has been reached.
    #[error("filter is full: {max} items")]
    CapacityExceeded { max: u64 },

    /// Persisted parameters differ from the configured ones.
    #[error("filter parameters mismatch: stored {stored}, configured {configured}")]
    ParamsMismatch { stored: String, configured: String },

    /// Parameter record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A reverse index record is malformed.
    #[error("corrupt reverse index entry: {0}")]
    CorruptIndex(String),

    /// A diff segment does not fit inside the local bit array.
    #[error("segment [{offset}, {offset}+{len}) exceeds filter of {filter_len} bytes")]
    SegmentOutOfRange {
        offset: usize,
        len: usize,
        filter_len: usize,
    },

    /// Snapshot stream is malformed.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// I/O error while reading or writing a snapshot.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Bloom filter operations.
pub type Result<T> = std::result::Result<T, BloomError>;
