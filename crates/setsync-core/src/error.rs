//! Error types for the setsync core.

use thiserror::Error;

/// Core errors: digest handling and packet framing.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("digest length mismatch: expected {expected} bytes, got {got}")]
    DigestLength { expected: usize, got: usize },

    #[error("digest of {0} bytes is too short for double hashing (need at least 16)")]
    DigestTooShort(usize),

    #[error("unsupported digest length: {0}")]
    UnsupportedDigestLength(usize),

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("subtrie packet carries {0} digests, limit is 64")]
    SubtrieTooLarge(u64),

    #[error("unknown packet type byte: {0:#04x}")]
    UnknownPacketType(u8),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
