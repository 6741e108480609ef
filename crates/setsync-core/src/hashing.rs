//! Double hashing: an unbounded family of hash functions from one digest.
//!
//! The Bloom filter needs `k` independent-looking hash functions per item.
//! Instead of running the cryptographic hash `k` times, the digest is split
//! into two 64-bit words and combined as
//!
//! ```text
//! g_i(d) = f1 + (i + 1) * f2            (wrapping)
//! ```
//!
//! The extended variant also folds every digest byte past the first 16 into
//! a third word `f3` and adds `i * f3`.

use serde::{Deserialize, Serialize};

use crate::digest::MIN_DIGEST_LEN;
use crate::error::{CoreError, Result};

/// Which member of the scheme family to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HashScheme {
    /// `f1 + (i+1)·f2`.
    #[default]
    Double,
    /// `f1 + (i+1)·f2 + i·f3`, with `f3` folded from bytes past 16.
    Extended,
}

/// Hash function family derived from a single digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoubleHashing {
    f1: u64,
    f2: u64,
    f3: u64,
}

impl DoubleHashing {
    /// Build the plain scheme from `digest`.
    ///
    /// `expected_len` is the configured digest size; a mismatch, or a digest
    /// shorter than 16 bytes, is a usage error.
    pub fn new(digest: &[u8], expected_len: usize) -> Result<Self> {
        Self::with_scheme(digest, expected_len, HashScheme::Double)
    }

    /// Build the extended scheme from `digest`.
    pub fn extended(digest: &[u8], expected_len: usize) -> Result<Self> {
        Self::with_scheme(digest, expected_len, HashScheme::Extended)
    }

    /// Build the requested scheme from `digest`.
    pub fn with_scheme(digest: &[u8], expected_len: usize, scheme: HashScheme) -> Result<Self> {
        if digest.len() != expected_len {
            return Err(CoreError::DigestLength {
                expected: expected_len,
                got: digest.len(),
            });
        }
        if digest.len() < MIN_DIGEST_LEN {
            return Err(CoreError::DigestTooShort(digest.len()));
        }

        let f1 = read_u64_le(&digest[0..8]);
        let f2 = read_u64_le(&digest[8..16]);
        let f3 = match scheme {
            HashScheme::Double => 0,
            HashScheme::Extended => fold_tail(&digest[16..]),
        };

        Ok(Self { f1, f2, f3 })
    }

    /// The `i`-th hash function applied to the digest.
    pub fn nth(&self, i: u64) -> u64 {
        self.f1
            .wrapping_add(i.wrapping_add(1).wrapping_mul(self.f2))
            .wrapping_add(i.wrapping_mul(self.f3))
    }

    /// Number of functions in the family (unbounded).
    pub const fn count(&self) -> usize {
        usize::MAX
    }

    /// The first `k` positions in a table of `modulus` slots.
    pub fn positions(&self, k: u32, modulus: u64) -> impl Iterator<Item = u64> + '_ {
        debug_assert!(modulus > 0);
        (0..u64::from(k)).map(move |i| self.nth(i) % modulus)
    }
}

fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(word)
}

/// XOR-fold a byte string into one word, 8 little-endian bytes at a time.
fn fold_tail(tail: &[u8]) -> u64 {
    tail.chunks(8).fold(0u64, |acc, chunk| acc ^ read_u64_le(chunk))
}
