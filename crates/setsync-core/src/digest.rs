//! Digests and the hash function contract.
//!
//! A [`Digest`] is the universal key of the system: set members, trie node
//! identifiers and Bloom filter inputs are all digests of one fixed length.
//! The length is chosen at runtime by the [`DigestFunction`] in use, so the
//! value type carries its length inline instead of being a `[u8; N]`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{CoreError, Result};

/// Largest digest length supported by [`Digest`].
pub const MAX_DIGEST_LEN: usize = 64;

/// Smallest digest length usable by the double-hashing scheme.
pub const MIN_DIGEST_LEN: usize = 16;

/// A fixed-length digest value.
///
/// Bytes past `len` are always zero, so comparisons and hashing only ever
/// observe the meaningful prefix.
#[derive(Clone, Copy)]
pub struct Digest {
    bytes: [u8; MAX_DIGEST_LEN],
    len: u8,
}

impl Digest {
    /// Create a digest from a byte slice.
    ///
    /// Fails if the slice is empty or longer than [`MAX_DIGEST_LEN`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || bytes.len() > MAX_DIGEST_LEN {
            return Err(CoreError::UnsupportedDigestLength(bytes.len()));
        }
        let mut buf = [0u8; MAX_DIGEST_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            bytes: buf,
            len: bytes.len() as u8,
        })
    }

    /// Create a digest, checking it against an expected length.
    pub fn with_len(bytes: &[u8], expected: usize) -> Result<Self> {
        if bytes.len() != expected {
            return Err(CoreError::DigestLength {
                expected,
                got: bytes.len(),
            });
        }
        Self::from_slice(bytes)
    }

    /// The all-zero digest of the given length.
    ///
    /// Used on the wire as the root of an empty trie.
    pub fn zero(len: usize) -> Result<Self> {
        if len == 0 || len > MAX_DIGEST_LEN {
            return Err(CoreError::UnsupportedDigestLength(len));
        }
        Ok(Self {
            bytes: [0u8; MAX_DIGEST_LEN],
            len: len as u8,
        })
    }

    /// Length in bytes.
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Digests are never empty; provided for API symmetry.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length in bits.
    pub const fn bit_len(&self) -> usize {
        self.len as usize * 8
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len()]
    }

    /// True if every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.as_bytes().iter().all(|b| *b == 0)
    }

    /// Read bit `index`, counting from the most significant bit of byte 0.
    pub fn bit(&self, index: usize) -> bool {
        debug_assert!(index < self.bit_len());
        (self.bytes[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    /// Number of leading bits shared with `other`, capped at `limit`.
    pub fn common_prefix_len(&self, other: &Digest, limit: usize) -> usize {
        let limit = limit.min(self.bit_len()).min(other.bit_len());
        let mut bits = 0;
        for (a, b) in self.as_bytes().iter().zip(other.as_bytes()) {
            let x = a ^ b;
            if x == 0 {
                bits += 8;
                if bits >= limit {
                    return limit;
                }
            } else {
                return (bits + x.leading_zeros() as usize).min(limit);
            }
        }
        bits.min(limit)
    }

    /// Copy of this digest with every bit from `bits` onwards cleared.
    pub fn truncated(&self, bits: usize) -> Self {
        let mut out = *self;
        for (i, byte) in out.bytes[..self.len()].iter_mut().enumerate() {
            let start = i * 8;
            if start >= bits {
                *byte = 0;
            } else if start + 8 > bits {
                *byte &= 0xffu8 << (8 - (bits - start));
            }
        }
        out
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| CoreError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl PartialEq for Digest {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Digest {}

impl PartialOrd for Digest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Digest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl Hash for Digest {
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.as_bytes().hash(state);
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Digest({})", &hex[..hex.len().min(16)])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "{}", &hex[..hex.len().min(16)])
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl TryFrom<&[u8]> for Digest {
    type Error = CoreError;

    fn try_from(slice: &[u8]) -> Result<Self> {
        Self::from_slice(slice)
    }
}

/// The hash function contract.
///
/// Maps arbitrary bytes to a digest of [`output_len`](Self::output_len)
/// bytes. The same function keys set members and hashes internal trie nodes.
pub trait DigestFunction: Send + Sync {
    /// Output size in bytes.
    fn output_len(&self) -> usize;

    /// Hash arbitrary data.
    fn digest(&self, data: &[u8]) -> Digest;

    /// Hash the concatenation `left || right`.
    fn digest_pair(&self, left: &Digest, right: &Digest) -> Digest {
        let mut buf = Vec::with_capacity(left.len() + right.len());
        buf.extend_from_slice(left.as_bytes());
        buf.extend_from_slice(right.as_bytes());
        self.digest(&buf)
    }

    /// Wrap raw bytes as a digest of this function's length.
    fn parse(&self, bytes: &[u8]) -> Result<Digest> {
        Digest::with_len(bytes, self.output_len())
    }
}

/// Blake3 with extendable output.
///
/// Any length in `16..=64` is supported; shorter outputs are prefixes of
/// longer ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blake3Digest {
    len: usize,
}

impl Blake3Digest {
    /// Default output length (blake3's native size).
    pub const DEFAULT_LEN: usize = 32;

    /// Create with a specific output length.
    pub fn with_len(len: usize) -> Result<Self> {
        if !(MIN_DIGEST_LEN..=MAX_DIGEST_LEN).contains(&len) {
            return Err(CoreError::UnsupportedDigestLength(len));
        }
        Ok(Self { len })
    }
}

impl Default for Blake3Digest {
    fn default() -> Self {
        Self {
            len: Self::DEFAULT_LEN,
        }
    }
}

impl DigestFunction for Blake3Digest {
    fn output_len(&self) -> usize {
        self.len
    }

    fn digest(&self, data: &[u8]) -> Digest {
        let mut bytes = [0u8; MAX_DIGEST_LEN];
        let mut reader = blake3::Hasher::new().update(data).finalize_xof();
        reader.fill(&mut bytes[..self.len]);
        Digest {
            bytes,
            len: self.len as u8,
        }
    }

    fn digest_pair(&self, left: &Digest, right: &Digest) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(left.as_bytes());
        hasher.update(right.as_bytes());
        let mut bytes = [0u8; MAX_DIGEST_LEN];
        hasher.finalize_xof().fill(&mut bytes[..self.len]);
        Digest {
            bytes,
            len: self.len as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_hex_roundtrip() {
        let d = Digest::from_slice(&[0x42; 20]).unwrap();
        let recovered = Digest::from_hex(&d.to_hex()).unwrap();
        assert_eq!(d, recovered);
        assert_eq!(recovered.len(), 20);
    }

    #[test]
    fn test_digest_length_checks() {
        assert!(Digest::from_slice(&[]).is_err());
        assert!(Digest::from_slice(&[0u8; 65]).is_err());
        assert!(matches!(
            Digest::with_len(&[1u8; 19], 20),
            Err(CoreError::DigestLength { expected: 20, got: 19 })
        ));
    }

    #[test]
    fn test_digest_bits() {
        let d = Digest::from_slice(&[0b1010_0000, 0x01]).unwrap();
        assert!(d.bit(0));
        assert!(!d.bit(1));
        assert!(d.bit(2));
        assert!(d.bit(15));
        assert!(!d.bit(14));
    }

    #[test]
    fn test_common_prefix_len() {
        let a = Digest::from_slice(&[0xff, 0x00, 0x00]).unwrap();
        let b = Digest::from_slice(&[0xff, 0x10, 0x00]).unwrap();
        assert_eq!(a.common_prefix_len(&b, 24), 11);
        assert_eq!(a.common_prefix_len(&b, 5), 5);
        assert_eq!(a.common_prefix_len(&a, 24), 24);
    }

    #[test]
    fn test_truncated() {
        let d = Digest::from_slice(&[0xff, 0xff, 0xff]).unwrap();
        assert_eq!(d.truncated(11).as_bytes(), &[0xff, 0xe0, 0x00]);
        assert_eq!(d.truncated(0).as_bytes(), &[0, 0, 0]);
        assert_eq!(d.truncated(24), d);
    }

    #[test]
    fn test_digest_ordering_is_lexicographic() {
        let a = Digest::from_slice(&[0x01, 0xff]).unwrap();
        let b = Digest::from_slice(&[0x02, 0x00]).unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_blake3_lengths() {
        let h20 = Blake3Digest::with_len(20).unwrap();
        let h32 = Blake3Digest::default();
        let a = h20.digest(b"bla1");
        let b = h32.digest(b"bla1");
        assert_eq!(a.len(), 20);
        assert_eq!(b.len(), 32);
        // XOF output: the short digest is a prefix of the long one.
        assert_eq!(a.as_bytes(), &b.as_bytes()[..20]);
        assert!(Blake3Digest::with_len(8).is_err());
    }

    #[test]
    fn test_digest_pair_matches_concatenation() {
        let h = Blake3Digest::with_len(20).unwrap();
        let a = h.digest(b"left");
        let b = h.digest(b"right");
        let mut cat = a.as_bytes().to_vec();
        cat.extend_from_slice(b.as_bytes());
        assert_eq!(h.digest_pair(&a, &b), h.digest(&cat));
        assert_ne!(h.digest_pair(&a, &b), h.digest_pair(&b, &a));
    }

    proptest::proptest! {
        #[test]
        fn test_common_prefix_matches_bitwise_scan(
            a in proptest::collection::vec(proptest::prelude::any::<u8>(), 20),
            b in proptest::collection::vec(proptest::prelude::any::<u8>(), 20),
        ) {
            let da = Digest::from_slice(&a).unwrap();
            let db = Digest::from_slice(&b).unwrap();
            let naive = (0..160).take_while(|i| da.bit(*i) == db.bit(*i)).count();
            proptest::prop_assert_eq!(da.common_prefix_len(&db, 160), naive);
            proptest::prop_assert_eq!(da.truncated(naive), db.truncated(naive));
        }
    }
}
