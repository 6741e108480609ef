//! # Setsync Core
//!
//! Pure primitives shared by every setsync crate: digests, the hash
//! function contract, the double-hashing scheme and the packet header codec.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Digest`] - Fixed-length digest, the universal key type
//! - [`DigestFunction`] - The pluggable hash function contract
//! - [`Blake3Digest`] - Blake3 with configurable output length
//! - [`DoubleHashing`] - `f1 + (i+1)·f2` hash family for Bloom filters
//! - [`PacketHeader`] - One- or nine-byte wire header

pub mod digest;
pub mod error;
pub mod hashing;
pub mod packet;

pub use digest::{Blake3Digest, Digest, DigestFunction, MAX_DIGEST_LEN, MIN_DIGEST_LEN};
pub use error::{CoreError, Result};
pub use hashing::{DoubleHashing, HashScheme};
pub use packet::{PacketHeader, PacketType, MAX_SUBTRIE_DIGESTS};
