//! # setsync Bloom
//!
//! A counting Bloom filter over digests, used for the approximate first
//! round of set reconciliation.
//!
//! ## Overview
//!
//! Each digest maps to `k` bit positions through the double-hashing scheme
//! from `setsync-core`. Besides the bit array, the filter keeps a reverse
//! index in the key-value store (bit position to every digest that set it).
//! The index makes removal safe and lets [`BloomFilter::diff`] turn a bit
//! that is set locally but clear remotely into the concrete digests the peer
//! is probably missing.
//!
//! ## Key Types
//!
//! - [`BloomFilter`] - The persistent counting filter
//! - [`BloomConfig`] - Sizing configuration (`n`, `p`, optional cap, scheme)
//! - [`FilterParams`] - Derived `m`/`k`, persisted and checked on open
//! - [`BloomDelta`] - Staged bit changes, applied after a commit
//! - [`FilterSnapshot`] - Read-only bits for save/load
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use setsync_bloom::{BloomConfig, BloomFilter};
//! use setsync_core::{Blake3Digest, DigestFunction};
//! use setsync_store::MemoryStore;
//!
//! let hasher = Blake3Digest::default();
//! let store = Arc::new(MemoryStore::new());
//! let mut filter = BloomFilter::open(store, 32, &BloomConfig::default()).unwrap();
//!
//! let d = hasher.digest(b"hello");
//! filter.add(&d).unwrap();
//! assert!(filter.contains(&d).unwrap());
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod snapshot;

pub use config::{optimal_size, BloomConfig, FilterParams};
pub use error::{BloomError, Result};
pub use filter::{BloomDelta, BloomFilter};
pub use snapshot::FilterSnapshot;
