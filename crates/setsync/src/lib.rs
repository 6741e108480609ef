//! # setsync
//!
//! The unified API for setsync: persistent digest sets that reconcile
//! with a peer by exchanging a Bloom filter and then Merkle trie cuts.
//!
//! ## Overview
//!
//! A [`SyncedSet`] stores fixed-length digests in two structures over one
//! key-value store:
//!
//! - **Counting Bloom filter**: answers "probably present" cheaply and is
//!   shipped whole in the first synchronization round
//! - **Merkle trie**: a content-addressed binary trie whose root hash
//!   identifies the set, drilled into with bounded cuts in the second round
//!
//! Every mutation goes through one store transaction, so the two structures
//! never disagree after a crash.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use setsync::{SetConfig, SyncedSet};
//! use setsync::store::SqliteStore;
//!
//! fn example() -> setsync::Result<()> {
//!     let store = SqliteStore::open("set.db")?;
//!     let mut set = SyncedSet::open(store, SetConfig::default())?;
//!
//!     let (digest, inserted) = set.insert_data(b"hello")?;
//!     assert!(inserted);
//!     assert!(set.contains(&digest)?);
//!
//!     // Drive a sync with `set.sync_process(..)` or `set.reconcile(&session)`.
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `setsync::core` - Digests, hash functions, packet headers
//! - `setsync::store` - Storage abstraction and SQLite
//! - `setsync::bloom` - Counting Bloom filter
//! - `setsync::trie` - Merkle trie
//! - `setsync::sync` - Synchronization process and session driver

pub mod error;
pub mod set;

// Re-export component crates
pub use setsync_bloom as bloom;
pub use setsync_core as core;
pub use setsync_store as store;
pub use setsync_sync as sync;
pub use setsync_trie as trie;

// Re-export main types for convenience
pub use error::{Result, SetError};
pub use set::{SetConfig, SyncedSet};

// Re-export commonly used types
pub use setsync_bloom::BloomConfig;
pub use setsync_core::{Blake3Digest, Digest, DigestFunction};
pub use setsync_sync::{SyncConfig, SyncEvent, SyncProcess, SyncReport, SyncSession, SyncState};
