//! # setsync Store
//!
//! Storage abstraction for setsync. Provides a trait-based byte-map
//! interface with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! Every persistent structure (the Bloom filter's reverse index, the Merkle
//! trie's nodes and root pointer) is written through the
//! [`KeyValueStore`] trait, so both the structures and the synchronization
//! protocol are storage-agnostic. The persistent implementation is
//! [`SqliteStore`], with [`MemoryStore`] for tests.
//!
//! ## Key Types
//!
//! - [`KeyValueStore`] - The trait for all storage operations
//! - [`Transaction`] - Read-your-writes overlay, committed as one batch
//! - [`WriteBatch`] - An atomic group of puts and deletes
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use setsync_store::{KeyValueStore, SqliteStore, StoreExt};
//!
//! fn example() -> setsync_store::Result<()> {
//!     let store = SqliteStore::open("set.db")?;
//!
//!     let mut tx = store.transaction();
//!     tx.put(b"mt/root".to_vec(), vec![0u8; 32]);
//!     tx.delete(b"stale".to_vec());
//!     tx.commit()?;
//!
//!     assert!(store.get(b"mt/root")?.is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Synchronous**: structures on top call the store from inside a
//!   pull-based state machine, so there is no async boundary here
//! - **Atomic commits**: a transaction becomes exactly one batch
//! - **Ordered iteration**: prefix scans return keys in byte order

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;
pub mod transaction;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{KeyValueStore, KvPairs, StoreExt, WriteBatch, WriteOp};
pub use transaction::Transaction;
