//! # setsync Sync
//!
//! Two-phase set reconciliation between two peers.
//!
//! ## Overview
//!
//! Each side runs a [`SyncProcess`] over its local trie and Bloom filter.
//! The peers first swap root hashes; equal roots end the run at once.
//! Otherwise they swap Bloom filter bit arrays, which yields approximate
//! candidates cheaply, and then drill down each other's tries with bounded
//! subtrie cuts until every differing leaf has been found.
//!
//! The process is pull-based and never blocks: the caller moves bytes.
//! [`SyncSession`] is an async driver that does this over a [`Transport`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use setsync_sync::{MemoryNetwork, NodeId, SyncConfig, SyncSession};
//!
//! async fn example() {
//!     let network = MemoryNetwork::new();
//!     let transport = network.create_transport(NodeId::from_name("a")).await;
//!     let session = SyncSession::new(transport, NodeId::from_name("b"), SyncConfig::default());
//!
//!     // let report = session.run(&trie, &filter).await?;
//!     // for digest in report.missing { ... }
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Node A                              Node B
//!   |-------- root ------------------->|
//!   |<------- root --------------------|
//!   |-------- FILTER + bits ---------->|   (roots differ)
//!   |<------- FILTER + bits -----------|
//!   |-------- SUBTRIE_REQUEST -------->|
//!   |<------- SUBTRIE -----------------|
//!   |<------- SUBTRIE_REQUEST ---------|
//!   |-------- SUBTRIE ---------------->|
//!   |-------- TRIE_ROOT -------------->|
//!   |<------- TRIE_ROOT ---------------|
//! ```

pub mod config;
pub mod error;
pub mod process;
pub mod session;
pub mod transport;

pub use config::{output_buffer_size, SyncConfig};
pub use error::{Result, SyncError};
pub use process::{Progress, SyncEvent, SyncProcess, SyncState, SyncStats, MAX_ERROR_MESSAGE_LEN};
pub use session::{SyncReport, SyncSession};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, NodeId, Transport};
