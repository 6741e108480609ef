//! # setsync Testkit
//!
//! Testing utilities for setsync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Known vectors**: Packet header encodings, Bloom positions and named
//!   set scenarios with expected outcomes
//! - **Generators**: Proptest strategies for digests, overlapping set pairs
//!   and sync configurations
//! - **Fixtures**: In-memory sets, a two-process pump, paired sessions and a
//!   store with injectable write failures
//!
//! ## Known Vectors
//!
//! ```rust
//! use setsync_testkit::vectors::verify_header_vectors;
//!
//! assert!(verify_header_vectors().is_empty());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use setsync_testkit::generators::set_pair;
//!
//! proptest! {
//!     #[test]
//!     fn sets_converge(pair in set_pair(20, 32)) {
//!         // build both sides, sync, compare
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use setsync::SyncConfig;
//! use setsync_testkit::fixtures::{reconcile_sets, TestFixture};
//!
//! let mut a = TestFixture::from_names(["bla1", "bla2", "bla3"]);
//! let mut b = TestFixture::from_names(["bla3", "bla4"]);
//! reconcile_sets(&mut a.set, &mut b.set, &SyncConfig::default(), 512).unwrap();
//! assert!(a.set.same_content(&b.set).unwrap());
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{pump, reconcile_sets, sync_sets, FaultyStore, SideEvents, TestFixture};
pub use generators::{seeded_digests, set_pair, SetPair};
pub use vectors::{header_vectors, position_vectors, scenarios, verify_header_vectors, Scenario};
