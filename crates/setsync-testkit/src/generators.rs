//! Proptest generators for property-based testing.

use std::collections::BTreeSet;

use proptest::prelude::*;
use rand::{Rng, SeedableRng};

use setsync_core::Digest;
use setsync_sync::SyncConfig;

/// Generate a random digest of `len` bytes.
pub fn digest(len: usize) -> impl Strategy<Value = Digest> {
    prop::collection::vec(any::<u8>(), len).prop_map(|bytes| {
        Digest::from_slice(&bytes).expect("digest length in range")
    })
}

/// Generate a set of up to `max` distinct digests.
pub fn digest_set(len: usize, max: usize) -> impl Strategy<Value = BTreeSet<Digest>> {
    prop::collection::btree_set(digest(len), 0..=max)
}

/// Two overlapping sets: a shared core plus digests only each side holds.
#[derive(Debug, Clone)]
pub struct SetPair {
    pub shared: BTreeSet<Digest>,
    pub only_a: BTreeSet<Digest>,
    pub only_b: BTreeSet<Digest>,
}

impl SetPair {
    /// Everything side A holds.
    pub fn a(&self) -> BTreeSet<Digest> {
        self.shared.union(&self.only_a).copied().collect()
    }

    /// Everything side B holds.
    pub fn b(&self) -> BTreeSet<Digest> {
        self.shared.union(&self.only_b).copied().collect()
    }

    /// The union both sides should converge to.
    pub fn union(&self) -> BTreeSet<Digest> {
        self.a().union(&self.b()).copied().collect()
    }
}

/// Generate a [`SetPair`] with at most `max` digests per part.
///
/// The three parts are disjoint.
pub fn set_pair(len: usize, max: usize) -> impl Strategy<Value = SetPair> {
    (digest_set(len, max), digest_set(len, max), digest_set(len, max)).prop_map(
        |(shared, a, b)| {
            let only_a: BTreeSet<Digest> = a.difference(&shared).copied().collect();
            let only_b: BTreeSet<Digest> = b
                .difference(&shared)
                .filter(|d| !only_a.contains(d))
                .copied()
                .collect();
            SetPair {
                shared,
                only_a,
                only_b,
            }
        },
    )
}

/// Generate a sync configuration with a small budget and outstanding limit.
pub fn sync_config() -> impl Strategy<Value = SyncConfig> {
    (2usize..=64, 1usize..=16).prop_map(|(subtrie_budget, max_outstanding_requests)| SyncConfig {
        subtrie_budget,
        max_outstanding_requests,
        ..SyncConfig::default()
    })
}

/// Generate an output chunk size, from one byte up to a few kilobytes.
pub fn chunk_size() -> impl Strategy<Value = usize> {
    prop_oneof![1usize..=8, 9usize..=256, 257usize..=4096]
}

/// Deterministic pseudo-random digests, for benchmarks and large fixtures.
pub fn seeded_digests(seed: u64, count: usize, len: usize) -> Vec<Digest> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut bytes = vec![0u8; len];
    (0..count)
        .map(|_| {
            rng.fill(&mut bytes[..]);
            Digest::from_slice(&bytes).expect("digest length in range")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_set_pair_parts_are_disjoint(pair in set_pair(20, 16)) {
            prop_assert!(pair.shared.is_disjoint(&pair.only_a));
            prop_assert!(pair.shared.is_disjoint(&pair.only_b));
            prop_assert!(pair.only_a.is_disjoint(&pair.only_b));
            prop_assert_eq!(
                pair.union().len(),
                pair.shared.len() + pair.only_a.len() + pair.only_b.len()
            );
        }

        #[test]
        fn test_digest_has_requested_length(d in digest(24)) {
            prop_assert_eq!(d.len(), 24);
        }

        #[test]
        fn test_sync_config_is_valid(config in sync_config()) {
            prop_assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_seeded_digests_are_deterministic() {
        let a = seeded_digests(7, 100, 20);
        assert_eq!(a, seeded_digests(7, 100, 20));
        assert_ne!(a, seeded_digests(8, 100, 20));
        assert_eq!(a.iter().collect::<BTreeSet<_>>().len(), 100);
    }
}
