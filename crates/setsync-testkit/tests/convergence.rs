//! End-to-end convergence of synced sets.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;

use setsync::{SetConfig, SetError, SyncConfig, SyncedSet};
use setsync_core::Digest;
use setsync_testkit::fixtures::{
    fixture_config, fixture_hasher, init_logging, name_digest, reconcile_sets, session_pair,
    sync_sets, FaultyStore, TestFixture, FIXTURE_DIGEST_LEN,
};
use setsync_testkit::generators::{chunk_size, seeded_digests, set_pair, sync_config};
use setsync_testkit::vectors::scenarios;

fn names_to_set(names: &[&str]) -> BTreeSet<Digest> {
    names.iter().map(|n| name_digest(n)).collect()
}

#[test]
fn test_scenarios_report_exact_differences() {
    init_logging();
    for scenario in scenarios() {
        let a = TestFixture::from_names(scenario.local.iter().copied());
        let b = TestFixture::from_names(scenario.remote.iter().copied());

        let (ea, eb) = sync_sets(&a.set, &b.set, &SyncConfig::default(), 512).unwrap();
        assert_eq!(
            ea.missing,
            names_to_set(&scenario.local_missing()),
            "{}: local side",
            scenario.name
        );
        assert_eq!(
            eb.missing,
            names_to_set(&scenario.remote_missing()),
            "{}: remote side",
            scenario.name
        );
    }
}

#[test]
fn test_scenarios_converge_after_apply() {
    for scenario in scenarios() {
        let mut a = TestFixture::from_names(scenario.local.iter().copied());
        let mut b = TestFixture::from_names(scenario.remote.iter().copied());
        reconcile_sets(&mut a.set, &mut b.set, &SyncConfig::default(), 7).unwrap();

        assert!(a.set.same_content(&b.set).unwrap(), "{}", scenario.name);
        assert_eq!(a.set.filter().as_bytes(), b.set.filter().as_bytes());

        // A second round has nothing left to do.
        let (ea, eb) = sync_sets(&a.set, &b.set, &SyncConfig::default(), 512).unwrap();
        assert!(ea.missing.is_empty() && eb.missing.is_empty(), "{}", scenario.name);
    }
}

#[test]
fn test_bloom_candidates_cover_local_only_digests() {
    // With a roomy filter nearly every digest B lacks shows up as a candidate.
    let digests = seeded_digests(1, 400, FIXTURE_DIGEST_LEN);
    let a = TestFixture::from_digests(&digests);
    let b = TestFixture::from_digests(&digests[..300]);

    let (ea, _) = sync_sets(&a.set, &b.set, &SyncConfig::default(), 4096).unwrap();
    let only_a: BTreeSet<Digest> = digests[300..].iter().copied().collect();
    assert!(ea.candidates.is_subset(&only_a));
    assert!(ea.candidates.len() >= 90, "only {} candidates", ea.candidates.len());
}

#[test]
fn test_large_sets_with_small_difference() {
    let digests = seeded_digests(2, 5_000, FIXTURE_DIGEST_LEN);
    let mut a = TestFixture::from_digests(&digests[..4_990]);
    let mut b = TestFixture::from_digests(&digests[10..]);

    let config = SyncConfig {
        subtrie_budget: 16,
        ..SyncConfig::default()
    };
    let (ea, eb) = reconcile_sets(&mut a.set, &mut b.set, &config, 1024).unwrap();
    assert_eq!(ea.missing.len(), 10);
    assert_eq!(eb.missing.len(), 10);
    assert_eq!(a.set.len(), 5_000);
    assert!(a.set.same_content(&b.set).unwrap());
}

#[test]
fn test_failed_apply_leaves_set_untouched() {
    let store = FaultyStore::new();
    let mut a = SyncedSet::with_hasher(Arc::clone(&store), fixture_hasher(), fixture_config()).unwrap();
    a.insert(&name_digest("bla1")).unwrap();
    let b = TestFixture::from_names(["bla1", "bla2", "bla3"]);

    let mut a_dummy = TestFixture::from_names(["bla1"]);
    let (ea, _) = sync_sets(&a_dummy.set, &b.set, &SyncConfig::default(), 256).unwrap();
    assert_eq!(ea.missing.len(), 2);

    let keys = store.key_count().unwrap();
    store.set_failing(true);
    let result = a.apply_missing(ea.missing.iter().copied());
    assert!(matches!(result, Err(SetError::Store(_))));
    assert_eq!(a.len(), 1);
    assert_eq!(a.filter().item_count(), 1);
    assert_eq!(store.key_count().unwrap(), keys);

    store.set_failing(false);
    assert_eq!(a.apply_missing(ea.missing.iter().copied()).unwrap(), 2);
    a_dummy.set.apply_missing(ea.missing.iter().copied()).unwrap();
    assert!(a.same_content(&a_dummy.set).unwrap());
}

#[test]
fn test_sqlite_sets_converge() {
    let dir = tempfile::tempdir().unwrap();
    let open = |name: &str| {
        let store = setsync::store::SqliteStore::open(dir.path().join(name)).unwrap();
        SyncedSet::open(store, fixture_config()).unwrap()
    };

    let mut a = open("a.db");
    let mut b = open("b.db");
    a.extend(seeded_digests(3, 200, FIXTURE_DIGEST_LEN)).unwrap();
    b.extend(seeded_digests(4, 150, FIXTURE_DIGEST_LEN)).unwrap();
    reconcile_sets(&mut a, &mut b, &SyncConfig::default(), 2048).unwrap();
    assert_eq!(a.len(), 350);
    drop((a, b));

    let a = open("a.db");
    let b = open("b.db");
    assert!(a.same_content(&b).unwrap());
}

#[tokio::test]
async fn test_reconcile_over_memory_transport() {
    init_logging();
    let mut a = TestFixture::from_names(["bla1", "bla2", "bla3"]);
    let mut b = TestFixture::from_names(["bla3", "bla4", "bla5"]);
    let config = SyncConfig {
        min_output_buffer: 64,
        ..SyncConfig::default()
    };
    let (sa, sb) = session_pair(config).await;

    let (ra, rb) = tokio::join!(a.set.reconcile(&sa), b.set.reconcile(&sb));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_eq!(ra.missing.len(), 2);
    assert_eq!(rb.missing.len(), 2);
    assert!(a.set.same_content(&b.set).unwrap());
}

#[tokio::test]
async fn test_mismatched_filter_sizes_abort_both_sides() {
    let a = TestFixture::from_names(["bla1"]);
    let b = TestFixture::with_config(SetConfig {
        bloom: setsync::BloomConfig {
            expected_items: 50,
            ..setsync::BloomConfig::default()
        },
        ..fixture_config()
    });
    let (sa, sb) = session_pair(SyncConfig::default()).await;

    let (ra, rb) = tokio::join!(a.set.sync_with(&sa), b.set.sync_with(&sb));
    assert!(ra.is_err());
    assert!(rb.is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_any_pair_converges(
        pair in set_pair(FIXTURE_DIGEST_LEN, 40),
        config in sync_config(),
        chunk in chunk_size(),
    ) {
        let mut a = TestFixture::from_digests(&pair.a());
        let mut b = TestFixture::from_digests(&pair.b());

        let (ea, eb) = reconcile_sets(&mut a.set, &mut b.set, &config, chunk).unwrap();
        prop_assert_eq!(&ea.missing, &pair.only_b);
        prop_assert_eq!(&eb.missing, &pair.only_a);
        prop_assert!(ea.candidates.is_subset(&pair.only_a));
        prop_assert_eq!(a.contents(), pair.union());
        prop_assert!(a.set.same_content(&b.set).unwrap());
    }
}
