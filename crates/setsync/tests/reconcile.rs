//! Two synced sets reconciling through the public API.

use setsync::store::MemoryStore;
use setsync::sync::{MemoryNetwork, NodeId};
use setsync::{SetConfig, SyncConfig, SyncSession, SyncedSet};

fn set_of(names: &[&str]) -> SyncedSet<MemoryStore> {
    let mut set = SyncedSet::open(MemoryStore::new(), SetConfig::default()).unwrap();
    for name in names {
        set.insert_data(name.as_bytes()).unwrap();
    }
    set
}

#[tokio::test]
async fn test_reconcile_through_sessions() {
    let mut a = set_of(&["bla1", "bla2", "bla3", "bla4", "bla5"]);
    let mut b = set_of(&["bla1", "bla2"]);

    let network = MemoryNetwork::new();
    let (ida, idb) = (NodeId::from_name("a"), NodeId::from_name("b"));
    let sa = SyncSession::new(network.create_transport(ida).await, idb, SyncConfig::default());
    let sb = SyncSession::new(network.create_transport(idb).await, ida, SyncConfig::default());

    let (ra, rb) = tokio::join!(a.reconcile(&sa), b.reconcile(&sb));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert!(ra.missing.is_empty());
    assert_eq!(rb.missing.len(), 3);
    assert_eq!(b.len(), 5);
    assert!(a.same_content(&b).unwrap());
    assert_eq!(a.root_hash().unwrap(), b.root_hash().unwrap());
}

#[tokio::test]
async fn test_equal_sets_need_one_frame_each() {
    let a = set_of(&["x", "y"]);
    let b = set_of(&["y", "x"]);

    let network = MemoryNetwork::new();
    let (ida, idb) = (NodeId::from_name("a"), NodeId::from_name("b"));
    let sa = SyncSession::new(network.create_transport(ida).await, idb, SyncConfig::default());
    let sb = SyncSession::new(network.create_transport(idb).await, ida, SyncConfig::default());

    let (ra, rb) = tokio::join!(a.sync_with(&sa), b.sync_with(&sb));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_eq!(ra.frames_sent, 1);
    assert_eq!(rb.frames_sent, 1);
    assert!(ra.candidates.is_empty() && rb.candidates.is_empty());
}
