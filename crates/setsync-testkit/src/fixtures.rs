//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: in-memory sets, a pump that
//! drives two processes against each other, and a store with injectable
//! write failures.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};

use setsync::{SetConfig, SyncedSet};
use setsync_core::{Blake3Digest, Digest, DigestFunction};
use setsync_store::{KeyValueStore, KvPairs, MemoryStore, StoreError, WriteBatch};
use setsync_sync::{
    MemoryNetwork, MemoryTransport, NodeId, SyncConfig, SyncEvent, SyncProcess, SyncSession,
};

/// Digest length used by the fixtures.
pub const FIXTURE_DIGEST_LEN: usize = 20;

/// Step limit for [`pump`]; a correct exchange finishes far sooner.
const MAX_PUMP_ROUNDS: usize = 1_000_000;

/// A synced set over an in-memory store.
pub struct TestFixture {
    pub set: SyncedSet<MemoryStore>,
}

impl TestFixture {
    /// Create an empty set with the fixture digest length.
    pub fn new() -> Self {
        Self::with_config(fixture_config())
    }

    /// Create an empty set with a custom configuration.
    pub fn with_config(config: SetConfig) -> Self {
        let set = SyncedSet::open(MemoryStore::new(), config).expect("open in-memory set");
        Self { set }
    }

    /// Create a set holding the given digests.
    pub fn from_digests<'a>(digests: impl IntoIterator<Item = &'a Digest>) -> Self {
        let mut fixture = Self::new();
        fixture
            .set
            .extend(digests.into_iter().copied())
            .expect("extend fixture set");
        fixture
    }

    /// Create a set holding the hashes of `names`.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let digests: Vec<Digest> = names.into_iter().map(name_digest).collect();
        Self::from_digests(&digests)
    }

    /// The set's digests as a sorted set.
    pub fn contents(&self) -> BTreeSet<Digest> {
        self.set
            .digests()
            .expect("enumerate fixture set")
            .into_iter()
            .collect()
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// The configuration fixtures use.
pub fn fixture_config() -> SetConfig {
    SetConfig {
        digest_len: FIXTURE_DIGEST_LEN,
        ..SetConfig::default()
    }
}

/// The digest fixtures assign to a name.
pub fn name_digest(name: &str) -> Digest {
    fixture_hasher().digest(name.as_bytes())
}

/// The fixture hash function.
pub fn fixture_hasher() -> Blake3Digest {
    Blake3Digest::with_len(FIXTURE_DIGEST_LEN).expect("fixture digest length")
}

/// Install a test-friendly tracing subscriber. Safe to call repeatedly.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// ─────────────────────────────────────────────────────────────────────────────
// Process Pump
// ─────────────────────────────────────────────────────────────────────────────

/// Drive two processes against each other until both are done.
///
/// Each round feeds one side everything the other produced, using an
/// output buffer of `chunk` bytes.
pub fn pump<S, H, Fa, Fb>(
    a: &mut SyncProcess<'_, S, H, Fa>,
    b: &mut SyncProcess<'_, S, H, Fb>,
    chunk: usize,
) -> anyhow::Result<()>
where
    S: KeyValueStore,
    H: DigestFunction,
    Fa: FnMut(SyncEvent),
    Fb: FnMut(SyncEvent),
{
    let mut a_to_b = Vec::new();
    let mut b_to_a = Vec::new();
    let mut buf = vec![0u8; chunk.max(1)];

    for round in 0..MAX_PUMP_ROUNDS {
        let progress = a.step(&b_to_a, &mut buf).context("side A step")?;
        b_to_a.clear();
        a_to_b.extend_from_slice(&buf[..progress.produced]);

        let progress = b.step(&a_to_b, &mut buf).context("side B step")?;
        a_to_b.clear();
        b_to_a.extend_from_slice(&buf[..progress.produced]);

        if a.done() && b.done() {
            tracing::debug!(rounds = round + 1, "pump finished");
            return Ok(());
        }
    }
    bail!(
        "no convergence after {} rounds (A in {}, B in {})",
        MAX_PUMP_ROUNDS,
        a.state(),
        b.state()
    )
}

/// Events from one side of a synchronization.
#[derive(Debug, Default, Clone)]
pub struct SideEvents {
    pub missing: BTreeSet<Digest>,
    pub candidates: BTreeSet<Digest>,
}

impl SideEvents {
    fn record(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Missing(d) => {
                self.missing.insert(d);
            }
            SyncEvent::Candidate(d) => {
                self.candidates.insert(d);
            }
        }
    }
}

/// Run a full synchronization between two sets without applying anything.
pub fn sync_sets<S, H>(
    a: &SyncedSet<S, H>,
    b: &SyncedSet<S, H>,
    config: &SyncConfig,
    chunk: usize,
) -> anyhow::Result<(SideEvents, SideEvents)>
where
    S: KeyValueStore,
    H: DigestFunction,
{
    let mut events_a = SideEvents::default();
    let mut events_b = SideEvents::default();
    {
        let mut pa = a.sync_process(config, |e| events_a.record(e))?;
        let mut pb = b.sync_process(config, |e| events_b.record(e))?;
        pump(&mut pa, &mut pb, chunk)?;
        pa.end_of_input()?;
        pb.end_of_input()?;
    }
    Ok((events_a, events_b))
}

/// Synchronize two sets and insert what each side reported missing.
pub fn reconcile_sets<S, H>(
    a: &mut SyncedSet<S, H>,
    b: &mut SyncedSet<S, H>,
    config: &SyncConfig,
    chunk: usize,
) -> anyhow::Result<(SideEvents, SideEvents)>
where
    S: KeyValueStore,
    H: DigestFunction,
{
    let (events_a, events_b) = sync_sets(a, b, config, chunk)?;
    a.apply_missing(events_a.missing.iter().copied())?;
    b.apply_missing(events_b.missing.iter().copied())?;
    Ok((events_a, events_b))
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Two sessions wired to each other over a fresh in-memory network.
pub async fn session_pair(
    config: SyncConfig,
) -> (SyncSession<MemoryTransport>, SyncSession<MemoryTransport>) {
    let network = MemoryNetwork::new();
    let a = NodeId::from_name("a");
    let b = NodeId::from_name("b");
    let ta = network.create_transport(a).await;
    let tb = network.create_transport(b).await;
    (
        SyncSession::new(ta, b, config.clone()),
        SyncSession::new(tb, a, config),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Fault Injection
// ─────────────────────────────────────────────────────────────────────────────

/// A memory store whose batch writes fail while armed.
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FaultyStore {
    /// Create a new, disarmed store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following batch write fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Number of stored keys.
    pub fn key_count(&self) -> setsync_store::Result<usize> {
        self.inner.len()
    }
}

impl KeyValueStore for FaultyStore {
    fn get(&self, key: &[u8]) -> setsync_store::Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> setsync_store::Result<()> {
        self.inner.put(key, value)
    }

    fn delete(&self, key: &[u8]) -> setsync_store::Result<()> {
        self.inner.delete(key)
    }

    fn clear(&self) -> setsync_store::Result<()> {
        self.inner.clear()
    }

    fn iterate(&self, prefix: &[u8]) -> setsync_store::Result<KvPairs> {
        self.inner.iterate(prefix)
    }

    fn write_batch(&self, batch: WriteBatch) -> setsync_store::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidData("injected write failure".into()));
        }
        self.inner.write_batch(batch)
    }
}

#[cfg(test)]
mod tests {
    use setsync_sync::Transport;

    use super::*;

    #[test]
    fn test_fixture_from_names() {
        let fixture = TestFixture::from_names(["x", "y", "x"]);
        assert_eq!(fixture.set.len(), 2);
        assert!(fixture.set.contains(&name_digest("x")).unwrap());
        assert_eq!(fixture.contents().len(), 2);
    }

    #[test]
    fn test_reconcile_sets() {
        init_logging();
        let mut a = TestFixture::from_names(["a", "b", "c"]);
        let mut b = TestFixture::from_names(["c", "d"]);
        let (ea, eb) = reconcile_sets(&mut a.set, &mut b.set, &SyncConfig::default(), 64).unwrap();

        assert_eq!(ea.missing, BTreeSet::from([name_digest("d")]));
        assert_eq!(eb.missing.len(), 2);
        assert!(a.set.same_content(&b.set).unwrap());
    }

    #[test]
    fn test_faulty_store_toggles() {
        let store = FaultyStore::new();
        store.set_failing(true);
        assert!(store.write_batch(WriteBatch::new()).is_err());
        store.set_failing(false);
        assert!(store.write_batch(WriteBatch::new()).is_ok());
        assert_eq!(store.key_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_session_pair_peers_each_other() {
        let (sa, sb) = session_pair(SyncConfig::default()).await;
        assert_eq!(sa.peer(), &sb.transport().local_node_id());
        assert_eq!(sb.peer(), &sa.transport().local_node_id());
    }
}
