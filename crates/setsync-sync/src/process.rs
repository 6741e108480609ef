//! The synchronization state machine.
//!
//! A [`SyncProcess`] never blocks. Each [`step`](SyncProcess::step) takes
//! whatever bytes arrived from the peer and fills as much of the caller's
//! output buffer as it can; moving bytes between the two sides is the
//! caller's job.
//!
//! Each direction carries, in order:
//!
//! ```text
//! root digest (all zero for an empty trie)
//! FILTER header + Bloom bit array          (only if the roots differ)
//! SUBTRIE_REQUEST / SUBTRIE packets         (pull-based trie diff)
//! TRIE_ROOT + root digest                   (no further requests)
//! ```
//!
//! Replies answer requests in order. A reply holding just the requested
//! hash means the hash is a leaf; anything else is a cut whose unknown
//! entries are requested in turn.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use bytes::{Buf, BytesMut};
use serde::Serialize;

use setsync_bloom::BloomFilter;
use setsync_core::{Digest, DigestFunction, PacketHeader, PacketType, MAX_SUBTRIE_DIGESTS};
use setsync_store::KeyValueStore;
use setsync_trie::{NodeKind, Trie};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

/// Longest ERROR_MSG payload accepted from a peer.
pub const MAX_ERROR_MESSAGE_LEN: u64 = 4096;

/// Externally visible phase of a synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncState {
    /// Exchanging root hashes.
    Start,
    /// Exchanging Bloom filter bit arrays.
    Bloom,
    /// Exchanging subtrie cuts.
    Trie,
    /// Finished; both sides know their differences.
    Equal,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Start => "START",
            SyncState::Bloom => "BF",
            SyncState::Trie => "TRIE",
            SyncState::Equal => "EQUAL",
        };
        f.write_str(name)
    }
}

/// A difference discovered during synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncEvent {
    /// A local digest the peer probably lacks (Bloom round, approximate).
    Candidate(Digest),
    /// A digest the peer holds and the local set lacks (trie round, exact).
    Missing(Digest),
}

/// Bytes moved by one [`SyncProcess::step`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Input bytes consumed. Always the whole input.
    pub consumed: usize,
    /// Output bytes written.
    pub produced: usize,
}

/// Counters for one synchronization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub candidates: u64,
    pub missing: u64,
    pub requests_sent: u64,
    pub cuts_served: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inbound {
    Root,
    FilterHeader,
    FilterBits { offset: usize },
    Packets,
    /// Roots matched; the peer sends nothing more.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outbound {
    Root,
    AwaitPeerRoot,
    FilterBits { offset: usize },
    Packets,
}

/// One side of a synchronization.
///
/// Borrows the local trie and filter for its whole lifetime, so the set
/// cannot change underneath it. Differences are reported to `handler`; the
/// caller applies them once the process is done.
pub struct SyncProcess<'a, S, H, F> {
    trie: &'a Trie<S, H>,
    filter: &'a BloomFilter<S>,
    handler: F,
    budget: usize,
    max_outstanding: usize,
    local_root: Digest,
    peer_root: Option<Digest>,
    roots_equal: bool,
    inbound: Inbound,
    outbound: Outbound,
    /// Received bytes not yet parsed.
    input: BytesMut,
    /// Encoded bytes not yet handed to the caller.
    output: Vec<u8>,
    out_pos: usize,
    /// Our requests the peer has not answered, oldest first.
    awaiting: VecDeque<Digest>,
    /// Hashes to request, not yet sent.
    wanted: VecDeque<Digest>,
    /// Peer requests we have not answered, oldest first.
    serving: VecDeque<Digest>,
    requested: HashSet<Digest>,
    candidates: HashSet<Digest>,
    root_sent: bool,
    peer_done: bool,
    finished: bool,
    stats: SyncStats,
}

impl<'a, S, H, F> SyncProcess<'a, S, H, F>
where
    S: KeyValueStore,
    H: DigestFunction,
    F: FnMut(SyncEvent),
{
    /// Start a synchronization against the local `trie` and `filter`.
    ///
    /// The trie must have no unflushed changes.
    pub fn new(
        trie: &'a Trie<S, H>,
        filter: &'a BloomFilter<S>,
        config: &SyncConfig,
        handler: F,
    ) -> Result<Self> {
        config.validate()?;
        if filter.digest_len() != trie.digest_len() {
            return Err(SyncError::Config(format!(
                "filter digest length {} differs from trie digest length {}",
                filter.digest_len(),
                trie.digest_len()
            )));
        }
        let local_root = match trie.root_hash()? {
            Some(root) => root,
            None => Digest::zero(trie.digest_len())?,
        };
        tracing::debug!(root = %local_root, items = trie.len(), "sync process started");

        Ok(Self {
            trie,
            filter,
            handler,
            budget: config.subtrie_budget(),
            max_outstanding: config.max_outstanding_requests,
            local_root,
            peer_root: None,
            roots_equal: false,
            inbound: Inbound::Root,
            outbound: Outbound::Root,
            input: BytesMut::new(),
            output: Vec::new(),
            out_pos: 0,
            awaiting: VecDeque::new(),
            wanted: VecDeque::new(),
            serving: VecDeque::new(),
            requested: HashSet::new(),
            candidates: HashSet::new(),
            root_sent: false,
            peer_done: false,
            finished: false,
            stats: SyncStats::default(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Driving
    // ─────────────────────────────────────────────────────────────────────────

    /// Consume `input` from the peer and write pending bytes into `output`.
    pub fn step(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress> {
        if self.finished {
            if !input.is_empty() {
                return Err(SyncError::Protocol(format!(
                    "{} bytes received after synchronization finished",
                    input.len()
                )));
            }
            return Ok(Progress::default());
        }

        let before = self.state();
        self.input.extend_from_slice(input);
        self.stats.bytes_in += input.len() as u64;
        self.read_input()?;

        let produced = self.write_output(output)?;
        self.stats.bytes_out += produced as u64;
        self.update_finished();

        let after = self.state();
        if before != after {
            tracing::debug!(from = %before, to = %after, "sync state changed");
        }
        Ok(Progress {
            consumed: input.len(),
            produced,
        })
    }

    /// Signal that the peer's stream has ended.
    ///
    /// Fails with [`SyncError::Truncated`] unless the process is done.
    pub fn end_of_input(&self) -> Result<()> {
        if self.finished {
            Ok(())
        } else {
            Err(SyncError::Truncated {
                state: self.state(),
            })
        }
    }

    /// True once both sides know their differences and all output is out.
    pub fn done(&self) -> bool {
        self.finished
    }

    /// Current phase.
    pub fn state(&self) -> SyncState {
        if self.finished {
            return SyncState::Equal;
        }
        if self.peer_root.is_none() || self.roots_equal || self.outbound == Outbound::Root {
            return SyncState::Start;
        }
        let receiving_filter = matches!(
            self.inbound,
            Inbound::FilterHeader | Inbound::FilterBits { .. }
        );
        let sending_filter = matches!(
            self.outbound,
            Outbound::AwaitPeerRoot | Outbound::FilterBits { .. }
        );
        if receiving_filter || sending_filter {
            SyncState::Bloom
        } else {
            SyncState::Trie
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Root hash announced to the peer.
    pub fn local_root(&self) -> &Digest {
        &self.local_root
    }

    /// Root hash announced by the peer, once received.
    pub fn peer_root(&self) -> Option<&Digest> {
        self.peer_root.as_ref()
    }

    fn digest_len(&self) -> usize {
        self.trie.digest_len()
    }

    fn update_finished(&mut self) {
        let flushed = self.out_pos >= self.output.len();
        let finished = if self.roots_equal {
            flushed && self.outbound != Outbound::Root
        } else {
            flushed
                && self.root_sent
                && self.peer_done
                && self.awaiting.is_empty()
                && self.wanted.is_empty()
                && self.serving.is_empty()
                && self.input.is_empty()
        };
        if finished && !self.finished {
            self.finished = true;
            tracing::debug!(
                bytes_in = self.stats.bytes_in,
                bytes_out = self.stats.bytes_out,
                missing = self.stats.missing,
                candidates = self.stats.candidates,
                "sync finished"
            );
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Input
    // ─────────────────────────────────────────────────────────────────────────

    fn read_input(&mut self) -> Result<()> {
        loop {
            match self.inbound {
                Inbound::Root => {
                    let len = self.digest_len();
                    if self.input.len() < len {
                        return Ok(());
                    }
                    let root = self.trie.hasher().parse(&self.input[..len])?;
                    self.input.advance(len);
                    self.on_peer_root(root)?;
                }
                Inbound::FilterHeader => {
                    let Some((header, used)) = PacketHeader::decode(&self.input)? else {
                        return Ok(());
                    };
                    match header.packet_type {
                        PacketType::Filter => {
                            let expected = self.filter.byte_len() as u64;
                            if header.size != expected {
                                return Err(SyncError::Protocol(format!(
                                    "peer filter is {} bytes, local filter is {}",
                                    header.size, expected
                                )));
                            }
                        }
                        PacketType::CompressedFilter => {
                            return Err(SyncError::Protocol(
                                "compressed filters are not supported".into(),
                            ));
                        }
                        PacketType::ErrorMsg => return Err(self.peer_error(header)),
                        other => {
                            return Err(SyncError::Protocol(format!(
                                "expected FILTER, got {:?}",
                                other
                            )));
                        }
                    }
                    self.input.advance(used);
                    self.inbound = Inbound::FilterBits { offset: 0 };
                }
                Inbound::FilterBits { offset } => {
                    let take = (self.filter.byte_len() - offset).min(self.input.len());
                    if take > 0 {
                        self.diff_filter(offset, take)?;
                    }
                    let offset = offset + take;
                    if offset == self.filter.byte_len() {
                        self.inbound = Inbound::Packets;
                    } else {
                        self.inbound = Inbound::FilterBits { offset };
                        return Ok(());
                    }
                }
                Inbound::Packets => {
                    let Some((header, used)) = PacketHeader::decode(&self.input)? else {
                        return Ok(());
                    };
                    self.check_packet(&header)?;
                    let total = used + header.payload_len(self.digest_len()) as usize;
                    if self.input.len() < total {
                        return Ok(());
                    }
                    let packet = self.input.split_to(total).freeze();
                    self.on_packet(header, &packet[used..])?;
                }
                Inbound::Closed => {
                    if self.input.is_empty() {
                        return Ok(());
                    }
                    return Err(SyncError::Protocol(format!(
                        "{} bytes received after matching roots",
                        self.input.len()
                    )));
                }
            }
        }
    }

    fn on_peer_root(&mut self, root: Digest) -> Result<()> {
        self.peer_root = Some(root);
        if root == self.local_root {
            tracing::debug!(root = %root, "roots match");
            self.roots_equal = true;
            self.inbound = Inbound::Closed;
            return Ok(());
        }
        if !root.is_zero() && self.trie.contains(&root)? == NodeKind::NotFound {
            self.want(root);
        }
        self.inbound = Inbound::FilterHeader;
        Ok(())
    }

    /// Diff `take` buffered bytes of the peer's filter at `offset`.
    fn diff_filter(&mut self, offset: usize, take: usize) -> Result<()> {
        let Self {
            filter,
            input,
            handler,
            candidates,
            stats,
            ..
        } = self;
        filter.diff(&input[..take], offset, |digest| {
            if candidates.insert(digest) {
                stats.candidates += 1;
                handler(SyncEvent::Candidate(digest));
            }
        })?;
        input.advance(take);
        Ok(())
    }

    /// Reject headers that cannot appear in the packet phase, before
    /// buffering their payload.
    fn check_packet(&self, header: &PacketHeader) -> Result<()> {
        match header.packet_type {
            PacketType::Subtrie | PacketType::SubtrieRequest => Ok(()),
            PacketType::TrieRoot if header.size == self.digest_len() as u64 => Ok(()),
            PacketType::TrieRoot => Err(SyncError::Protocol(format!(
                "TRIE_ROOT of {} bytes",
                header.size
            ))),
            PacketType::ErrorMsg if header.size <= MAX_ERROR_MESSAGE_LEN => Ok(()),
            PacketType::ErrorMsg => Err(SyncError::Protocol(format!(
                "error message of {} bytes",
                header.size
            ))),
            other => Err(SyncError::Protocol(format!(
                "unexpected {:?} packet during trie exchange",
                other
            ))),
        }
    }

    fn on_packet(&mut self, header: PacketHeader, payload: &[u8]) -> Result<()> {
        let len = self.digest_len();
        match header.packet_type {
            PacketType::SubtrieRequest => {
                if self.peer_done {
                    return Err(SyncError::Protocol("request after TRIE_ROOT".into()));
                }
                for chunk in payload.chunks_exact(len) {
                    self.serving.push_back(self.trie.hasher().parse(chunk)?);
                }
                tracing::trace!(count = header.size, "subtrie requests received");
            }
            PacketType::Subtrie => {
                let Some(request) = self.awaiting.pop_front() else {
                    return Err(SyncError::Protocol("unsolicited SUBTRIE".into()));
                };
                tracing::trace!(request = %request, count = header.size, "subtrie received");
                if header.size == 1 {
                    let hash = self.trie.hasher().parse(payload)?;
                    if hash != request {
                        return Err(SyncError::Protocol(format!(
                            "single-entry reply {} for request {}",
                            hash, request
                        )));
                    }
                    self.stats.missing += 1;
                    (self.handler)(SyncEvent::Missing(request));
                } else {
                    let mut unknown = Vec::new();
                    self.trie.diff(payload, |hash| unknown.push(hash))?;
                    for hash in unknown {
                        self.want(hash);
                    }
                }
            }
            PacketType::TrieRoot => {
                if self.peer_done {
                    return Err(SyncError::Protocol("duplicate TRIE_ROOT".into()));
                }
                let root = self.trie.hasher().parse(payload)?;
                if Some(root) != self.peer_root {
                    return Err(SyncError::Protocol(format!(
                        "TRIE_ROOT {} differs from announced root",
                        root
                    )));
                }
                self.peer_done = true;
            }
            PacketType::ErrorMsg => return Err(self.peer_error_payload(payload)),
            other => {
                return Err(SyncError::Protocol(format!(
                    "unexpected {:?} packet during trie exchange",
                    other
                )));
            }
        }
        Ok(())
    }

    fn want(&mut self, hash: Digest) {
        if self.requested.insert(hash) {
            self.wanted.push_back(hash);
        }
    }

    fn peer_error(&self, header: PacketHeader) -> SyncError {
        // The message body may not have arrived; report what we have.
        let used = header.encoded_len();
        let end = self
            .input
            .len()
            .min(used + header.size.min(MAX_ERROR_MESSAGE_LEN) as usize);
        self.peer_error_payload(&self.input[used.min(end)..end])
    }

    fn peer_error_payload(&self, payload: &[u8]) -> SyncError {
        SyncError::PeerError(String::from_utf8_lossy(payload).into_owned())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Output
    // ─────────────────────────────────────────────────────────────────────────

    fn write_output(&mut self, output: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        loop {
            if self.out_pos < self.output.len() {
                let n = (self.output.len() - self.out_pos).min(output.len() - written);
                output[written..written + n]
                    .copy_from_slice(&self.output[self.out_pos..self.out_pos + n]);
                written += n;
                self.out_pos += n;
                if self.out_pos < self.output.len() {
                    return Ok(written);
                }
                self.output.clear();
                self.out_pos = 0;
            }
            if written == output.len() {
                return Ok(written);
            }

            if let Outbound::FilterBits { offset } = self.outbound {
                let n = self.filter.chunk(offset, &mut output[written..]);
                written += n;
                let offset = offset + n;
                self.outbound = if offset >= self.filter.byte_len() {
                    Outbound::Packets
                } else {
                    Outbound::FilterBits { offset }
                };
                continue;
            }

            if !self.queue_next()? {
                return Ok(written);
            }
        }
    }

    /// Encode the next unit of output. Returns `false` if there is none yet.
    fn queue_next(&mut self) -> Result<bool> {
        match self.outbound {
            Outbound::Root => {
                self.output.extend_from_slice(self.local_root.as_bytes());
                self.outbound = Outbound::AwaitPeerRoot;
                Ok(true)
            }
            Outbound::AwaitPeerRoot => {
                if self.peer_root.is_none() || self.roots_equal {
                    return Ok(false);
                }
                PacketHeader::new(PacketType::Filter, self.filter.byte_len() as u64)
                    .encode(&mut self.output)?;
                self.outbound = Outbound::FilterBits { offset: 0 };
                Ok(true)
            }
            Outbound::FilterBits { .. } => Ok(false),
            Outbound::Packets => self.queue_packet(),
        }
    }

    fn queue_packet(&mut self) -> Result<bool> {
        // Answer the oldest peer request first.
        if let Some(request) = self.serving.pop_front() {
            let cut = self
                .trie
                .sub_trie(&request, self.budget)?
                .ok_or_else(|| SyncError::Protocol(format!("peer requested unknown node {}", request)))?;
            PacketHeader::new(PacketType::Subtrie, cut.len() as u64).encode(&mut self.output)?;
            for hash in &cut {
                self.output.extend_from_slice(hash.as_bytes());
            }
            self.stats.cuts_served += 1;
            return Ok(true);
        }

        let room = self
            .max_outstanding
            .saturating_sub(self.awaiting.len())
            .min(MAX_SUBTRIE_DIGESTS as usize)
            .min(self.wanted.len());
        if room > 0 {
            PacketHeader::new(PacketType::SubtrieRequest, room as u64).encode(&mut self.output)?;
            for hash in self.wanted.drain(..room) {
                self.output.extend_from_slice(hash.as_bytes());
                self.awaiting.push_back(hash);
            }
            self.stats.requests_sent += room as u64;
            tracing::trace!(count = room, outstanding = self.awaiting.len(), "subtrie requests sent");
            return Ok(true);
        }

        if !self.root_sent && self.wanted.is_empty() && self.awaiting.is_empty() {
            PacketHeader::new(PacketType::TrieRoot, self.digest_len() as u64)
                .encode(&mut self.output)?;
            self.output.extend_from_slice(self.local_root.as_bytes());
            self.root_sent = true;
            return Ok(true);
        }
        Ok(false)
    }
}

impl<S, H, F> fmt::Debug for SyncProcess<'_, S, H, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncProcess")
            .field("local_root", &self.local_root)
            .field("peer_root", &self.peer_root)
            .field("inbound", &self.inbound)
            .field("outbound", &self.outbound)
            .field("awaiting", &self.awaiting.len())
            .field("wanted", &self.wanted.len())
            .field("serving", &self.serving.len())
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use setsync_bloom::BloomConfig;
    use setsync_core::Blake3Digest;
    use setsync_store::MemoryStore;
    use setsync_trie::Hashing;

    use super::*;

    const LEN: usize = 20;

    fn hasher() -> Blake3Digest {
        Blake3Digest::with_len(LEN).unwrap()
    }

    struct Peer {
        trie: Trie<MemoryStore>,
        filter: BloomFilter<MemoryStore>,
    }

    fn peer<I: IntoIterator<Item = u32>>(items: I) -> Peer {
        let store = Arc::new(MemoryStore::new());
        let config = BloomConfig {
            expected_items: 200,
            ..BloomConfig::default()
        };
        let mut trie = Trie::open(Arc::clone(&store), hasher()).unwrap();
        let mut filter = BloomFilter::open(store, LEN, &config).unwrap();
        for item in items {
            let d = hasher().digest(&item.to_be_bytes());
            trie.insert(&d, Hashing::Deferred).unwrap();
            filter.add(&d).unwrap();
        }
        trie.flush().unwrap();
        Peer { trie, filter }
    }

    fn digests<I: IntoIterator<Item = u32>>(items: I) -> BTreeSet<Digest> {
        items
            .into_iter()
            .map(|i| hasher().digest(&i.to_be_bytes()))
            .collect()
    }

    /// Shuttle bytes between two processes until both are done.
    fn pump<Fa, Fb>(
        a: &mut SyncProcess<'_, MemoryStore, Blake3Digest, Fa>,
        b: &mut SyncProcess<'_, MemoryStore, Blake3Digest, Fb>,
        chunk: usize,
    ) -> Result<()>
    where
        Fa: FnMut(SyncEvent),
        Fb: FnMut(SyncEvent),
    {
        let mut a_to_b = Vec::new();
        let mut b_to_a = Vec::new();
        let mut buf = vec![0u8; chunk];
        for _ in 0..1_000_000 {
            let progress = a.step(&b_to_a, &mut buf)?;
            b_to_a.clear();
            a_to_b.extend_from_slice(&buf[..progress.produced]);

            let progress = b.step(&a_to_b, &mut buf)?;
            a_to_b.clear();
            b_to_a.extend_from_slice(&buf[..progress.produced]);

            if a.done() && b.done() {
                return Ok(());
            }
        }
        panic!("synchronization did not finish");
    }

    fn missing(events: &[SyncEvent]) -> BTreeSet<Digest> {
        events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::Missing(d) => Some(*d),
                SyncEvent::Candidate(_) => None,
            })
            .collect()
    }

    fn run(a: &Peer, b: &Peer, config: &SyncConfig, chunk: usize) -> (Vec<SyncEvent>, Vec<SyncEvent>) {
        let mut events_a = Vec::new();
        let mut events_b = Vec::new();
        {
            let mut pa = SyncProcess::new(&a.trie, &a.filter, config, |e| events_a.push(e)).unwrap();
            let mut pb = SyncProcess::new(&b.trie, &b.filter, config, |e| events_b.push(e)).unwrap();
            pump(&mut pa, &mut pb, chunk).unwrap();
            assert_eq!(pa.state(), SyncState::Equal);
            assert!(pa.end_of_input().is_ok());
        }
        (events_a, events_b)
    }

    #[test]
    fn test_equal_roots_finish_after_start() {
        let a = peer(0..10);
        let b = peer((0..10).rev());
        let mut pa = SyncProcess::new(&a.trie, &a.filter, &SyncConfig::default(), |_| {}).unwrap();
        let mut pb = SyncProcess::new(&b.trie, &b.filter, &SyncConfig::default(), |_| {}).unwrap();
        pump(&mut pa, &mut pb, 64).unwrap();
        // Only the roots crossed the wire.
        assert_eq!(pa.stats().bytes_out, LEN as u64);
        assert_eq!(pb.stats().bytes_in, LEN as u64);
    }

    #[test]
    fn test_both_empty_are_equal() {
        let a = peer([]);
        let b = peer([]);
        let (ea, eb) = run(&a, &b, &SyncConfig::default(), 16);
        assert!(ea.is_empty() && eb.is_empty());
    }

    #[test]
    fn test_symmetric_difference_found() {
        let a = peer(0..50);
        let b = peer(30..90);
        let (ea, eb) = run(&a, &b, &SyncConfig::default(), 40);

        assert_eq!(missing(&ea), digests(50..90));
        assert_eq!(missing(&eb), digests(0..30));
        // Each difference is reported once.
        assert_eq!(ea.iter().filter(|e| matches!(e, SyncEvent::Missing(_))).count(), 40);
    }

    #[test]
    fn test_empty_side_receives_everything() {
        let a = peer([]);
        let b = peer(0..20);
        let (ea, eb) = run(&a, &b, &SyncConfig::default(), 7);
        assert_eq!(missing(&ea), digests(0..20));
        assert!(missing(&eb).is_empty());
        // B's filter bits are all set where A's are clear.
        let candidates: BTreeSet<Digest> = eb
            .iter()
            .filter_map(|e| match e {
                SyncEvent::Candidate(d) => Some(*d),
                SyncEvent::Missing(_) => None,
            })
            .collect();
        assert_eq!(candidates, digests(0..20));
    }

    #[test]
    fn test_small_budget_and_tiny_buffers() {
        let a = peer((0..40).map(|i| i * 3));
        let b = peer((0..40).map(|i| i * 2));
        let config = SyncConfig {
            subtrie_budget: 2,
            max_outstanding_requests: 3,
            ..SyncConfig::default()
        };
        let (ea, eb) = run(&a, &b, &config, 1);

        let left: BTreeSet<u32> = (0..40).map(|i| i * 3).collect();
        let right: BTreeSet<u32> = (0..40).map(|i| i * 2).collect();
        assert_eq!(missing(&ea), digests(right.difference(&left).copied()));
        assert_eq!(missing(&eb), digests(left.difference(&right).copied()));
    }

    #[test]
    fn test_large_bursts_of_small_packets() {
        let a = peer(0..300);
        let b = peer(150..450);
        let config = SyncConfig {
            subtrie_budget: 2,
            max_outstanding_requests: 1024,
            ..SyncConfig::default()
        };
        let mut events_a = Vec::new();
        let mut events_b = Vec::new();
        {
            let mut pa = SyncProcess::new(&a.trie, &a.filter, &config, |e| events_a.push(e)).unwrap();
            let mut pb = SyncProcess::new(&b.trie, &b.filter, &config, |e| events_b.push(e)).unwrap();
            // Every step hands over hundreds of packets at once.
            pump(&mut pa, &mut pb, 1 << 20).unwrap();
            assert!(pa.input.is_empty() && pb.input.is_empty());
            assert_eq!(pa.stats().bytes_in, pb.stats().bytes_out);
            assert_eq!(pb.stats().bytes_in, pa.stats().bytes_out);
        }
        assert_eq!(missing(&events_a), digests(300..450));
        assert_eq!(missing(&events_b), digests(0..150));
    }

    #[test]
    fn test_truncated_input() {
        let a = peer(0..5);
        let mut pa = SyncProcess::new(&a.trie, &a.filter, &SyncConfig::default(), |_| {}).unwrap();
        let mut out = [0u8; 64];
        pa.step(&[0u8; 7], &mut out).unwrap();
        assert_eq!(pa.state(), SyncState::Start);
        assert!(matches!(
            pa.end_of_input(),
            Err(SyncError::Truncated { state: SyncState::Start })
        ));
    }

    #[test]
    fn test_filter_size_mismatch_rejected() {
        let a = peer(0..5);
        let mut pa = SyncProcess::new(&a.trie, &a.filter, &SyncConfig::default(), |_| {}).unwrap();
        let mut input = hasher().digest(b"other root").as_bytes().to_vec();
        input.extend(PacketHeader::new(PacketType::Filter, 3).to_vec().unwrap());
        let mut out = [0u8; 64];
        assert!(matches!(pa.step(&input, &mut out), Err(SyncError::Protocol(_))));
    }

    #[test]
    fn test_compressed_filter_rejected() {
        let a = peer(0..5);
        let mut pa = SyncProcess::new(&a.trie, &a.filter, &SyncConfig::default(), |_| {}).unwrap();
        let mut input = hasher().digest(b"other root").as_bytes().to_vec();
        let size = a.filter.byte_len() as u64;
        input.extend(PacketHeader::new(PacketType::CompressedFilter, size).to_vec().unwrap());
        let mut out = [0u8; 64];
        assert!(matches!(pa.step(&input, &mut out), Err(SyncError::Protocol(_))));
    }

    /// Root plus an all-zero filter, putting the peer in the trie phase.
    fn into_trie_phase(a: &Peer, root: &Digest) -> Vec<u8> {
        let mut input = root.as_bytes().to_vec();
        let size = a.filter.byte_len();
        input.extend(PacketHeader::new(PacketType::Filter, size as u64).to_vec().unwrap());
        input.extend(std::iter::repeat(0u8).take(size));
        input
    }

    #[test]
    fn test_unsolicited_subtrie_rejected() {
        let a = peer(0..5);
        let mut pa = SyncProcess::new(&a.trie, &a.filter, &SyncConfig::default(), |_| {}).unwrap();
        let mut input = into_trie_phase(&a, &Digest::zero(LEN).unwrap());
        input.extend(PacketHeader::new(PacketType::Subtrie, 1).to_vec().unwrap());
        input.extend_from_slice(hasher().digest(b"x").as_bytes());
        let mut out = vec![0u8; 4096];
        assert!(matches!(pa.step(&input, &mut out), Err(SyncError::Protocol(_))));
    }

    #[test]
    fn test_peer_error_message() {
        let a = peer(0..5);
        let mut pa = SyncProcess::new(&a.trie, &a.filter, &SyncConfig::default(), |_| {}).unwrap();
        let mut input = into_trie_phase(&a, &Digest::zero(LEN).unwrap());
        input.extend(PacketHeader::new(PacketType::ErrorMsg, 4).to_vec().unwrap());
        input.extend_from_slice(b"boom");
        let mut out = vec![0u8; 4096];
        match pa.step(&input, &mut out) {
            Err(SyncError::PeerError(message)) => assert_eq!(message, "boom"),
            other => panic!("expected peer error, got {:?}", other),
        }
    }

    #[test]
    fn test_mismatched_trie_root_rejected() {
        let a = peer(0..5);
        let mut pa = SyncProcess::new(&a.trie, &a.filter, &SyncConfig::default(), |_| {}).unwrap();
        let mut input = into_trie_phase(&a, &Digest::zero(LEN).unwrap());
        input.extend(PacketHeader::new(PacketType::TrieRoot, LEN as u64).to_vec().unwrap());
        input.extend_from_slice(hasher().digest(b"not the root").as_bytes());
        let mut out = vec![0u8; 4096];
        assert!(matches!(pa.step(&input, &mut out), Err(SyncError::Protocol(_))));
    }

    #[test]
    fn test_data_after_equal_rejected() {
        let a = peer(0..3);
        let mut pa = SyncProcess::new(&a.trie, &a.filter, &SyncConfig::default(), |_| {}).unwrap();
        let root = a.trie.root_hash().unwrap().unwrap();
        let mut out = [0u8; 64];
        pa.step(root.as_bytes(), &mut out).unwrap();
        assert!(pa.done());
        assert!(matches!(pa.step(&[1], &mut out), Err(SyncError::Protocol(_))));
    }

    #[test]
    fn test_unflushed_trie_rejected() {
        let mut a = peer(0..3);
        a.trie.insert(&hasher().digest(b"pending"), Hashing::Deferred).unwrap();
        let result = SyncProcess::new(&a.trie, &a.filter, &SyncConfig::default(), |_| {});
        assert!(matches!(result, Err(SyncError::Trie(_))));
        a.trie.abort();
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(24))]

        #[test]
        fn test_sync_finds_exact_difference(
            left in proptest::collection::btree_set(0u32..300, 0..80),
            right in proptest::collection::btree_set(0u32..300, 0..80),
            chunk in 1usize..200,
            budget in 2usize..70,
        ) {
            let a = peer(left.iter().copied());
            let b = peer(right.iter().copied());
            let config = SyncConfig { subtrie_budget: budget, ..SyncConfig::default() };
            let (ea, eb) = run(&a, &b, &config, chunk);
            proptest::prop_assert_eq!(missing(&ea), digests(right.difference(&left).copied()));
            proptest::prop_assert_eq!(missing(&eb), digests(left.difference(&right).copied()));
        }
    }
}
