//! Async session driver.
//!
//! Runs a [`SyncProcess`] against one peer over a [`Transport`]. Process
//! output is shipped as `DATA` frames; a failure is announced to the peer
//! with an `ERROR_MSG` frame before it is returned.

use std::time::Duration;

use bytes::{Bytes, BytesMut};

use setsync_bloom::BloomFilter;
use setsync_core::{Digest, DigestFunction, PacketHeader, PacketType};
use setsync_store::KeyValueStore;
use setsync_trie::Trie;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::process::{SyncEvent, SyncProcess, SyncStats, MAX_ERROR_MESSAGE_LEN};
use crate::transport::{NodeId, Transport};

/// Result of a sync session.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Digests the peer holds that the local set lacks.
    pub missing: Vec<Digest>,
    /// Local digests the peer probably lacks, from the Bloom round.
    pub candidates: Vec<Digest>,
    /// Byte and message counters from the process.
    pub stats: SyncStats,
    /// Frames sent to the peer.
    pub frames_sent: usize,
    /// Frames received from the peer.
    pub frames_received: usize,
}

/// Sync session with a single peer.
pub struct SyncSession<T: Transport> {
    transport: T,
    peer: NodeId,
    config: SyncConfig,
}

impl<T: Transport> SyncSession<T> {
    /// Create a new sync session.
    pub fn new(transport: T, peer: NodeId, config: SyncConfig) -> Self {
        Self {
            transport,
            peer,
            config,
        }
    }

    /// The peer this session talks to.
    pub fn peer(&self) -> &NodeId {
        &self.peer
    }

    /// The session configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Synchronize the local `trie` and `filter` with the peer.
    ///
    /// Nothing is applied locally; the report lists what was found.
    pub async fn run<S, H>(&self, trie: &Trie<S, H>, filter: &BloomFilter<S>) -> Result<SyncReport>
    where
        S: KeyValueStore,
        H: DigestFunction,
    {
        let mut report = SyncReport::default();
        let mut events = Vec::new();

        let result = match SyncProcess::new(trie, filter, &self.config, |e| events.push(e)) {
            Ok(mut process) => self.drive(&mut process, &mut report).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.announce(&e).await;
            return Err(e);
        }

        for event in events {
            match event {
                SyncEvent::Missing(digest) => report.missing.push(digest),
                SyncEvent::Candidate(digest) => report.candidates.push(digest),
            }
        }
        tracing::info!(
            peer = %self.peer,
            missing = report.missing.len(),
            candidates = report.candidates.len(),
            frames_sent = report.frames_sent,
            frames_received = report.frames_received,
            "sync session complete"
        );
        Ok(report)
    }

    async fn drive<S, H, F>(
        &self,
        process: &mut SyncProcess<'_, S, H, F>,
        report: &mut SyncReport,
    ) -> Result<()>
    where
        S: KeyValueStore,
        H: DigestFunction,
        F: FnMut(SyncEvent),
    {
        let mut out = vec![0u8; self.config.output_buffer(process.local_root().len())];
        let mut inbound = Bytes::new();

        loop {
            let progress = process.step(&inbound, &mut out)?;
            inbound = Bytes::new();

            if progress.produced > 0 {
                self.send_frame(PacketType::Data, &out[..progress.produced])
                    .await?;
                report.frames_sent += 1;
            }
            if process.done() {
                report.stats = *process.stats();
                return Ok(());
            }

            // Keep producing while there is output; only block when idle.
            let wait = if progress.produced > 0 {
                Duration::ZERO
            } else {
                self.config.message_timeout
            };
            match self.transport.recv_timeout(wait).await? {
                Some((from, frame)) => {
                    if from != self.peer {
                        tracing::warn!(from = %from, "dropping frame from unexpected node");
                        continue;
                    }
                    report.frames_received += 1;
                    inbound = unframe(frame)?;
                }
                None if progress.produced > 0 => {}
                None => {
                    return Err(SyncError::Timeout(format!(
                        "no frame from {} in state {}",
                        self.peer,
                        process.state()
                    )));
                }
            }
        }
    }

    async fn send_frame(&self, packet_type: PacketType, payload: &[u8]) -> Result<()> {
        let header = PacketHeader::new(packet_type, payload.len() as u64);
        let mut frame = BytesMut::with_capacity(header.encoded_len() + payload.len());
        header.encode(&mut frame)?;
        frame.extend_from_slice(payload);
        self.transport.send(&self.peer, frame.freeze()).await
    }

    /// Tell the peer we are aborting. Errors the peer caused itself are not
    /// echoed back.
    async fn announce(&self, error: &SyncError) {
        if matches!(error, SyncError::PeerError(_) | SyncError::Transport(_)) {
            return;
        }
        let message = error.to_string();
        let len = message.len().min(MAX_ERROR_MESSAGE_LEN as usize);
        if let Err(e) = self
            .send_frame(PacketType::ErrorMsg, &message.as_bytes()[..len])
            .await
        {
            tracing::warn!(peer = %self.peer, error = %e, "failed to send error to peer");
        }
    }
}

/// Strip the frame header, leaving the process payload.
fn unframe(frame: Bytes) -> Result<Bytes> {
    let (header, used) = PacketHeader::decode(&frame)?
        .ok_or_else(|| SyncError::Protocol("truncated frame header".into()))?;
    let payload = frame.slice(used..);
    match header.packet_type {
        PacketType::Data | PacketType::ErrorMsg if payload.len() as u64 != header.size => {
            Err(SyncError::Protocol(format!(
                "frame declares {} bytes, carries {}",
                header.size,
                payload.len()
            )))
        }
        PacketType::Data => Ok(payload),
        PacketType::ErrorMsg => Err(SyncError::PeerError(
            String::from_utf8_lossy(&payload).into_owned(),
        )),
        other => Err(SyncError::Protocol(format!("unexpected {:?} frame", other))),
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
    use crate::transport::memory::{MemoryNetwork, MemoryTransport};

    fn hasher() -> Blake3Digest {
        Blake3Digest::with_len(20).unwrap()
    }

    struct Peer {
        trie: Trie<MemoryStore>,
        filter: BloomFilter<MemoryStore>,
    }

    fn peer(items: std::ops::Range<u32>) -> Peer {
        let store = Arc::new(MemoryStore::new());
        let mut trie = Trie::open(Arc::clone(&store), hasher()).unwrap();
        let mut filter = BloomFilter::open(store, 20, &BloomConfig::default()).unwrap();
        for i in items {
            let d = hasher().digest(&i.to_le_bytes());
            trie.insert(&d, Hashing::Deferred).unwrap();
            filter.add(&d).unwrap();
        }
        trie.flush().unwrap();
        Peer { trie, filter }
    }

    async fn pair(config: SyncConfig) -> (SyncSession<MemoryTransport>, SyncSession<MemoryTransport>) {
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

    #[tokio::test]
    async fn test_sessions_converge() {
        let a = peer(0..300);
        let b = peer(200..450);
        let config = SyncConfig {
            min_output_buffer: 256,
            ..SyncConfig::default()
        };
        let (sa, sb) = pair(config).await;

        let (ra, rb) = tokio::join!(sa.run(&a.trie, &a.filter), sb.run(&b.trie, &b.filter));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        let expect = |r: std::ops::Range<u32>| -> BTreeSet<Digest> {
            r.map(|i| hasher().digest(&i.to_le_bytes())).collect()
        };
        assert_eq!(ra.missing.iter().copied().collect::<BTreeSet<_>>(), expect(300..450));
        assert_eq!(rb.missing.iter().copied().collect::<BTreeSet<_>>(), expect(0..200));
        assert!(ra.frames_sent > 1);
        assert_eq!(ra.frames_sent, rb.frames_received);
        assert_eq!(ra.stats.bytes_out, rb.stats.bytes_in);
    }

    #[tokio::test]
    async fn test_equal_sets_exchange_only_roots() {
        let a = peer(0..50);
        let b = peer(0..50);
        let (sa, sb) = pair(SyncConfig::default()).await;
        let (ra, rb) = tokio::join!(sa.run(&a.trie, &a.filter), sb.run(&b.trie, &b.filter));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        assert!(ra.missing.is_empty() && rb.missing.is_empty());
        assert_eq!(ra.frames_sent, 1);
        assert_eq!(ra.stats.bytes_out, 20);
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let a = peer(0..5);
        let config = SyncConfig {
            message_timeout: Duration::from_millis(50),
            ..SyncConfig::default()
        };
        let (sa, _sb) = pair(config).await;
        assert!(matches!(
            sa.run(&a.trie, &a.filter).await,
            Err(SyncError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_frame_is_reported_to_peer() {
        let a = peer(0..5);
        let (sa, sb) = pair(SyncConfig::default()).await;

        let bogus = PacketHeader::new(PacketType::Filter, 0).to_vec().unwrap();
        sb.transport().send(&NodeId::from_name("a"), Bytes::from(bogus)).await.unwrap();

        assert!(matches!(
            sa.run(&a.trie, &a.filter).await,
            Err(SyncError::Protocol(_))
        ));

        // B first sees A's root, then the error.
        let (_, first) = sb.transport().recv().await.unwrap();
        assert!(unframe(first).is_ok());
        let (_, second) = sb.transport().recv().await.unwrap();
        assert!(matches!(unframe(second), Err(SyncError::PeerError(_))));
    }

    #[test]
    fn test_unframe_rejects_length_mismatch() {
        let mut frame = PacketHeader::new(PacketType::Data, 10).to_vec().unwrap();
        frame.extend_from_slice(b"short");
        assert!(matches!(
            unframe(Bytes::from(frame)),
            Err(SyncError::Protocol(_))
        ));
        assert!(matches!(
            unframe(Bytes::from_static(&[0u8; 3])),
            Err(SyncError::Protocol(_))
        ));
    }
}
