//! Serialized filter snapshots.
//!
//! A snapshot is the bit array plus the counters needed to query it. It has
//! no reverse index, so it answers membership but cannot be diffed or
//! mutated. Layout:
//!
//! ```text
//! magic "SSBF" | version u8 | scheme u8 | digest_len u8 | filter_size u64 LE
//! | function_count u32 LE | item_count u64 LE | bits (ceil(filter_size/8) bytes)
//! ```

use std::io::{Read, Write};

use setsync_core::{Digest, DoubleHashing, HashScheme, MAX_DIGEST_LEN, MIN_DIGEST_LEN};

use crate::error::{BloomError, Result};
use crate::filter::{bit_is_set, copy_chunk};

const MAGIC: &[u8; 4] = b"SSBF";
const VERSION: u8 = 2;
const HEADER_LEN: usize = 4 + 1 + 1 + 1 + 8 + 4 + 8;

/// Largest bit array a snapshot may declare (512 MiB).
const MAX_SNAPSHOT_BYTES: u64 = 512 * 1024 * 1024;

/// A read-only copy of a Bloom filter's bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSnapshot {
    filter_size: u64,
    function_count: u32,
    scheme: HashScheme,
    digest_len: usize,
    item_count: u64,
    bits: Vec<u8>,
}

impl FilterSnapshot {
    pub(crate) fn new(
        filter_size: u64,
        function_count: u32,
        scheme: HashScheme,
        digest_len: usize,
        item_count: u64,
        bits: Vec<u8>,
    ) -> Self {
        Self {
            filter_size,
            function_count,
            scheme,
            digest_len,
            item_count,
            bits,
        }
    }

    /// Number of bits.
    pub fn filter_size(&self) -> u64 {
        self.filter_size
    }

    /// Number of hash functions.
    pub fn function_count(&self) -> u32 {
        self.function_count
    }

    /// Digest length the filter was built for.
    pub fn digest_len(&self) -> usize {
        self.digest_len
    }

    /// Items in the filter when the snapshot was taken.
    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    /// The raw bit array.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Membership test against the captured bits.
    ///
    /// Fails if `digest` is not [`digest_len`](Self::digest_len) bytes.
    pub fn contains(&self, digest: &Digest) -> Result<bool> {
        let hashing =
            DoubleHashing::with_scheme(digest.as_bytes(), self.digest_len, self.scheme)?;
        let hit = hashing
            .positions(self.function_count, self.filter_size)
            .all(|pos| bit_is_set(&self.bits, pos));
        Ok(hit)
    }

    /// Copy bytes of the bit array starting at `offset` into `buf`.
    pub fn chunk(&self, offset: usize, buf: &mut [u8]) -> usize {
        copy_chunk(&self.bits, offset, buf)
    }

    /// Write the snapshot to `writer`.
    pub fn save<W: Write>(&self, mut writer: W) -> Result<()> {
        let scheme = match self.scheme {
            HashScheme::Double => 0u8,
            HashScheme::Extended => 1u8,
        };
        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(MAGIC);
        header.push(VERSION);
        header.push(scheme);
        header.push(self.digest_len as u8);
        header.extend_from_slice(&self.filter_size.to_le_bytes());
        header.extend_from_slice(&self.function_count.to_le_bytes());
        header.extend_from_slice(&self.item_count.to_le_bytes());

        writer.write_all(&header)?;
        writer.write_all(&self.bits)?;
        writer.flush()?;
        Ok(())
    }

    /// Read a snapshot from `reader`.
    pub fn load<R: Read>(mut reader: R) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header)?;

        if &header[0..4] != MAGIC {
            return Err(BloomError::InvalidSnapshot("bad magic".into()));
        }
        if header[4] != VERSION {
            return Err(BloomError::InvalidSnapshot(format!(
                "unsupported version {}",
                header[4]
            )));
        }
        let scheme = match header[5] {
            0 => HashScheme::Double,
            1 => HashScheme::Extended,
            other => {
                return Err(BloomError::InvalidSnapshot(format!(
                    "unknown hash scheme {}",
                    other
                )))
            }
        };

        let digest_len = usize::from(header[6]);
        if !(MIN_DIGEST_LEN..=MAX_DIGEST_LEN).contains(&digest_len) {
            return Err(BloomError::InvalidSnapshot(format!(
                "unsupported digest length {}",
                digest_len
            )));
        }
        let filter_size = u64::from_le_bytes(read_array(&header[7..15]));
        let function_count = u32::from_le_bytes(read_array(&header[15..19]));
        let item_count = u64::from_le_bytes(read_array(&header[19..27]));

        if filter_size == 0 || function_count == 0 {
            return Err(BloomError::InvalidSnapshot("empty filter".into()));
        }
        let byte_len = filter_size.div_ceil(8);
        if byte_len > MAX_SNAPSHOT_BYTES {
            return Err(BloomError::InvalidSnapshot(format!(
                "bit array of {} bytes is too large",
                byte_len
            )));
        }

        let mut bits = vec![0u8; byte_len as usize];
        reader.read_exact(&mut bits)?;

        Ok(Self {
            filter_size,
            function_count,
            scheme,
            digest_len,
            item_count,
            bits,
        })
    }
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use setsync_core::{Blake3Digest, CoreError, DigestFunction};
    use setsync_store::MemoryStore;

    use super::*;
    use crate::config::BloomConfig;
    use crate::filter::BloomFilter;

    fn filled_filter(scheme: HashScheme) -> BloomFilter<MemoryStore> {
        let hasher = Blake3Digest::with_len(20).unwrap();
        let config = BloomConfig {
            expected_items: 50,
            scheme,
            ..BloomConfig::default()
        };
        let mut filter = BloomFilter::open(Arc::new(MemoryStore::new()), 20, &config).unwrap();
        for i in 0..30u32 {
            filter.add(&hasher.digest(&i.to_be_bytes())).unwrap();
        }
        filter
    }

    #[test]
    fn test_save_load_roundtrip() {
        for scheme in [HashScheme::Double, HashScheme::Extended] {
            let filter = filled_filter(scheme);
            let mut buf = Vec::new();
            filter.save(&mut buf).unwrap();
            assert_eq!(buf.len(), HEADER_LEN + filter.byte_len());

            let loaded = FilterSnapshot::load(buf.as_slice()).unwrap();
            assert_eq!(loaded.as_bytes(), filter.as_bytes());
            assert_eq!(loaded.item_count(), filter.item_count());
            assert_eq!(loaded.filter_size(), filter.filter_size());
            assert_eq!(loaded.digest_len(), 20);
            assert_eq!(loaded, filter.snapshot());
        }
    }

    #[test]
    fn test_snapshot_contains_matches_filter() {
        let hasher = Blake3Digest::with_len(20).unwrap();
        let filter = filled_filter(HashScheme::Extended);
        let snapshot = filter.snapshot();
        for i in 0..60u32 {
            let d = hasher.digest(&i.to_be_bytes());
            assert_eq!(snapshot.contains(&d).unwrap(), filter.contains(&d).unwrap());
        }
    }

    #[test]
    fn test_load_rejects_garbage() {
        assert!(matches!(
            FilterSnapshot::load(&b"XXXX\x01\x00"[..]),
            Err(BloomError::Io(_))
        ));

        let filter = filled_filter(HashScheme::Double);
        let mut buf = Vec::new();
        filter.save(&mut buf).unwrap();

        let mut bad_magic = buf.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            FilterSnapshot::load(bad_magic.as_slice()),
            Err(BloomError::InvalidSnapshot(_))
        ));

        let mut bad_version = buf.clone();
        bad_version[4] = 9;
        assert!(matches!(
            FilterSnapshot::load(bad_version.as_slice()),
            Err(BloomError::InvalidSnapshot(_))
        ));

        let mut bad_len = buf.clone();
        bad_len[6] = 8;
        assert!(matches!(
            FilterSnapshot::load(bad_len.as_slice()),
            Err(BloomError::InvalidSnapshot(_))
        ));

        let truncated = &buf[..buf.len() - 1];
        assert!(matches!(
            FilterSnapshot::load(truncated),
            Err(BloomError::Io(_))
        ));
    }

    #[test]
    fn test_snapshot_rejects_wrong_digest_length() {
        let filter = filled_filter(HashScheme::Double);
        let mut buf = Vec::new();
        filter.save(&mut buf).unwrap();
        let loaded = FilterSnapshot::load(buf.as_slice()).unwrap();

        let short = Blake3Digest::with_len(16).unwrap().digest(b"short");
        assert!(matches!(
            loaded.contains(&short),
            Err(BloomError::Core(CoreError::DigestLength {
                expected: 20,
                got: 16
            }))
        ));
        assert!(filter.contains(&short).is_err());

        let long = Blake3Digest::with_len(32).unwrap().digest(b"long");
        assert!(loaded.contains(&long).is_err());
    }
}
