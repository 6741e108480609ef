//! Packet header codec.
//!
//! Every payload exchanged during synchronization is framed by a header of
//! one or nine bytes. The discriminator bits are read from the least
//! significant end of the first byte:
//!
//! ```text
//! bit0 bit1 bit2 bit3  type               header  size field
//!  0    0    0    -    DATA               9       u64 LE payload length
//!  0    1    0    -    FILTER             9       u64 LE payload length
//!  0    1    1    -    COMPRESSED_FILTER  9       u64 LE payload length
//!  0    0    1    0    ERROR_MSG          9       u64 LE payload length
//!  0    0    1    1    TRIE_ROOT          9       u64 LE payload length
//!  1    0    -    -    SUBTRIE            1       bits 2..8 = digest count - 1
//!  1    1    -    -    SUBTRIE_REQUEST    1       bits 2..8 = digest count - 1
//! ```
//!
//! Subtrie packets carry between 1 and [`MAX_SUBTRIE_DIGESTS`] digests and
//! have no separate length field.

use bytes::BufMut;

use crate::error::{CoreError, Result};

/// Most digests a single SUBTRIE / SUBTRIE_REQUEST packet can carry.
pub const MAX_SUBTRIE_DIGESTS: u64 = 64;

/// Length of the long (length-prefixed) header form.
pub const LONG_HEADER_LEN: usize = 9;

/// Length of the short (subtrie) header form.
pub const SHORT_HEADER_LEN: usize = 1;

mod tags {
    pub const DATA: u8 = 0b0000;
    pub const FILTER: u8 = 0b0010;
    pub const COMPRESSED_FILTER: u8 = 0b0110;
    pub const ERROR_MSG: u8 = 0b0100;
    pub const TRIE_ROOT: u8 = 0b1100;
    pub const SUBTRIE: u8 = 0b01;
    pub const SUBTRIE_REQUEST: u8 = 0b11;
}

/// Packet discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Opaque data.
    Data,
    /// Raw Bloom filter bit array.
    Filter,
    /// Compressed Bloom filter bit array.
    CompressedFilter,
    /// Human-readable error; the sender is aborting.
    ErrorMsg,
    /// A trie root hash.
    TrieRoot,
    /// A subtrie cut (node hashes).
    Subtrie,
    /// Requests for subtrie cuts (node hashes).
    SubtrieRequest,
}

impl PacketType {
    /// True for the one-byte header types.
    pub const fn is_subtrie(self) -> bool {
        matches!(self, PacketType::Subtrie | PacketType::SubtrieRequest)
    }
}

/// A decoded packet header.
///
/// For subtrie packets `size` is a digest count; for every other type it is
/// a payload length in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet discriminator.
    pub packet_type: PacketType,
    /// Digest count or payload byte length.
    pub size: u64,
}

impl PacketHeader {
    /// Create a header.
    pub const fn new(packet_type: PacketType, size: u64) -> Self {
        Self { packet_type, size }
    }

    /// Encoded header length.
    pub const fn encoded_len(&self) -> usize {
        if self.packet_type.is_subtrie() {
            SHORT_HEADER_LEN
        } else {
            LONG_HEADER_LEN
        }
    }

    /// Payload length following the header.
    pub fn payload_len(&self, digest_len: usize) -> u64 {
        if self.packet_type.is_subtrie() {
            self.size * digest_len as u64
        } else {
            self.size
        }
    }

    /// Append the encoded header to `out`.
    ///
    /// A subtrie count of zero is clamped to one; a count above
    /// [`MAX_SUBTRIE_DIGESTS`] is rejected.
    pub fn encode<B: BufMut>(&self, out: &mut B) -> Result<()> {
        let tag = match self.packet_type {
            PacketType::Data => tags::DATA,
            PacketType::Filter => tags::FILTER,
            PacketType::CompressedFilter => tags::COMPRESSED_FILTER,
            PacketType::ErrorMsg => tags::ERROR_MSG,
            PacketType::TrieRoot => tags::TRIE_ROOT,
            PacketType::Subtrie | PacketType::SubtrieRequest => {
                if self.size > MAX_SUBTRIE_DIGESTS {
                    return Err(CoreError::SubtrieTooLarge(self.size));
                }
                let count = self.size.max(1) - 1;
                let tag = if self.packet_type == PacketType::Subtrie {
                    tags::SUBTRIE
                } else {
                    tags::SUBTRIE_REQUEST
                };
                out.put_u8(((count as u8) << 2) | tag);
                return Ok(());
            }
        };
        out.put_u8(tag);
        out.put_u64_le(self.size);
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode a header from the front of `buf`.
    ///
    /// Returns `Ok(None)` if more bytes are needed, otherwise the header and
    /// the number of bytes it occupied.
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };

        if first & 1 == 1 {
            let packet_type = if first & 0b10 == 0 {
                PacketType::Subtrie
            } else {
                PacketType::SubtrieRequest
            };
            let size = u64::from(first >> 2) + 1;
            return Ok(Some((Self { packet_type, size }, SHORT_HEADER_LEN)));
        }

        let packet_type = match first {
            tags::DATA => PacketType::Data,
            tags::FILTER => PacketType::Filter,
            tags::COMPRESSED_FILTER => PacketType::CompressedFilter,
            tags::ERROR_MSG => PacketType::ErrorMsg,
            tags::TRIE_ROOT => PacketType::TrieRoot,
            other => return Err(CoreError::UnknownPacketType(other)),
        };

        if buf.len() < LONG_HEADER_LEN {
            return Ok(None);
        }
        let mut size = [0u8; 8];
        size.copy_from_slice(&buf[1..LONG_HEADER_LEN]);

        Ok(Some((
            Self {
                packet_type,
                size: u64::from_le_bytes(size),
            },
            LONG_HEADER_LEN,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtrie_roundtrip() {
        let header = PacketHeader::new(PacketType::Subtrie, 40);
        let bytes = header.to_vec().unwrap();
        assert_eq!(bytes.len(), 1);

        let (decoded, used) = PacketHeader::decode(&bytes).unwrap().unwrap();
        assert_eq!(used, 1);
        assert_eq!(decoded.packet_type, PacketType::Subtrie);
        assert_eq!(decoded.size, 40);
    }

    #[test]
    fn test_subtrie_size_zero_clamps_to_one() {
        let bytes = PacketHeader::new(PacketType::SubtrieRequest, 0).to_vec().unwrap();
        let (decoded, _) = PacketHeader::decode(&bytes).unwrap().unwrap();
        assert_eq!(decoded.packet_type, PacketType::SubtrieRequest);
        assert_eq!(decoded.size, 1);
    }

    #[test]
    fn test_subtrie_size_limit() {
        assert!(PacketHeader::new(PacketType::Subtrie, 64).to_vec().is_ok());
        assert!(matches!(
            PacketHeader::new(PacketType::Subtrie, 100).to_vec(),
            Err(CoreError::SubtrieTooLarge(100))
        ));
    }

    #[test]
    fn test_long_headers() {
        for packet_type in [
            PacketType::Data,
            PacketType::Filter,
            PacketType::CompressedFilter,
            PacketType::ErrorMsg,
            PacketType::TrieRoot,
        ] {
            let header = PacketHeader::new(packet_type, 0x0102_0304_0506);
            let bytes = header.to_vec().unwrap();
            assert_eq!(bytes.len(), LONG_HEADER_LEN);
            assert_eq!(&bytes[1..], &0x0102_0304_0506u64.to_le_bytes());

            let (decoded, used) = PacketHeader::decode(&bytes).unwrap().unwrap();
            assert_eq!(decoded, header);
            assert_eq!(used, LONG_HEADER_LEN);
        }
    }

    #[test]
    fn test_decode_incomplete() {
        assert!(PacketHeader::decode(&[]).unwrap().is_none());
        let bytes = PacketHeader::new(PacketType::Filter, 128).to_vec().unwrap();
        assert!(PacketHeader::decode(&bytes[..5]).unwrap().is_none());
    }

    #[test]
    fn test_decode_unknown_type() {
        assert!(matches!(
            PacketHeader::decode(&[0b1000_0000]),
            Err(CoreError::UnknownPacketType(0b1000_0000))
        ));
    }

    #[test]
    fn test_payload_len() {
        assert_eq!(PacketHeader::new(PacketType::Subtrie, 3).payload_len(20), 60);
        assert_eq!(PacketHeader::new(PacketType::Data, 3).payload_len(20), 3);
    }
}
