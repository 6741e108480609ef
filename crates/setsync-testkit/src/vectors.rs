//! Known vectors for deterministic verification.
//!
//! Wire-format and hashing-scheme vectors pin down byte layouts that
//! another implementation must reproduce exactly. Scenario vectors name
//! small sets whose synchronization outcome is known in advance.

use setsync_bloom::FilterParams;
use setsync_core::{DoubleHashing, HashScheme, PacketHeader, PacketType};

/// A packet header and its encoding.
#[derive(Debug, Clone)]
pub struct HeaderVector {
    pub name: &'static str,
    pub packet_type: PacketType,
    pub size: u64,
    /// Expected encoding (hex).
    pub encoded: &'static str,
}

/// All packet header vectors.
pub fn header_vectors() -> Vec<HeaderVector> {
    vec![
        HeaderVector {
            name: "data frame of 5 bytes",
            packet_type: PacketType::Data,
            size: 5,
            encoded: "000500000000000000",
        },
        HeaderVector {
            name: "filter of 1199 bytes",
            packet_type: PacketType::Filter,
            size: 1199,
            encoded: "02af04000000000000",
        },
        HeaderVector {
            name: "empty compressed filter",
            packet_type: PacketType::CompressedFilter,
            size: 0,
            encoded: "060000000000000000",
        },
        HeaderVector {
            name: "error message of 3 bytes",
            packet_type: PacketType::ErrorMsg,
            size: 3,
            encoded: "040300000000000000",
        },
        HeaderVector {
            name: "trie root of a 20-byte digest",
            packet_type: PacketType::TrieRoot,
            size: 20,
            encoded: "0c1400000000000000",
        },
        HeaderVector {
            name: "single-digest subtrie",
            packet_type: PacketType::Subtrie,
            size: 1,
            encoded: "01",
        },
        HeaderVector {
            name: "full subtrie",
            packet_type: PacketType::Subtrie,
            size: 64,
            encoded: "fd",
        },
        HeaderVector {
            name: "request for three digests",
            packet_type: PacketType::SubtrieRequest,
            size: 3,
            encoded: "0b",
        },
        HeaderVector {
            name: "full request",
            packet_type: PacketType::SubtrieRequest,
            size: 64,
            encoded: "ff",
        },
    ]
}

/// Encode every header vector and report mismatches as `(name, got)`.
pub fn verify_header_vectors() -> Vec<(String, String)> {
    header_vectors()
        .iter()
        .filter_map(|v| {
            let got = PacketHeader::new(v.packet_type, v.size)
                .to_vec()
                .map(hex::encode)
                .unwrap_or_else(|e| format!("error: {}", e));
            (got != v.encoded).then(|| (v.name.to_string(), got))
        })
        .collect()
}

/// Bloom positions of a fixed digest under one hashing scheme.
#[derive(Debug, Clone)]
pub struct PositionVector {
    pub name: &'static str,
    pub digest: Vec<u8>,
    pub scheme: HashScheme,
    pub filter_size: u64,
    pub function_count: u32,
    /// Distinct positions, ascending.
    pub positions: &'static [u64],
}

/// All Bloom position vectors.
pub fn position_vectors() -> Vec<PositionVector> {
    let counting: Vec<u8> = (0..20).collect();
    let ones = vec![0xff; 20];
    vec![
        PositionVector {
            name: "counting bytes, double hashing",
            digest: counting.clone(),
            scheme: HashScheme::Double,
            filter_size: 1000,
            function_count: 4,
            positions: &[176, 264, 352, 440],
        },
        PositionVector {
            name: "counting bytes, extended hashing",
            digest: counting.clone(),
            scheme: HashScheme::Extended,
            filter_size: 1000,
            function_count: 4,
            positions: &[440, 472, 504, 536],
        },
        PositionVector {
            name: "counting bytes, default sizing for 1000 items",
            digest: counting,
            scheme: HashScheme::Double,
            filter_size: 9586,
            function_count: 7,
            positions: &[102, 1382, 2444, 3724, 5004, 6066, 7346],
        },
        PositionVector {
            name: "all ones wraps",
            digest: ones.clone(),
            scheme: HashScheme::Double,
            filter_size: 1000,
            function_count: 4,
            positions: &[611, 612, 613, 614],
        },
        PositionVector {
            name: "all ones, extended hashing",
            digest: ones,
            scheme: HashScheme::Extended,
            filter_size: 1000,
            function_count: 4,
            positions: &[292, 586, 614, 880],
        },
    ]
}

/// Compute the distinct positions a vector describes.
pub fn compute_positions(vector: &PositionVector) -> setsync_core::Result<Vec<u64>> {
    let hashing = DoubleHashing::with_scheme(&vector.digest, vector.digest.len(), vector.scheme)?;
    let mut positions: Vec<u64> = hashing
        .positions(vector.function_count, vector.filter_size)
        .collect();
    positions.sort_unstable();
    positions.dedup();
    Ok(positions)
}

/// Check that a position vector's sizing matches what a filter would pick.
pub fn sizing_matches(vector: &PositionVector, params: &FilterParams) -> bool {
    params.filter_size == vector.filter_size && params.function_count == vector.function_count
}

/// Two sets named by their members, with the expected outcome.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: &'static str,
    pub local: &'static [&'static str],
    pub remote: &'static [&'static str],
}

impl Scenario {
    /// Members the local side should learn.
    pub fn local_missing(&self) -> Vec<&'static str> {
        self.remote
            .iter()
            .filter(|n| !self.local.contains(n))
            .copied()
            .collect()
    }

    /// Members the remote side should learn.
    pub fn remote_missing(&self) -> Vec<&'static str> {
        self.local
            .iter()
            .filter(|n| !self.remote.contains(n))
            .copied()
            .collect()
    }
}

/// All scenario vectors.
pub fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "subset",
            local: &["bla1", "bla2", "bla3", "bla4", "bla5"],
            remote: &["bla1", "bla2"],
        },
        Scenario {
            name: "disjoint",
            local: &["bla1", "bla2"],
            remote: &["bla3", "bla4", "bla5"],
        },
        Scenario {
            name: "overlap",
            local: &["bla1", "bla2", "bla3"],
            remote: &["bla3", "bla4", "bla5"],
        },
        Scenario {
            name: "equal",
            local: &["bla1", "bla2", "bla3"],
            remote: &["bla3", "bla2", "bla1"],
        },
        Scenario {
            name: "one empty",
            local: &[],
            remote: &["bla1", "bla2", "bla3", "bla4", "bla5"],
        },
        Scenario {
            name: "both empty",
            local: &[],
            remote: &[],
        },
    ]
}

#[cfg(test)]
mod tests {
    use setsync_bloom::BloomConfig;

    use super::*;

    #[test]
    fn test_header_vectors() {
        let failures = verify_header_vectors();
        assert!(failures.is_empty(), "mismatched headers: {:?}", failures);
    }

    #[test]
    fn test_header_vectors_decode() {
        for v in header_vectors() {
            let bytes = hex::decode(v.encoded).unwrap();
            let (header, used) = PacketHeader::decode(&bytes).unwrap().unwrap();
            assert_eq!(used, bytes.len(), "{}", v.name);
            assert_eq!(header, PacketHeader::new(v.packet_type, v.size), "{}", v.name);
        }
    }

    #[test]
    fn test_position_vectors() {
        for v in position_vectors() {
            assert_eq!(compute_positions(&v).unwrap(), v.positions, "{}", v.name);
        }
    }

    #[test]
    fn test_default_sizing_vector() {
        let config = BloomConfig {
            expected_items: 1000,
            ..BloomConfig::default()
        };
        let params = FilterParams::from_config(&config, 20).unwrap();
        let vectors = position_vectors();
        assert!(sizing_matches(&vectors[2], &params), "{:?}", params);
    }

    #[test]
    fn test_scenario_expectations() {
        let subset = &scenarios()[0];
        assert_eq!(subset.local_missing(), Vec::<&str>::new());
        assert_eq!(subset.remote_missing(), vec!["bla3", "bla4", "bla5"]);
        assert!(scenarios()[3].local_missing().is_empty());
    }
}
