//! Filter configuration and sizing.

use std::f64::consts::LN_2;
use std::fmt;

use serde::{Deserialize, Serialize};

use setsync_core::{CoreError, HashScheme, MIN_DIGEST_LEN};

use crate::error::{BloomError, Result};

/// User-facing filter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomConfig {
    /// Number of elements the filter is sized for (`n`).
    pub expected_items: u64,
    /// Target false-positive rate (`p`), in `(0, 1)`.
    pub false_positive_rate: f64,
    /// Hard cap on stored items; `None` means unbounded.
    pub max_items: Option<u64>,
    /// Which double-hashing variant maps digests to bits.
    pub scheme: HashScheme,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            expected_items: 10_000,
            false_positive_rate: 0.01,
            max_items: None,
            scheme: HashScheme::Double,
        }
    }
}

/// Derived, persisted filter parameters.
///
/// Two filters can only be diffed against each other when their parameters
/// are identical, so these are stored next to the filter and checked on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterParams {
    /// Exact number of bits (`m`).
    pub filter_size: u64,
    /// Number of hash functions (`k`).
    pub function_count: u32,
    /// Digest length in bytes.
    pub digest_len: u32,
    /// Hash scheme.
    pub scheme: HashScheme,
}

impl FilterParams {
    /// Derive parameters from a configuration.
    pub fn from_config(config: &BloomConfig, digest_len: usize) -> Result<Self> {
        if digest_len < MIN_DIGEST_LEN {
            return Err(CoreError::DigestTooShort(digest_len).into());
        }
        let (filter_size, function_count) =
            optimal_size(config.expected_items, config.false_positive_rate)?;
        Ok(Self {
            filter_size,
            function_count,
            digest_len: digest_len as u32,
            scheme: config.scheme,
        })
    }

    /// Length of the bit array in bytes.
    pub fn byte_len(&self) -> usize {
        self.filter_size.div_ceil(8) as usize
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)
            .map_err(|e| BloomError::Serialization(e.to_string()))?;
        Ok(out)
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| BloomError::Serialization(e.to_string()))
    }
}

impl fmt::Display for FilterParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "m={} k={} digest_len={} scheme={:?}",
            self.filter_size, self.function_count, self.digest_len, self.scheme
        )
    }
}

/// Optimal bit count and function count for `n` items at rate `p`.
///
/// `m = ceil(-n·ln(p) / ln(2)²)`, `k = max(1, round(ln(2)·m / n))`.
pub fn optimal_size(expected_items: u64, false_positive_rate: f64) -> Result<(u64, u32)> {
    if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
        return Err(BloomError::InvalidFalsePositiveRate(false_positive_rate));
    }
    if expected_items == 0 {
        return Err(BloomError::ZeroCapacity);
    }

    let n = expected_items as f64;
    let m = (-n * false_positive_rate.ln() / (LN_2 * LN_2)).ceil();
    let k = (LN_2 * m / n).round().max(1.0);
    Ok((m as u64, k as u32))
}
