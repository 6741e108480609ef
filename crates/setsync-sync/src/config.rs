//! Synchronization configuration and buffer sizing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use setsync_core::MAX_SUBTRIE_DIGESTS;

use crate::error::{Result, SyncError};

/// Configuration for a synchronization run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Digests per subtrie cut served to the peer (clamped to 64).
    pub subtrie_budget: usize,
    /// Most of our subtrie requests the peer may owe us at once.
    pub max_outstanding_requests: usize,
    /// Floor for the session's output buffer, in bytes.
    pub min_output_buffer: usize,
    /// Timeout for waiting on peer frames.
    pub message_timeout: Duration,
    /// Estimated round-trip time of the link.
    pub rtt: Duration,
    /// Estimated link bandwidth in bits per second.
    pub bandwidth_bps: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            subtrie_budget: MAX_SUBTRIE_DIGESTS as usize,
            max_outstanding_requests: 256,
            min_output_buffer: 4096,
            message_timeout: Duration::from_secs(30),
            rtt: Duration::ZERO,
            bandwidth_bps: 0,
        }
    }
}

impl SyncConfig {
    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.subtrie_budget() < 2 {
            return Err(SyncError::Config(format!(
                "subtrie budget {} cannot hold two digests",
                self.subtrie_budget
            )));
        }
        if self.max_outstanding_requests == 0 {
            return Err(SyncError::Config(
                "max_outstanding_requests must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The subtrie budget, clamped to `1..=64`.
    pub fn subtrie_budget(&self) -> usize {
        self.subtrie_budget.clamp(1, MAX_SUBTRIE_DIGESTS as usize)
    }

    /// Bytes to produce per step for a given digest length.
    pub fn output_buffer(&self, digest_len: usize) -> usize {
        output_buffer_size(digest_len, self.rtt, self.bandwidth_bps)
            .max(self.min_output_buffer)
            .max(1)
    }
}

/// Output buffer size for one bandwidth-delay product.
///
/// With no RTT estimate this is two digests, enough for the root exchange.
/// Otherwise it is `floor(bandwidth_bps * rtt / 8)` bytes.
pub fn output_buffer_size(digest_len: usize, rtt: Duration, bandwidth_bps: u64) -> usize {
    if rtt.is_zero() {
        return 2 * digest_len;
    }
    let bytes = u128::from(bandwidth_bps) * rtt.as_nanos() / 8_000_000_000;
    usize::try_from(bytes).unwrap_or(usize::MAX)
}
