use crate::core::BlockHeader;
use crate::error::{BlockchainError, Result};
use crate::utils::Hasher;
use log::debug;
use num_bigint::BigUint;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Targets are counted in leading zero bits of a 256-bit hash
pub const MAX_TARGET_BITS: u32 = 256;

const DEFAULT_MAX_NONCE: u64 = u64::MAX;

/// Result of one sweep over the nonce space
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowOutcome {
    Solved { nonce: u64, hash: Vec<u8> },
    /// Every nonce up to the limit failed; refresh the timestamp and retry
    Exhausted,
    /// The cancellation token fired mid-search
    Cancelled,
}

#[derive(Clone)]
pub struct ProofOfWork {
    hasher: Arc<dyn Hasher>,
    max_nonce: u64,
}

impl ProofOfWork {
    pub fn new(hasher: Arc<dyn Hasher>) -> ProofOfWork {
        ProofOfWork {
            hasher,
            max_nonce: DEFAULT_MAX_NONCE,
        }
    }

    pub fn with_max_nonce(mut self, max_nonce: u64) -> ProofOfWork {
        self.max_nonce = max_nonce;
        self
    }

    /// threshold = 2^(256 - target)
    pub fn threshold(target: u32) -> Result<BigUint> {
        if target > MAX_TARGET_BITS {
            return Err(BlockchainError::Mining(format!(
                "Target of {target} bits exceeds the {MAX_TARGET_BITS}-bit hash space"
            )));
        }
        Ok(BigUint::from(1u8) << (MAX_TARGET_BITS - target))
    }

    fn meets_threshold(hash: &[u8], threshold: &BigUint) -> bool {
        BigUint::from_bytes_be(hash) < *threshold
    }

    /// Search nonces `0..=max_nonce` for a hash under the header's threshold.
    /// The token is checked on every iteration.
    pub fn search(&self, header: &BlockHeader, cancel: &CancellationToken) -> Result<PowOutcome> {
        let threshold = Self::threshold(header.get_target())?;
        let mut nonce = 0u64;
        loop {
            if cancel.is_cancelled() {
                debug!(
                    "Proof-of-work at height {} cancelled at nonce {nonce}",
                    header.get_height()
                );
                return Ok(PowOutcome::Cancelled);
            }

            let hash = self.hasher.digest(&header.assemble_with_nonce(nonce));
            if Self::meets_threshold(&hash, &threshold) {
                return Ok(PowOutcome::Solved { nonce, hash });
            }

            if nonce == self.max_nonce {
                return Ok(PowOutcome::Exhausted);
            }
            nonce += 1;
        }
    }

    /// Recompute the header hash with its stored nonce and compare
    pub fn verify(&self, header: &BlockHeader) -> bool {
        let threshold = match Self::threshold(header.get_target()) {
            Ok(threshold) => threshold,
            Err(_) => return false,
        };
        let hash = self.hasher.digest(&header.assemble());
        Self::meets_threshold(&hash, &threshold)
    }
}
