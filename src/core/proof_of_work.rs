use crate::config::{ChainConfig, PowAlgorithm};
use crate::core::{Block, BlockHeader};
use crate::error::{BlockchainError, Result};
use crate::utils::{argon2_digest, sha256_digest};
use data_encoding::HEXLOWER;
use log::{debug, info};
use num_bigint::BigUint;
use once_cell::sync::Lazy;

/// Nonces tried between two looks at the cancellation signal
pub const MINING_BATCH_SIZE: u64 = 10_000;

// Largest value a 256-bit digest can take; targets never exceed it
static HASH_SPACE_MAX: Lazy<BigUint> = Lazy::new(|| (BigUint::from(1u8) << 256u32) - 1u8);

/// Header hashing and target checks shared by mining and validation
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    algorithm: PowAlgorithm,
    max_target: BigUint,
}

impl ProofOfWork {
    pub fn new(config: &ChainConfig) -> Result<ProofOfWork> {
        let max_target = config.max_target_value()?.min(HASH_SPACE_MAX.clone());
        Ok(ProofOfWork {
            algorithm: config.pow_algorithm,
            max_target,
        })
    }

    pub fn algorithm(&self) -> PowAlgorithm {
        self.algorithm
    }

    /// target = max_target / difficulty
    pub fn target(&self, difficulty: u64) -> Result<BigUint> {
        if difficulty == 0 {
            return Err(BlockchainError::InvalidBlock(
                "Difficulty must be at least 1".to_string(),
            ));
        }
        Ok(&self.max_target / BigUint::from(difficulty))
    }

    fn digest(&self, payload: &[u8]) -> Result<Vec<u8>> {
        match self.algorithm {
            PowAlgorithm::Sha256 => Ok(sha256_digest(payload)),
            PowAlgorithm::Argon2 => argon2_digest(payload),
        }
    }

    pub fn header_hash(&self, header: &BlockHeader, nonce: u64) -> Result<String> {
        let digest = self.digest(header.hash_payload(nonce).as_bytes())?;
        Ok(HEXLOWER.encode(&digest))
    }

    pub fn meets_target(hash_hex: &str, target: &BigUint) -> bool {
        match BigUint::parse_bytes(hash_hex.as_bytes(), 16) {
            Some(value) => &value <= target,
            None => false,
        }
    }

    /// Recompute the header hash and check it against the stored hash and the target
    pub fn validate(&self, block: &Block) -> Result<()> {
        let found = self.header_hash(block.header(), block.get_nonce())?;
        let expected = block.header().get_hash().unwrap_or_default();
        if found != expected {
            return Err(BlockchainError::HashMismatch {
                expected: expected.to_string(),
                found,
            });
        }

        let target = self.target(block.get_difficulty())?;
        if !Self::meets_target(&found, &target) {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {} hash {found} does not meet difficulty {}",
                block.get_index(),
                block.get_difficulty()
            )));
        }
        Ok(())
    }

    /// Search nonces from 0 until the header hash meets the target.
    ///
    /// `is_cancelled` is polled every [`MINING_BATCH_SIZE`] attempts; once it
    /// returns true the search stops and `Ok(None)` is returned. This is CPU bound
    /// and must run on a blocking worker.
    pub fn run<F>(&self, mut candidate: Block, is_cancelled: F) -> Result<Option<Block>>
    where
        F: Fn() -> bool,
    {
        let target = self.target(candidate.get_difficulty())?;
        info!(
            "Mining block {} with difficulty {} ({})",
            candidate.get_index(),
            candidate.get_difficulty(),
            self.algorithm
        );

        let mut nonce: u64 = 0;
        loop {
            if nonce % MINING_BATCH_SIZE == 0 && is_cancelled() {
                debug!(
                    "Mining of block {} cancelled after {nonce} attempts",
                    candidate.get_index()
                );
                return Ok(None);
            }

            let digest = self.digest(candidate.header().hash_payload(nonce).as_bytes())?;
            if BigUint::from_bytes_be(&digest) <= target {
                let hash = HEXLOWER.encode(&digest);
                info!(
                    "Mined block {} with nonce {nonce}: {hash}",
                    candidate.get_index()
                );
                candidate.seal(nonce, hash);
                return Ok(Some(candidate));
            }

            nonce = nonce.checked_add(1).ok_or_else(|| {
                BlockchainError::Mining("Nonce space exhausted".to_string())
            })?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn candidate(difficulty: u64) -> Block {
        let coinbase = Transaction::new_coinbase("miner", 50, 0, 1_000);
        Block::new_candidate("1.0.0", "prev", vec![coinbase], 1, difficulty, 1_000).unwrap()
    }

    fn pow() -> ProofOfWork {
        ProofOfWork::new(&ChainConfig::development()).unwrap()
    }

    #[test]
    fn test_target_scales_with_difficulty() {
        let pow = pow();
        let easy = pow.target(1).unwrap();
        let hard = pow.target(16).unwrap();
        assert!(hard < easy);
        assert_eq!(easy, HASH_SPACE_MAX.clone());
        assert!(pow.target(0).is_err());
    }

    #[test]
    fn test_mined_block_validates() {
        let pow = pow();
        let block = pow.run(candidate(4), || false).unwrap().unwrap();
        assert!(pow.validate(&block).is_ok());

        let target = pow.target(4).unwrap();
        assert!(ProofOfWork::meets_target(block.get_hash(), &target));
    }

    #[test]
    fn test_unmined_block_fails_validation() {
        let pow = pow();
        assert!(matches!(
            pow.validate(&candidate(1)),
            Err(BlockchainError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_wrong_nonce_is_hash_mismatch() {
        let pow = pow();
        let mut block = pow.run(candidate(2), || false).unwrap().unwrap();
        let hash = block.get_hash().to_string();
        block.seal(block.get_nonce() + 1, hash);
        assert!(matches!(
            pow.validate(&block),
            Err(BlockchainError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_cancelled_before_first_batch() {
        let cancelled = AtomicBool::new(true);
        let result = pow()
            .run(candidate(u64::MAX), || cancelled.load(Ordering::SeqCst))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_argon2_digest_mines() {
        let config = ChainConfig {
            pow_algorithm: PowAlgorithm::Argon2,
            ..ChainConfig::development()
        };
        let argon = ProofOfWork::new(&config).unwrap();
        let block = argon.run(candidate(1), || false).unwrap().unwrap();
        assert!(argon.validate(&block).is_ok());
        assert_eq!(block.get_nonce(), 0);

        // sha256 nodes disagree with argon2 headers
        assert!(pow().validate(&block).is_err());
    }

    #[test]
    fn test_meets_target_rejects_garbage() {
        assert!(!ProofOfWork::meets_target("xyz", &BigUint::from(10u8)));
        assert!(ProofOfWork::meets_target("0a", &BigUint::from(10u8)));
        assert!(!ProofOfWork::meets_target("0b", &BigUint::from(10u8)));
    }
}
