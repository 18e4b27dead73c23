use crate::error::{BlockchainError, Result};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

pub const DEFAULT_TRANSACTION_FEE: u64 = 1;
pub const DEFAULT_MINING_REWARD: u64 = 50;
pub const DEFAULT_MAX_SUPPLY: u64 = 21_000_000;
pub const DEFAULT_GENESIS_AMOUNT: u64 = 100_000;
pub const DEFAULT_GENESIS_TIME: i64 = 1_690_365_924_213;
pub const DEFAULT_GENESIS_ADDRESS: &str = "04227ea4320cfd7d50fd821b3cc66d7bcbd80a8806dc3e5ce90fba3c6594920c482d6360933fd149363d5d1177320e108d836165ae48ece6d9c54919565c2f0562";
pub const DEFAULT_BLOCK_VERSION: &str = "1.0.0";
pub const DEFAULT_MAX_TARGET: &str =
    "00000fffffff0000000000000000000000000000000000000000000000000000";
pub const DEFAULT_BOOTSTRAP_DIFFICULTY: u64 = 0x10;
pub const DEFAULT_TARGET_BLOCK_TIME_MS: u64 = 20_000;
pub const DEFAULT_TARGET_BLOCK_INTERVAL: u64 = 2;
pub const DEFAULT_MAX_BLOCK_TRANSACTIONS: usize = 500;

/// Digest used for block header hashing and proof-of-work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowAlgorithm {
    #[default]
    Sha256,
    Argon2,
}

impl fmt::Display for PowAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowAlgorithm::Sha256 => write!(f, "sha256"),
            PowAlgorithm::Argon2 => write!(f, "argon2"),
        }
    }
}

/// Chain parameters injected at startup.
///
/// Every peer on a network must run with the same values: they feed the genesis
/// block hash, the expected difficulty of every block and the reward schedule.
/// Nothing mutates a `ChainConfig` once a node is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub transaction_fee: u64,
    pub mining_reward: u64,
    pub max_supply: u64,
    pub genesis_address: String,
    pub genesis_amount: u64,
    pub genesis_time: i64,
    pub block_version: String,
    /// Hex encoded upper bound for header hashes at difficulty 1
    pub max_target: String,
    pub bootstrap_difficulty: u64,
    pub target_block_time_ms: u64,
    pub target_block_interval: u64,
    pub max_block_transactions: usize,
    pub pow_algorithm: PowAlgorithm,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            transaction_fee: DEFAULT_TRANSACTION_FEE,
            mining_reward: DEFAULT_MINING_REWARD,
            max_supply: DEFAULT_MAX_SUPPLY,
            genesis_address: DEFAULT_GENESIS_ADDRESS.to_string(),
            genesis_amount: DEFAULT_GENESIS_AMOUNT,
            genesis_time: DEFAULT_GENESIS_TIME,
            block_version: DEFAULT_BLOCK_VERSION.to_string(),
            max_target: DEFAULT_MAX_TARGET.to_string(),
            bootstrap_difficulty: DEFAULT_BOOTSTRAP_DIFFICULTY,
            target_block_time_ms: DEFAULT_TARGET_BLOCK_TIME_MS,
            target_block_interval: DEFAULT_TARGET_BLOCK_INTERVAL,
            max_block_transactions: DEFAULT_MAX_BLOCK_TRANSACTIONS,
            pow_algorithm: PowAlgorithm::Sha256,
        }
    }
}

impl ChainConfig {
    /// Easy target and short intervals for local networks and tests
    pub fn development() -> Self {
        Self {
            max_target: "f".repeat(64),
            bootstrap_difficulty: 2,
            target_block_time_ms: 1_000,
            target_block_interval: 5,
            ..Self::default()
        }
    }

    /// Load a TOML file; keys that are absent keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: ChainConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_genesis_address(mut self, address: &str) -> Self {
        self.genesis_address = address.to_string();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.bootstrap_difficulty == 0 {
            return Err(BlockchainError::Config(
                "bootstrap_difficulty must be at least 1".to_string(),
            ));
        }
        if self.target_block_interval == 0 || self.target_block_time_ms == 0 {
            return Err(BlockchainError::Config(
                "target_block_interval and target_block_time_ms must be positive".to_string(),
            ));
        }
        if self.max_block_transactions == 0 {
            return Err(BlockchainError::Config(
                "max_block_transactions must be positive".to_string(),
            ));
        }
        if self.genesis_amount > self.max_supply {
            return Err(BlockchainError::Config(format!(
                "genesis_amount {} exceeds max_supply {}",
                self.genesis_amount, self.max_supply
            )));
        }
        if self.genesis_address.is_empty() {
            return Err(BlockchainError::Config(
                "genesis_address must not be empty".to_string(),
            ));
        }
        self.max_target_value()?;
        Ok(())
    }

    pub fn max_target_value(&self) -> Result<BigUint> {
        let trimmed = self.max_target.trim_start_matches("0x");
        BigUint::parse_bytes(trimmed.as_bytes(), 16)
            .filter(|target| target.bits() > 0)
            .ok_or_else(|| {
                BlockchainError::Config(format!("Invalid max_target: {}", self.max_target))
            })
    }

    /// Ideal duration of one retarget window in milliseconds
    pub fn ideal_interval_ms(&self) -> u64 {
        self.target_block_time_ms * self.target_block_interval
    }
}
