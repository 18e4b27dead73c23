//! Core blockchain functionality
//!
//! Transactions and their hashing, the Merkle commitment, blocks, proof-of-work
//! with ratio retargeting, and the chain state machine that validates, applies
//! and commits blocks.

pub mod block;
pub mod blockchain;
pub mod difficulty;
pub mod merkle;
pub mod proof_of_work;
pub mod transaction;

pub use block::{Block, BlockHeader, GENESIS_PREVIOUS_HEADER};
pub use blockchain::{BlockOutcome, Blockchain, BlockchainIterator};
pub use difficulty::DifficultyAdjustment;
pub use merkle::{MerkleProof, MerkleTree, ProofElement};
pub use proof_of_work::{ProofOfWork, MINING_BATCH_SIZE};
pub use transaction::{Transaction, COINBASE_SENDER, GENESIS_SENDER};
