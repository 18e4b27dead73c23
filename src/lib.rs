//! # Ledger Chain
//!
//! A small proof-of-work chain where every address simply has a balance.
//!
//! ## What is in here
//! - **Balance ledger**: transfers debit `amount + fee` from the sender and
//!   credit the receiver; the miner collects fees plus a fixed reward
//! - **Proof-of-work**: big-integer targets with ratio retargeting every few
//!   blocks, digest chosen per chain (SHA-256 or Argon2)
//! - **Merkle commitments** over each block's transactions, with inclusion proofs
//! - **Atomic commits**: a block, its balance changes and its transaction
//!   records land in one sled transaction or not at all
//! - **Sync protocol**: height exchange, block-by-block catch-up, announced
//!   blocks relayed once accepted, first valid block at an index wins
//!
//! ## Layout
//! - `core/`: transactions, merkle tree, blocks, proof-of-work, retargeting and
//!   the chain state machine
//! - `storage/`: the sled-backed chain store, the balance ledger, the memory pool
//! - `network/`: wire messages, transport, sync handler, mining task, node wiring
//! - `wallet/`: ECDSA P-256 keys and transaction signing
//! - `config/`: chain parameters (TOML) and per-process node settings
//! - `utils/`: hashing, signatures, timestamps, binary encoding
//! - `cli/`: command-line parsing for the binary

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::{ChainConfig, NodeSettings, PowAlgorithm};
pub use core::{
    Block, BlockHeader, BlockOutcome, Blockchain, MerkleProof, MerkleTree, ProofOfWork,
    Transaction,
};
pub use error::{BlockchainError, Result};
pub use network::{submit_transaction, Message, MiningState, Node, SubmissionResult, SyncHandler};
pub use storage::{ChainStore, Ledger, MemoryPool};
pub use utils::{
    current_timestamp, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    new_key_pair, sha256_digest,
};
pub use wallet::{validate_address, Wallet};
