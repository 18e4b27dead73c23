use crate::config::ChainConfig;
use crate::core::{MerkleProof, MerkleTree, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use serde::{Deserialize, Serialize};

pub const GENESIS_PREVIOUS_HEADER: &str = "0";

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    version: String,
    previous_block_header: String,
    merkle_root: String,
    time: i64,
    difficulty: u64,
    // Assigned once mining succeeds; not part of the hashed payload
    hash: Option<String>,
}

impl BlockHeader {
    /// version ‖ previous_block_header ‖ merkle_root ‖ time ‖ nonce
    pub fn hash_payload(&self, nonce: u64) -> String {
        format!(
            "{}{}{}{}{}",
            self.version, self.previous_block_header, self.merkle_root, self.time, nonce
        )
    }

    pub fn get_version(&self) -> &str {
        self.version.as_str()
    }

    pub fn get_previous_block_header(&self) -> &str {
        self.previous_block_header.as_str()
    }

    pub fn get_merkle_root(&self) -> &str {
        self.merkle_root.as_str()
    }

    pub fn get_time(&self) -> i64 {
        self.time
    }

    pub fn get_difficulty(&self) -> u64 {
        self.difficulty
    }

    pub fn get_hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Block {
    block_header: BlockHeader,
    index: u64,
    transactions: Vec<Transaction>,
    nonce: u64,
    // Non-system subset of `transactions`
    tx: Vec<Transaction>,
}

impl Block {
    /// An unmined block; the merkle root is computed from `transactions`
    pub fn new_candidate(
        version: &str,
        previous_block_header: &str,
        transactions: Vec<Transaction>,
        index: u64,
        difficulty: u64,
        time: i64,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let merkle_root = MerkleTree::compute_root(&transactions)?;
        let tx = transactions
            .iter()
            .filter(|tx| !tx.is_system())
            .cloned()
            .collect();

        Ok(Block {
            block_header: BlockHeader {
                version: version.to_string(),
                previous_block_header: previous_block_header.to_string(),
                merkle_root,
                time,
                difficulty,
                hash: None,
            },
            index,
            transactions,
            nonce: 0,
            tx,
        })
    }

    /// Block 0: one genesis allocation at the configured fixed time, hashed with nonce 0.
    /// Every peer running the same `ChainConfig` derives the same block.
    pub fn genesis<F>(config: &ChainConfig, header_hash: F) -> Result<Block>
    where
        F: Fn(&BlockHeader, u64) -> Result<String>,
    {
        let allocation = Transaction::new_genesis(
            &config.genesis_address,
            config.genesis_amount,
            config.genesis_time,
        );
        let mut block = Block::new_candidate(
            &config.block_version,
            GENESIS_PREVIOUS_HEADER,
            vec![allocation],
            0,
            config.bootstrap_difficulty,
            config.genesis_time,
        )?;
        let hash = header_hash(&block.block_header, 0)?;
        block.seal(0, hash);
        Ok(block)
    }

    /// Record the winning nonce and header hash
    pub fn seal(&mut self, nonce: u64, hash: String) {
        self.nonce = nonce;
        self.block_header.hash = Some(hash);
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn header(&self) -> &BlockHeader {
        &self.block_header
    }

    /// Header hash, empty for a block that was never mined
    pub fn get_hash(&self) -> &str {
        self.block_header.get_hash().unwrap_or_default()
    }

    pub fn get_index(&self) -> u64 {
        self.index
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_time(&self) -> i64 {
        self.block_header.time
    }

    pub fn get_difficulty(&self) -> u64 {
        self.block_header.difficulty
    }

    pub fn get_previous_block_header(&self) -> &str {
        self.block_header.get_previous_block_header()
    }

    pub fn get_merkle_root(&self) -> &str {
        self.block_header.get_merkle_root()
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    /// User transactions only
    pub fn get_tx(&self) -> &[Transaction] {
        self.tx.as_slice()
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    /// Verify that the block's Merkle root matches its transactions
    pub fn verify_merkle_root(&self) -> Result<()> {
        let found = MerkleTree::compute_root(&self.transactions)?;
        if found != self.block_header.merkle_root {
            return Err(BlockchainError::MerkleMismatch {
                expected: self.block_header.merkle_root.clone(),
                found,
            });
        }
        Ok(())
    }

    /// Generate a Merkle proof for a transaction in this block
    pub fn merkle_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        MerkleTree::new(&self.transactions)?.proof(transaction_index)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    /// Test helper to overwrite the committed merkle root
    #[cfg(test)]
    pub fn set_merkle_root(&mut self, merkle_root: &str) {
        self.block_header.merkle_root = merkle_root.to_string();
    }
}
