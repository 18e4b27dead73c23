//! Test utilities for blockchain testing

use crate::config::ChainConfig;
use crate::core::{Block, Blockchain, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::MemoryPool;
use crate::wallet::Wallet;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tempfile::TempDir;

// One founder key per test process; every test chain credits it at genesis
static FOUNDER: Lazy<Wallet> = Lazy::new(|| Wallet::new().expect("founder key"));

/// Development parameters with the founder as genesis receiver
pub fn test_config() -> ChainConfig {
    ChainConfig::development().with_genesis_address(&FOUNDER.address())
}

/// A wallet plus its cached address
pub struct TestWallet {
    wallet: Wallet,
    address: String,
}

impl TestWallet {
    pub fn new() -> TestWallet {
        Self::from_wallet(Wallet::new().expect("wallet key"))
    }

    /// Holder of the genesis allocation in [`test_config`]
    pub fn founder() -> TestWallet {
        Self::from_wallet(FOUNDER.clone())
    }

    fn from_wallet(wallet: Wallet) -> TestWallet {
        let address = wallet.address();
        TestWallet { wallet, address }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn transfer(&self, receiver: &str, amount: u64, fee: u64) -> Transaction {
        self.wallet
            .sign_transaction(receiver, amount, fee)
            .expect("signing a transfer")
    }
}

/// Create a temporary directory for testing
pub fn create_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(|e| BlockchainError::Io(e.to_string()))
}

/// Open a fresh chain on [`test_config`]
pub fn open_chain() -> (TempDir, Blockchain, ChainConfig) {
    let dir = create_temp_dir().expect("temp dir");
    let config = test_config();
    let chain = Blockchain::open(dir.path(), config.clone(), Arc::new(MemoryPool::new()))
        .expect("open test chain");
    (dir, chain, config)
}

/// Create multiple test chains sharing one genesis
pub fn create_test_network(node_count: usize) -> Vec<(TempDir, Blockchain)> {
    (0..node_count)
        .map(|_| {
            let (dir, chain, _) = open_chain();
            (dir, chain)
        })
        .collect()
}

/// Build, mine and accept the next block from the current pool
pub fn mine_next_block(chain: &Blockchain, miner_address: &str) -> Result<Block> {
    let candidate = chain.build_candidate(&chain.pool().peek_all(), miner_address)?;
    let block = chain
        .mine(candidate, || false)?
        .ok_or_else(|| BlockchainError::Mining("uncancellable mining returned nothing".into()))?;
    chain.accept_block(&block)?;
    Ok(block)
}

/// Re-validate every stored block against its predecessor
pub fn validate_blockchain_integrity(chain: &Blockchain) -> Result<bool> {
    let mut previous: Option<Block> = None;
    for block in chain.iterator() {
        let block = block?;
        if chain.validate(&block, previous.as_ref()).is_err() {
            return Ok(false);
        }
        previous = Some(block);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_network_shares_genesis() {
        let nodes = create_test_network(3);
        assert_eq!(nodes.len(), 3);

        let hashes: Vec<String> = nodes
            .iter()
            .map(|(_, chain)| chain.latest_block().unwrap().get_hash().to_string())
            .collect();
        assert!(hashes.iter().all(|hash| hash == &hashes[0]));
    }

    #[test]
    fn test_validate_blockchain_integrity() {
        let (_dir, chain, _) = open_chain();
        mine_next_block(&chain, "miner").unwrap();
        mine_next_block(&chain, "miner").unwrap();
        assert!(validate_blockchain_integrity(&chain).unwrap());
    }

    #[test]
    fn test_founder_holds_genesis() {
        let (_dir, chain, config) = open_chain();
        assert_eq!(
            chain.get_balance(TestWallet::founder().address()).unwrap(),
            config.genesis_amount
        );
    }
}
