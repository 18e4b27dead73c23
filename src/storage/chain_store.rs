// Durable chain state lives in one sled tree with three kinds of keys:
//   block_<index>      -> Block
//   wallet-<address>   -> u64 balance
//   <transaction id>   -> committed Transaction
// Every value is bincode encoded through utils::serialization.

use crate::core::{Block, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use log::debug;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Tree};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CHAIN_TREE: &str = "chain";
pub const BLOCK_KEY_PREFIX: &str = "block_";
pub const WALLET_KEY_PREFIX: &str = "wallet-";

#[derive(Clone)]
pub struct ChainStore {
    db: Db,
    tree: Tree,
    db_path: PathBuf,
}

impl ChainStore {
    pub fn open(path: &Path) -> Result<ChainStore> {
        let db = sled::open(path)
            .map_err(|e| BlockchainError::StoreIo(format!("Failed to open database: {e}")))?;
        let tree = db
            .open_tree(CHAIN_TREE)
            .map_err(|e| BlockchainError::StoreIo(format!("Failed to open chain tree: {e}")))?;
        Ok(ChainStore {
            db,
            tree,
            db_path: path.to_path_buf(),
        })
    }

    pub fn block_key(index: u64) -> String {
        format!("{BLOCK_KEY_PREFIX}{index}")
    }

    pub fn wallet_key(address: &str) -> String {
        format!("{WALLET_KEY_PREFIX}{address}")
    }

    fn is_reserved_key(key: &str) -> bool {
        key.starts_with(BLOCK_KEY_PREFIX) || key.starts_with(WALLET_KEY_PREFIX)
    }

    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    /// Number of stored blocks minus one; `None` while the store is empty
    pub fn height(&self) -> Result<Option<u64>> {
        let mut count: u64 = 0;
        for key in self.tree.scan_prefix(BLOCK_KEY_PREFIX).keys() {
            key?;
            count += 1;
        }
        Ok(count.checked_sub(1))
    }

    pub fn get_block(&self, index: u64) -> Result<Option<Block>> {
        match self.tree.get(Self::block_key(index))? {
            Some(bytes) => Ok(Some(Block::deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn contains_block(&self, index: u64) -> Result<bool> {
        Ok(self.tree.contains_key(Self::block_key(index))?)
    }

    pub fn get_transaction(&self, id: &str) -> Result<Option<Transaction>> {
        match self.tree.get(id)? {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn get_balance(&self, address: &str) -> Result<Option<u64>> {
        match self.tree.get(Self::wallet_key(address))? {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write of a single balance inside one sled transaction
    pub fn update_balance<F>(&self, address: &str, update: F) -> Result<u64>
    where
        F: Fn(u64) -> Result<u64>,
    {
        let key = Self::wallet_key(address);
        let result: std::result::Result<u64, TransactionError<BlockchainError>> =
            self.tree.transaction(|tx_tree| {
                let current = match tx_tree.get(key.as_bytes())? {
                    Some(bytes) => deserialize(bytes.as_ref())
                        .map_err(ConflictableTransactionError::Abort)?,
                    None => 0,
                };
                let next = update(current).map_err(ConflictableTransactionError::Abort)?;
                let encoded = serialize(&next).map_err(ConflictableTransactionError::Abort)?;
                tx_tree.insert(key.as_bytes(), encoded)?;
                Ok(next)
            });
        Ok(result?)
    }

    /// Every `wallet-` entry as (address, balance)
    pub fn balances(&self) -> Result<Vec<(String, u64)>> {
        let mut balances = Vec::new();
        for entry in self.tree.scan_prefix(WALLET_KEY_PREFIX) {
            let (key, value) = entry?;
            let address = String::from_utf8_lossy(&key[WALLET_KEY_PREFIX.len()..]).to_string();
            balances.push((address, deserialize(value.as_ref())?));
        }
        Ok(balances)
    }

    /// Persist a block, its staged balances and its applied transactions in one
    /// sled transaction. Nothing is written if the block index is already taken.
    pub fn commit_block(
        &self,
        block: &Block,
        balances: &BTreeMap<String, u64>,
        transactions: &[Transaction],
    ) -> Result<()> {
        let block_key = Self::block_key(block.get_index());
        let block_bytes = block.serialize()?;
        let balance_entries = balances
            .iter()
            .map(|(address, balance)| Ok((Self::wallet_key(address), serialize(balance)?)))
            .collect::<Result<Vec<_>>>()?;
        let transaction_entries = transactions
            .iter()
            .map(|tx| {
                if Self::is_reserved_key(tx.get_id()) {
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "Transaction id {} collides with a reserved key",
                        tx.get_id()
                    )));
                }
                Ok((tx.get_id().to_string(), serialize(tx)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let result: std::result::Result<(), TransactionError<BlockchainError>> =
            self.tree.transaction(|tx_tree| {
                if tx_tree.get(block_key.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(
                        BlockchainError::ChainLinkage(format!(
                            "Block {} is already stored",
                            block.get_index()
                        )),
                    ));
                }
                tx_tree.insert(block_key.as_bytes(), block_bytes.as_slice())?;
                for (key, value) in &balance_entries {
                    tx_tree.insert(key.as_bytes(), value.as_slice())?;
                }
                for (key, value) in &transaction_entries {
                    tx_tree.insert(key.as_bytes(), value.as_slice())?;
                }
                Ok(())
            });
        result?;

        self.db.flush()?;
        debug!(
            "Committed block {} ({} balances, {} transactions)",
            block.get_index(),
            balances.len(),
            transactions.len()
        );
        Ok(())
    }
}
