// The chain state machine: genesis bootstrap, candidate building, validation,
// block application against the ledger and the atomic commit.
// Every mutation of chain state goes through accept_block, which holds the
// chain_mutation lock for exactly one block.

use crate::config::ChainConfig;
use crate::core::{Block, DifficultyAdjustment, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::{ChainStore, Ledger, MemoryPool, StagedLedger};
use crate::utils::current_timestamp;
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Result of handing a block to [`Blockchain::accept_block`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The block is now the tip; ids of applied and skipped user transactions
    Committed {
        applied: Vec<String>,
        skipped: Vec<String>,
    },
    /// A block with this index is already stored; nothing was re-applied
    AlreadyStored,
}

// What applying a block produced, before it is committed
struct AppliedBlock {
    balances: BTreeMap<String, u64>,
    records: Vec<Transaction>,
    applied: Vec<String>,
    skipped: Vec<String>,
}

pub struct Blockchain {
    store: ChainStore,
    ledger: Ledger,
    pow: ProofOfWork,
    config: ChainConfig,
    pool: Arc<MemoryPool>,
    chain_mutation: Mutex<()>,
}

impl Blockchain {
    /// Open (or create) the chain at `db_path`; block 0 is written before this returns
    pub fn open(db_path: &Path, config: ChainConfig, pool: Arc<MemoryPool>) -> Result<Blockchain> {
        config.validate()?;
        let store = ChainStore::open(db_path)?;
        let blockchain = Blockchain {
            ledger: Ledger::new(store.clone()),
            pow: ProofOfWork::new(&config)?,
            store,
            config,
            pool,
            chain_mutation: Mutex::new(()),
        };
        blockchain.bootstrap_genesis()?;
        Ok(blockchain)
    }

    pub fn genesis_block(&self) -> Result<Block> {
        Block::genesis(&self.config, |header, nonce| {
            self.pow.header_hash(header, nonce)
        })
    }

    fn bootstrap_genesis(&self) -> Result<()> {
        let genesis = self.genesis_block()?;

        if let Some(stored) = self.store.get_block(0)? {
            // A data dir written under other chain parameters cannot be reused
            if stored.get_hash() != genesis.get_hash() {
                return Err(BlockchainError::Config(format!(
                    "Stored genesis {} does not match configured genesis {}",
                    stored.get_hash(),
                    genesis.get_hash()
                )));
            }
            return Ok(());
        }

        let mut staged = self.ledger.stage();
        for allocation in genesis.get_transactions() {
            staged.credit(allocation.get_receiver(), allocation.get_amount())?;
        }
        self.store
            .commit_block(&genesis, staged.changes(), genesis.get_transactions())?;
        info!(
            "Created genesis block {} crediting {} with {}",
            genesis.get_hash(),
            self.config.genesis_address,
            self.config.genesis_amount
        );
        Ok(())
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }

    pub fn proof_of_work(&self) -> &ProofOfWork {
        &self.pow
    }

    pub fn height(&self) -> Result<u64> {
        self.store
            .height()?
            .ok_or_else(|| BlockchainError::StoreIo("Chain store holds no blocks".to_string()))
    }

    pub fn get_block(&self, index: u64) -> Result<Option<Block>> {
        self.store.get_block(index)
    }

    pub fn latest_block(&self) -> Result<Block> {
        let height = self.height()?;
        self.store.get_block(height)?.ok_or_else(|| {
            BlockchainError::StoreIo(format!("Tip block {height} is missing from the store"))
        })
    }

    /// Committed transaction by id
    pub fn get_transaction(&self, id: &str) -> Result<Option<Transaction>> {
        self.store.get_transaction(id)
    }

    pub fn get_balance(&self, address: &str) -> Result<u64> {
        self.ledger.get_balance(address)
    }

    pub fn total_supply(&self) -> Result<u64> {
        self.ledger.total_supply()
    }

    /// Blocks from genesis to the tip
    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator {
            store: self.store.clone(),
            next_index: 0,
        }
    }

    pub fn block_hashes(&self) -> Result<Vec<String>> {
        self.iterator()
            .map(|block| block.map(|b| b.get_hash().to_string()))
            .collect()
    }

    /// Difficulty the block after `tip` must carry
    pub fn next_difficulty(&self, tip: &Block) -> Result<u64> {
        let window_start =
            match DifficultyAdjustment::window_start(&self.config, tip.get_index()) {
                Some(index) => Some(self.store.get_block(index)?.ok_or_else(|| {
                    BlockchainError::StoreIo(format!("Retarget block {index} is missing"))
                })?),
                None => None,
            };
        DifficultyAdjustment::next_difficulty(&self.config, tip, window_start.as_ref())
    }

    /// Signature, fee, amount, replay and funds checks for a submitted transaction.
    /// Nothing is mutated.
    pub fn precheck_transaction(&self, tx: &Transaction) -> Result<()> {
        if tx.is_system() {
            return Err(BlockchainError::InvalidTransaction(format!(
                "{} transactions cannot be submitted",
                tx.get_sender()
            )));
        }
        if tx.get_amount() == 0 {
            return Err(BlockchainError::InvalidTransaction(
                "Amount must be positive".to_string(),
            ));
        }
        if tx.get_fee() < self.config.transaction_fee {
            return Err(BlockchainError::InvalidTransaction(format!(
                "Fee {} is below the minimum of {}",
                tx.get_fee(),
                self.config.transaction_fee
            )));
        }
        tx.verify_signature()?;
        if self.store.get_transaction(tx.get_id())?.is_some() {
            return Err(BlockchainError::InvalidTransaction(format!(
                "Transaction {} is already committed",
                tx.get_id()
            )));
        }

        let required = tx.total_debit()?;
        let available = self.ledger.get_balance(tx.get_sender())?;
        if available < required {
            return Err(BlockchainError::InsufficientFunds {
                required,
                available,
            });
        }
        Ok(())
    }

    /// Pre-check and pool a transaction; `Ok(false)` when it was already pending
    pub fn submit_transaction(&self, tx: Transaction) -> Result<bool> {
        self.precheck_transaction(&tx)?;
        Ok(self.pool.submit(tx))
    }

    /// Build an unmined block on top of the current tip.
    ///
    /// Pending transactions are taken in pool order while their signature verifies
    /// and the sender can still pay, as already reduced by the ones kept before.
    pub fn build_candidate(&self, pending: &[Transaction], miner_address: &str) -> Result<Block> {
        let tip = self.latest_block()?;
        let mut staged = self.ledger.stage();
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        let mut fees: u64 = 0;
        let mut committed = Vec::new();

        for tx in pending {
            if kept.len() >= self.config.max_block_transactions {
                break;
            }
            // Pooled after its block committed (submission raced the commit)
            if self.store.get_transaction(tx.get_id())?.is_some() {
                committed.push(tx.get_id().to_string());
                continue;
            }
            match self.check_for_block(tx, &mut staged, &seen) {
                Ok(()) => {
                    seen.insert(tx.get_id().to_string());
                    fees = fees.saturating_add(tx.get_fee());
                    kept.push(tx.clone());
                }
                Err(e) => debug!("Leaving transaction {} out of candidate: {e}", tx.get_id()),
            }
        }
        if !committed.is_empty() {
            let evicted = self.pool.remove(&committed);
            debug!("Evicted {evicted} already committed transactions from the pool");
        }
        debug!(
            "Candidate {} keeps {} of {} pending transactions (pool size {})",
            tip.get_index() + 1,
            kept.len(),
            pending.len(),
            self.pool.len()
        );

        let time = current_timestamp()?.max(tip.get_time());
        let mut transactions = Vec::with_capacity(kept.len() + 1);
        transactions.push(Transaction::new_coinbase(
            miner_address,
            self.config.mining_reward,
            fees,
            time,
        ));
        transactions.extend(kept);

        Block::new_candidate(
            &self.config.block_version,
            tip.get_hash(),
            transactions,
            tip.get_index() + 1,
            self.next_difficulty(&tip)?,
            time,
        )
    }

    /// Run proof-of-work on a candidate; `None` when `is_cancelled` fired first
    pub fn mine<F>(&self, candidate: Block, is_cancelled: F) -> Result<Option<Block>>
    where
        F: Fn() -> bool,
    {
        self.pow.run(candidate, is_cancelled)
    }

    /// Structural and consensus checks of `block` against its predecessor
    pub fn validate(&self, block: &Block, previous: Option<&Block>) -> Result<()> {
        if block.is_genesis() {
            for allocation in block.get_transactions() {
                allocation.verify_id()?;
            }
            block.verify_merkle_root()?;
            let expected = self.genesis_block()?;
            if block.get_hash() != expected.get_hash() {
                return Err(BlockchainError::HashMismatch {
                    expected: expected.get_hash().to_string(),
                    found: block.get_hash().to_string(),
                });
            }
            return Ok(());
        }

        let previous = previous.ok_or_else(|| {
            BlockchainError::ChainLinkage(format!(
                "Block {} has no predecessor",
                block.get_index()
            ))
        })?;
        if block.get_index() != previous.get_index() + 1 {
            return Err(BlockchainError::ChainLinkage(format!(
                "Expected index {}, got {}",
                previous.get_index() + 1,
                block.get_index()
            )));
        }
        if block.get_previous_block_header() != previous.get_hash() {
            return Err(BlockchainError::ChainLinkage(format!(
                "Block {} links to {}, tip is {}",
                block.get_index(),
                block.get_previous_block_header(),
                previous.get_hash()
            )));
        }
        if block.get_time() < previous.get_time() {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {} time {} is before its predecessor's {}",
                block.get_index(),
                block.get_time(),
                previous.get_time()
            )));
        }

        if let Err(e) = block.verify_merkle_root() {
            error!("Block {} failed merkle verification: {e}", block.get_index());
            return Err(e);
        }
        if let Err(e) = self.pow.validate(block) {
            if matches!(e, BlockchainError::HashMismatch { .. }) {
                error!("Block {} failed hash verification: {e}", block.get_index());
            }
            return Err(e);
        }

        let expected_difficulty = self.next_difficulty(previous)?;
        if block.get_difficulty() != expected_difficulty {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {} difficulty {} should be {expected_difficulty}",
                block.get_index(),
                block.get_difficulty()
            )));
        }

        self.validate_coinbase(block)
    }

    fn validate_coinbase(&self, block: &Block) -> Result<()> {
        let coinbase = block.coinbase().ok_or_else(|| {
            BlockchainError::InvalidBlock(format!(
                "Block {} does not start with a coinbase",
                block.get_index()
            ))
        })?;
        coinbase.verify_id()?;
        if coinbase.get_amount() != self.config.mining_reward {
            return Err(BlockchainError::InvalidBlock(format!(
                "Coinbase pays {} instead of {}",
                coinbase.get_amount(),
                self.config.mining_reward
            )));
        }
        if block.get_transactions()[1..].iter().any(Transaction::is_system) {
            return Err(BlockchainError::InvalidBlock(
                "Only the first transaction may be a system transaction".to_string(),
            ));
        }
        if block.get_tx() != &block.get_transactions()[1..] {
            return Err(BlockchainError::InvalidBlock(
                "User transaction list does not match the block body".to_string(),
            ));
        }
        Ok(())
    }

    // One user transaction against the staged ledger; mutates the overlay only on success
    fn check_for_block(
        &self,
        tx: &Transaction,
        staged: &mut StagedLedger<'_>,
        seen: &HashSet<String>,
    ) -> Result<()> {
        tx.verify_signature()?;
        if seen.contains(tx.get_id()) || self.store.get_transaction(tx.get_id())?.is_some() {
            return Err(BlockchainError::InvalidTransaction(format!(
                "Transaction {} was already applied",
                tx.get_id()
            )));
        }
        staged.transfer(
            tx.get_sender(),
            tx.get_receiver(),
            tx.get_amount(),
            tx.get_fee(),
        )
    }

    // Stage every transaction of a validated block. A failing user transaction is
    // skipped; only the supply cap rejects the whole block.
    fn apply(&self, block: &Block) -> Result<AppliedBlock> {
        let mut staged = self.ledger.stage();
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        let mut applied = Vec::new();
        let mut skipped = Vec::new();
        let mut fees: u64 = 0;

        for tx in block.get_tx() {
            match self.check_for_block(tx, &mut staged, &seen) {
                Ok(()) => {
                    seen.insert(tx.get_id().to_string());
                    fees = fees.saturating_add(tx.get_fee());
                    applied.push(tx.get_id().to_string());
                    records.push(tx.clone());
                }
                Err(e) => {
                    warn!(
                        "Skipping transaction {} in block {}: {e}",
                        tx.get_id(),
                        block.get_index()
                    );
                    skipped.push(tx.get_id().to_string());
                }
            }
        }

        let coinbase = block.coinbase().ok_or_else(|| {
            BlockchainError::InvalidBlock(format!(
                "Block {} does not start with a coinbase",
                block.get_index()
            ))
        })?;
        let reward = fees.checked_add(self.config.mining_reward).ok_or_else(|| {
            BlockchainError::InvalidBlock("Coinbase reward overflows".to_string())
        })?;
        staged.credit(coinbase.get_receiver(), reward)?;
        records.push(coinbase.clone());

        let supply = staged.projected_supply()?;
        if supply > u128::from(self.config.max_supply) {
            return Err(BlockchainError::SupplyExceeded {
                supply: u64::try_from(supply).unwrap_or(u64::MAX),
                limit: self.config.max_supply,
            });
        }

        Ok(AppliedBlock {
            balances: staged.into_changes(),
            records,
            applied,
            skipped,
        })
    }

    /// Validate, apply and commit one block under the chain-mutation lock.
    ///
    /// The first valid block at an index wins: a block whose index is already
    /// stored returns [`BlockOutcome::AlreadyStored`] and changes nothing.
    pub fn accept_block(&self, block: &Block) -> Result<BlockOutcome> {
        let _guard = self.chain_mutation.lock().map_err(|e| {
            BlockchainError::LockAcquisition(format!("Chain mutation lock poisoned: {e}"))
        })?;

        if self.store.contains_block(block.get_index())? {
            debug!("Block {} is already stored", block.get_index());
            return Ok(BlockOutcome::AlreadyStored);
        }

        let tip = self.latest_block()?;
        self.validate(block, Some(&tip))?;
        let outcome = self.apply(block)?;
        self.store
            .commit_block(block, &outcome.balances, &outcome.records)?;

        // Only after the block is durable do its transactions leave the pool
        self.pool.remove(&outcome.applied);

        info!(
            "Committed block {} ({}) with {} transactions, {} skipped",
            block.get_index(),
            block.get_hash(),
            outcome.applied.len(),
            outcome.skipped.len()
        );
        Ok(BlockOutcome::Committed {
            applied: outcome.applied,
            skipped: outcome.skipped,
        })
    }
}

/// Walks the stored chain from genesis upwards
pub struct BlockchainIterator {
    store: ChainStore,
    next_index: u64,
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.store.get_block(self.next_index) {
            Ok(Some(block)) => {
                self.next_index += 1;
                Some(Ok(block))
            }
            Ok(None) => None,
            Err(e) => {
                // Stop after reporting the error once
                self.next_index = u64::MAX;
                Some(Err(e))
            }
        }
    }
}
