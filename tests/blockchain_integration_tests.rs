//! Blockchain integration tests
//!
//! End-to-end behaviour of a single chain through the public API: genesis,
//! mining, transfers, rejection of tampered blocks and persistence.

use ledger_chain::core::{BlockOutcome, COINBASE_SENDER};
use ledger_chain::{
    Block, BlockchainError, Blockchain, ChainConfig, MemoryPool, MerkleTree, Transaction, Wallet,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn config_for(founder: &Wallet) -> ChainConfig {
    ChainConfig::development().with_genesis_address(&founder.address())
}

fn open(path: &Path, config: &ChainConfig) -> Blockchain {
    Blockchain::open(path, config.clone(), Arc::new(MemoryPool::new())).unwrap()
}

fn mine_next(chain: &Blockchain, miner: &str) -> Block {
    let candidate = chain
        .build_candidate(&chain.pool().peek_all(), miner)
        .unwrap();
    let block = chain.mine(candidate, || false).unwrap().unwrap();
    assert!(matches!(
        chain.accept_block(&block).unwrap(),
        BlockOutcome::Committed { .. }
    ));
    block
}

fn tamper<F>(block: &Block, edit: F) -> Block
where
    F: FnOnce(&mut serde_json::Value),
{
    let mut value = serde_json::to_value(block).unwrap();
    edit(&mut value);
    serde_json::from_value(value).unwrap()
}

#[test]
fn test_genesis_credits_receiver() {
    let founder = Wallet::new().unwrap();
    let config = config_for(&founder);
    let dir = tempdir().unwrap();
    let chain = open(dir.path(), &config);

    assert_eq!(chain.height().unwrap(), 0);
    assert_eq!(
        chain.get_balance(&founder.address()).unwrap(),
        config.genesis_amount
    );
    assert_eq!(chain.total_supply().unwrap(), config.genesis_amount);

    let genesis = chain.genesis_block().unwrap();
    assert!(genesis.is_genesis());
    assert_eq!(genesis.get_transactions().len(), 1);
    assert_eq!(genesis.get_hash(), chain.latest_block().unwrap().get_hash());
}

#[test]
fn test_mining_empty_pool_pays_reward() {
    let founder = Wallet::new().unwrap();
    let config = config_for(&founder);
    let dir = tempdir().unwrap();
    let chain = open(dir.path(), &config);
    let miner = Wallet::new().unwrap().address();

    let block = mine_next(&chain, &miner);

    assert_eq!(block.get_index(), 1);
    assert_eq!(block.get_transactions().len(), 1);
    assert_eq!(block.get_transactions()[0].get_sender(), COINBASE_SENDER);
    assert!(block.get_tx().is_empty());
    assert_eq!(chain.get_balance(&miner).unwrap(), config.mining_reward);
    assert_eq!(
        chain.total_supply().unwrap(),
        config.genesis_amount + config.mining_reward
    );

    // Committed blocks satisfy their own target
    assert!(chain.proof_of_work().validate(&block).is_ok());
}

#[test]
fn test_transfer_then_mine() {
    let founder = Wallet::new().unwrap();
    let config = config_for(&founder);
    let dir = tempdir().unwrap();
    let chain = open(dir.path(), &config);
    let receiver = Wallet::new().unwrap().address();
    let miner = Wallet::new().unwrap().address();

    let tx = founder
        .sign_transaction(&receiver, 90, config.transaction_fee)
        .unwrap();
    assert!(chain.submit_transaction(tx.clone()).unwrap());

    // Pooled transactions do not move balances yet
    assert_eq!(
        chain.get_balance(&founder.address()).unwrap(),
        config.genesis_amount
    );

    let block = mine_next(&chain, &miner);
    assert_eq!(block.get_tx(), &[tx.clone()]);
    assert_eq!(
        chain.get_balance(&founder.address()).unwrap(),
        config.genesis_amount - 90 - config.transaction_fee
    );
    assert_eq!(chain.get_balance(&receiver).unwrap(), 90);
    assert_eq!(
        chain.get_balance(&miner).unwrap(),
        config.mining_reward + config.transaction_fee
    );
    assert_eq!(chain.get_transaction(tx.get_id()).unwrap(), Some(tx.clone()));
    assert!(chain.pool().is_empty());

    // Replaying a committed transaction is refused
    assert!(chain.submit_transaction(tx).is_err());
}

#[test]
fn test_tampered_merkle_root_is_never_committed() {
    let founder = Wallet::new().unwrap();
    let config = config_for(&founder);
    let source_dir = tempdir().unwrap();
    let source = open(source_dir.path(), &config);
    let dir = tempdir().unwrap();
    let chain = open(dir.path(), &config);

    let tx = founder.sign_transaction("receiver", 90, 1).unwrap();
    source.submit_transaction(tx).unwrap();
    let block = mine_next(&source, "miner");

    let forged = tamper(&block, |value| {
        value["block_header"]["merkle_root"] = serde_json::json!("00".repeat(32));
    });
    assert!(matches!(
        chain.accept_block(&forged),
        Err(BlockchainError::MerkleMismatch { .. })
    ));
    assert_eq!(chain.height().unwrap(), 0);
    assert_eq!(chain.get_balance("receiver").unwrap(), 0);

    // The untouched block still goes through
    assert!(chain.accept_block(&block).is_ok());
    assert_eq!(chain.get_balance("receiver").unwrap(), 90);
}

#[test]
fn test_tampered_transactions_and_hash_are_rejected() {
    let founder = Wallet::new().unwrap();
    let config = config_for(&founder);
    let source_dir = tempdir().unwrap();
    let source = open(source_dir.path(), &config);
    let dir = tempdir().unwrap();
    let chain = open(dir.path(), &config);

    let block = mine_next(&source, "miner");

    // Inflating the coinbase breaks the merkle commitment
    let inflated = tamper(&block, |value| {
        value["transactions"][0]["amount"] = serde_json::json!(1_000_000);
    });
    assert!(matches!(
        chain.accept_block(&inflated),
        Err(BlockchainError::MerkleMismatch { .. })
    ));

    // A different nonce no longer reproduces the stored hash
    let renonced = tamper(&block, |value| {
        let nonce = value["nonce"].as_u64().unwrap();
        value["nonce"] = serde_json::json!(nonce + 1);
    });
    assert!(matches!(
        chain.accept_block(&renonced),
        Err(BlockchainError::HashMismatch { .. })
    ));

    assert_eq!(chain.height().unwrap(), 0);
}

// Mine a block on the tip from hand-picked transactions, so PoW and merkle hold
fn mine_raw(chain: &Blockchain, transactions: Vec<Transaction>, time: i64) -> Block {
    let tip = chain.latest_block().unwrap();
    let candidate = Block::new_candidate(
        &chain.config().block_version,
        tip.get_hash(),
        transactions,
        tip.get_index() + 1,
        chain.next_difficulty(&tip).unwrap(),
        time,
    )
    .unwrap();
    chain.mine(candidate, || false).unwrap().unwrap()
}

fn with_id(tx: &Transaction, id: &str) -> Transaction {
    let mut value = serde_json::to_value(tx).unwrap();
    value["id"] = serde_json::json!(id);
    serde_json::from_value(value).unwrap()
}

#[test]
fn test_forged_coinbase_id_stores_nothing() {
    let founder = Wallet::new().unwrap();
    let config = config_for(&founder);
    let dir = tempdir().unwrap();
    let chain = open(dir.path(), &config);
    let tip = chain.latest_block().unwrap();

    let honest = Transaction::new_coinbase("miner", config.mining_reward, 0, tip.get_time());
    let wallet_key = format!("wallet-{}", founder.address());
    for forged_id in ["block_1", wallet_key.as_str()] {
        let block = mine_raw(&chain, vec![with_id(&honest, forged_id)], tip.get_time());
        assert!(matches!(
            chain.accept_block(&block),
            Err(BlockchainError::InvalidTransaction(_))
        ));

        assert_eq!(chain.height().unwrap(), 0);
        assert_eq!(chain.latest_block().unwrap().get_hash(), tip.get_hash());
        assert_eq!(
            chain.get_balance(&founder.address()).unwrap(),
            config.genesis_amount
        );
        assert_eq!(chain.total_supply().unwrap(), config.genesis_amount);
        assert_eq!(chain.get_balance("miner").unwrap(), 0);
    }

    // The chain keeps working afterwards
    mine_next(&chain, "miner");
    assert_eq!(chain.height().unwrap(), 1);
}

#[test]
fn test_block_time_cannot_go_backwards() {
    let founder = Wallet::new().unwrap();
    let config = config_for(&founder);
    let dir = tempdir().unwrap();
    let chain = open(dir.path(), &config);
    mine_next(&chain, "miner");
    let tip = chain.latest_block().unwrap();

    for time in [tip.get_time() - 1, i64::MIN] {
        let coinbase = Transaction::new_coinbase("miner", config.mining_reward, 0, time);
        let block = mine_raw(&chain, vec![coinbase], time);
        assert!(matches!(
            chain.accept_block(&block),
            Err(BlockchainError::InvalidBlock(_))
        ));
        assert_eq!(chain.height().unwrap(), 1);
    }

    // Mining across a retarget point still works
    for _ in 0..config.target_block_interval {
        mine_next(&chain, "miner");
    }
    assert!(chain.build_candidate(&[], "miner").is_ok());
}

#[test]
fn test_extra_coinbase_is_rejected() {
    let founder = Wallet::new().unwrap();
    let config = config_for(&founder);
    let dir = tempdir().unwrap();
    let chain = open(dir.path(), &config);
    let time = chain.latest_block().unwrap().get_time();
    let coinbase = Transaction::new_coinbase("miner", config.mining_reward, 0, time);
    let bonus = Transaction::new_coinbase("miner", config.mining_reward, 1, time);

    // Second coinbase inside the committed body
    let doubled = mine_raw(&chain, vec![coinbase.clone(), bonus.clone()], time);
    assert!(matches!(
        chain.accept_block(&doubled),
        Err(BlockchainError::InvalidBlock(_))
    ));

    // Second coinbase smuggled into the user list only; PoW still holds
    let block = mine_raw(&chain, vec![coinbase], time);
    let smuggled = tamper(&block, |value| {
        value["tx"] = serde_json::json!([serde_json::to_value(&bonus).unwrap()]);
    });
    assert!(chain.proof_of_work().validate(&smuggled).is_ok());
    assert!(matches!(
        chain.accept_block(&smuggled),
        Err(BlockchainError::InvalidBlock(_))
    ));

    assert_eq!(chain.height().unwrap(), 0);
    assert_eq!(chain.get_balance("miner").unwrap(), 0);
    assert_eq!(chain.total_supply().unwrap(), config.genesis_amount);
}

#[test]
fn test_resubmitting_stored_block_is_a_no_op() {
    let founder = Wallet::new().unwrap();
    let config = config_for(&founder);
    let dir = tempdir().unwrap();
    let chain = open(dir.path(), &config);

    let block = mine_next(&chain, "miner");
    let supply = chain.total_supply().unwrap();

    assert_eq!(chain.accept_block(&block).unwrap(), BlockOutcome::AlreadyStored);
    assert_eq!(chain.height().unwrap(), 1);
    assert_eq!(chain.total_supply().unwrap(), supply);
    assert_eq!(chain.get_balance("miner").unwrap(), config.mining_reward);
}

#[test]
fn test_insufficient_funds_skips_only_offender() {
    let founder = Wallet::new().unwrap();
    let config = config_for(&founder);
    let dir = tempdir().unwrap();
    let chain = open(dir.path(), &config);
    let poor = Wallet::new().unwrap();

    // Give `poor` exactly enough for one transfer
    founder
        .sign_transaction(&poor.address(), 11, 1)
        .and_then(|tx| chain.submit_transaction(tx))
        .unwrap();
    mine_next(&chain, "miner");

    let first = poor.sign_transaction("shop", 10, 1).unwrap();
    let mut second = Transaction::from_parts(
        &poor.address(),
        "shop",
        10,
        1,
        None,
        first.get_time() + 1,
    );
    second.sign(poor.get_pkcs8()).unwrap();
    let founder_tx = founder.sign_transaction("shop", 5, 1).unwrap();

    // Each passes the pre-check on its own
    chain.submit_transaction(first.clone()).unwrap();
    chain.submit_transaction(second.clone()).unwrap();
    chain.submit_transaction(founder_tx.clone()).unwrap();

    let block = mine_next(&chain, "miner");
    let included: Vec<&str> = block.get_tx().iter().map(|tx| tx.get_id()).collect();
    assert_eq!(included, vec![first.get_id(), founder_tx.get_id()]);
    assert_eq!(chain.get_balance(&poor.address()).unwrap(), 0);
    assert_eq!(chain.get_balance("shop").unwrap(), 15);
    assert!(chain.pool().contains(second.get_id()));
}

#[test]
fn test_invalid_signature_is_never_pooled() {
    let founder = Wallet::new().unwrap();
    let config = config_for(&founder);
    let dir = tempdir().unwrap();
    let chain = open(dir.path(), &config);
    let mallory = Wallet::new().unwrap();

    // Signed by the wrong key
    let mut forged = Transaction::new(&founder.address(), &mallory.address(), 500, 1, 1);
    forged.sign(mallory.get_pkcs8()).unwrap();

    assert!(matches!(
        chain.submit_transaction(forged.clone()),
        Err(BlockchainError::InvalidSignature(_))
    ));
    assert!(chain.pool().is_empty());
    assert_eq!(chain.get_balance(&mallory.address()).unwrap(), 0);
}

#[test]
fn test_chain_survives_reopen() {
    let founder = Wallet::new().unwrap();
    let config = config_for(&founder);
    let dir = tempdir().unwrap();

    let tip = {
        let chain = open(dir.path(), &config);
        mine_next(&chain, "miner");
        mine_next(&chain, "miner").get_hash().to_string()
    };

    let chain = open(dir.path(), &config);
    assert_eq!(chain.height().unwrap(), 2);
    assert_eq!(chain.latest_block().unwrap().get_hash(), tip);
    assert_eq!(chain.get_balance("miner").unwrap(), 2 * config.mining_reward);

    let hashes = chain.block_hashes().unwrap();
    assert_eq!(hashes.len(), 3);
    assert_eq!(hashes[2], tip);
}

#[test]
fn test_reopen_with_other_genesis_fails() {
    let founder = Wallet::new().unwrap();
    let dir = tempdir().unwrap();
    drop(open(dir.path(), &config_for(&founder)));

    let stranger = Wallet::new().unwrap();
    let result = Blockchain::open(
        dir.path(),
        config_for(&stranger),
        Arc::new(MemoryPool::new()),
    );
    assert!(matches!(result, Err(BlockchainError::Config(_))));
}

#[test]
fn test_merkle_proofs_for_block_transactions() {
    let founder = Wallet::new().unwrap();
    let config = config_for(&founder);
    let dir = tempdir().unwrap();
    let chain = open(dir.path(), &config);

    for amount in 1..=4 {
        let tx = founder.sign_transaction("receiver", amount, 1).unwrap();
        chain.submit_transaction(tx).unwrap();
    }
    let block = mine_next(&chain, "miner");
    assert_eq!(block.get_transactions().len(), 5);

    let tree = MerkleTree::new(block.get_transactions()).unwrap();
    assert_eq!(tree.root_hex(), block.get_merkle_root());
    for index in 0..block.get_transactions().len() {
        let proof = block.merkle_proof(index).unwrap();
        assert!(proof.verify(block.get_merkle_root()));
    }
}

#[test]
fn test_supply_never_exceeds_cap() {
    let founder = Wallet::new().unwrap();
    let mut config = config_for(&founder);
    config.max_supply = config.genesis_amount + config.mining_reward;
    let dir = tempdir().unwrap();
    let chain = open(dir.path(), &config);

    mine_next(&chain, "miner");
    assert_eq!(chain.total_supply().unwrap(), config.max_supply);

    let candidate = chain.build_candidate(&[], "miner").unwrap();
    let block = chain.mine(candidate, || false).unwrap().unwrap();
    assert!(matches!(
        chain.accept_block(&block),
        Err(BlockchainError::SupplyExceeded { .. })
    ));
    assert_eq!(chain.height().unwrap(), 1);
    assert!(chain.total_supply().unwrap() <= config.max_supply);
}
