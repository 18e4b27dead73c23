use clap::Parser;
use ledger_chain::{
    submit_transaction, validate_address, Blockchain, ChainConfig, Command, MemoryPool,
    NodeSettings, Node, Opt, SubmissionResult, Wallet,
};
use log::{error, info, LevelFilter};
use std::process;
use std::sync::Arc;

fn main() {
    // Info by default, RUST_LOG overrides
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(opt: &Opt) -> ledger_chain::Result<ChainConfig> {
    match &opt.config {
        Some(path) => ChainConfig::load(path),
        None => Ok(ChainConfig::default()),
    }
}

fn load_settings(opt: &Opt) -> ledger_chain::Result<NodeSettings> {
    let mut settings = NodeSettings::from_env()?;
    if let Some(dir) = &opt.data_dir {
        settings.data_dir = dir.clone();
    }
    Ok(settings)
}

// Queries read this node's database directly; the node itself must not be running
fn open_local_chain(opt: &Opt) -> ledger_chain::Result<Blockchain> {
    let settings = load_settings(opt)?;
    Blockchain::open(&settings.db_path(), load_config(opt)?, Arc::new(MemoryPool::new()))
}

fn run_command(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    match &opt.command {
        Command::Createwallet => {
            let wallet = Wallet::new()?;
            println!("Address:     {}", wallet.address());
            println!("Private key: {}", wallet.private_key_hex());
        }
        Command::StartNode { miner, peers } => {
            let config = load_config(&opt)?;
            let mut settings = load_settings(&opt)?;
            if let Some(address) = miner {
                settings.mining_addr = Some(address.clone());
            }
            if !peers.is_empty() {
                settings.peers = peers.clone();
            }
            if let Some(address) = &settings.mining_addr {
                if !validate_address(address) {
                    return Err(format!("Invalid miner address: {address}").into());
                }
                info!("Mining is on. Rewards go to {address}");
            }

            let node = Node::new(settings, config)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(node.run())?;
        }
        Command::Send {
            private_key,
            to,
            amount,
            fee,
            node,
        } => {
            if !validate_address(to) {
                return Err(format!("Invalid recipient address: {to}").into());
            }
            if *amount == 0 {
                return Err("Amount must be positive".into());
            }
            let config = load_config(&opt)?;
            let node_addr = match node {
                Some(addr) => addr.clone(),
                None => load_settings(&opt)?.node_addr,
            };

            let wallet = Wallet::from_private_key_hex(private_key)?;
            let tx = wallet.sign_transaction(to, *amount, fee.unwrap_or(config.transaction_fee))?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            match runtime.block_on(submit_transaction(&node_addr, &tx))? {
                SubmissionResult::Accepted { id } => println!("Submitted transaction {id}"),
                SubmissionResult::Rejected { error } => {
                    return Err(format!("Node rejected the transaction: {error}").into())
                }
            }
        }
        Command::GetBalance { address } => {
            let blockchain = open_local_chain(&opt)?;
            let balance = blockchain.get_balance(address)?;
            println!("Balance of {address}: {balance}");
        }
        Command::Printchain => {
            let blockchain = open_local_chain(&opt)?;
            for block in blockchain.iterator() {
                print_block(&block?);
            }
        }
        Command::GetBlock { index } => {
            let blockchain = open_local_chain(&opt)?;
            match blockchain.get_block(*index)? {
                Some(block) => print_block(&block),
                None => return Err(format!("No block at index {index}").into()),
            }
        }
        Command::GetTransaction { id } => {
            let blockchain = open_local_chain(&opt)?;
            match blockchain.get_transaction(id)? {
                Some(tx) => println!("{}", serde_json::to_string_pretty(&tx)?),
                None => return Err(format!("No committed transaction {id}").into()),
            }
        }
        Command::Height => {
            println!("{}", open_local_chain(&opt)?.height()?);
        }
        Command::TotalSupply => {
            println!("{}", open_local_chain(&opt)?.total_supply()?);
        }
    }
    Ok(())
}

fn print_block(block: &ledger_chain::Block) {
    println!("Block {}", block.get_index());
    println!("  Hash:       {}", block.get_hash());
    println!("  Previous:   {}", block.get_previous_block_header());
    println!("  Merkle:     {}", block.get_merkle_root());
    println!("  Time:       {}", block.get_time());
    println!("  Difficulty: {}", block.get_difficulty());
    println!("  Nonce:      {}", block.get_nonce());
    for tx in block.get_transactions() {
        println!(
            "  - {} {} -> {} amount {} fee {}",
            tx.get_id(),
            tx.get_sender(),
            tx.get_receiver(),
            tx.get_amount(),
            tx.get_fee()
        );
    }
    println!();
}
