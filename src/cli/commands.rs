use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "ledger-chain")]
pub struct Opt {
    #[arg(
        long,
        global = true,
        help = "Chain parameters file (TOML); built-in defaults when omitted"
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long = "data-dir",
        global = true,
        help = "Directory holding the per-node databases (overrides DATA_DIR)"
    )]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "createwallet", about = "Generate a key pair and print it")]
    Createwallet,
    #[command(name = "startnode", about = "Start a chain node")]
    StartNode {
        #[arg(long, help = "Enable mining and send rewards to ADDRESS")]
        miner: Option<String>,
        #[arg(
            long,
            value_delimiter = ',',
            help = "Comma separated peer addresses to dial on start"
        )]
        peers: Vec<String>,
    },
    #[command(name = "send", about = "Sign a transfer and submit it to a node")]
    Send {
        #[arg(long = "key", help = "Sender private key (hex PKCS#8)")]
        private_key: String,
        #[arg(help = "Destination address")]
        to: String,
        #[arg(help = "Amount to send")]
        amount: u64,
        #[arg(long, help = "Fee to pay; the chain minimum when omitted")]
        fee: Option<u64>,
        #[arg(long, help = "Node to submit to (defaults to NODE_ADDRESS)")]
        node: Option<String>,
    },
    #[command(name = "getbalance", about = "Balance of an address in the local chain")]
    GetBalance {
        #[arg(help = "The wallet address")]
        address: String,
    },
    #[command(name = "printchain", about = "Print all blocks in the local chain")]
    Printchain,
    #[command(name = "getblock", about = "Print the block at an index")]
    GetBlock {
        #[arg(help = "Block index")]
        index: u64,
    },
    #[command(name = "gettransaction", about = "Print a committed transaction")]
    GetTransaction {
        #[arg(help = "Transaction hash")]
        id: String,
    },
    #[command(name = "height", about = "Print the local chain height")]
    Height,
    #[command(name = "totalsupply", about = "Print the sum of all balances")]
    TotalSupply,
}
