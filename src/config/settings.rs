use crate::error::{BlockchainError, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_NODE_ADDR: &str = "127.0.0.1:2001";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_MINING_INTERVAL_SECS: u64 = 60;

const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const MINING_ADDRESS_KEY: &str = "MINING_ADDRESS";
const NODE_ID_KEY: &str = "NODE_ID";
const DATA_DIR_KEY: &str = "DATA_DIR";
const PEERS_KEY: &str = "PEERS";
const MINING_INTERVAL_KEY: &str = "MINING_INTERVAL";

/// Per-process node settings.
///
/// Built once at startup from the environment, then adjusted by CLI flags, and
/// handed by value to the node. There is no global copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSettings {
    pub node_addr: String,
    pub node_id: String,
    pub mining_addr: Option<String>,
    pub data_dir: PathBuf,
    pub peers: Vec<String>,
    pub mining_interval: Duration,
}

impl Default for NodeSettings {
    fn default() -> Self {
        let node_addr = DEFAULT_NODE_ADDR.to_string();
        Self {
            node_id: node_id_from_addr(&node_addr),
            node_addr,
            mining_addr: None,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            peers: Vec::new(),
            mining_interval: Duration::from_secs(DEFAULT_MINING_INTERVAL_SECS),
        }
    }
}

impl NodeSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = NodeSettings::default();

        if let Some(addr) = lookup(NODE_ADDRESS_KEY) {
            settings.node_id = node_id_from_addr(&addr);
            settings.node_addr = addr;
        }
        if let Some(node_id) = lookup(NODE_ID_KEY) {
            settings.node_id = node_id;
        }
        settings.mining_addr = lookup(MINING_ADDRESS_KEY).filter(|addr| !addr.is_empty());
        if let Some(dir) = lookup(DATA_DIR_KEY) {
            settings.data_dir = PathBuf::from(dir);
        }
        if let Some(peers) = lookup(PEERS_KEY) {
            settings.peers = parse_peers(&peers);
        }
        if let Some(secs) = lookup(MINING_INTERVAL_KEY) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                BlockchainError::Config(format!("{MINING_INTERVAL_KEY} must be whole seconds"))
            })?;
            settings.mining_interval = Duration::from_secs(secs.max(1));
        }
        Ok(settings)
    }

    pub fn is_miner(&self) -> bool {
        self.mining_addr.is_some()
    }

    /// Each node keeps its own sled database so several can share a machine
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(format!("node_{}", self.node_id))
    }
}

/// Extract node ID from address (e.g., "127.0.0.1:2001" -> "2001")
pub fn node_id_from_addr(addr: &str) -> String {
    match addr.rsplit(':').next() {
        Some(port) if !port.is_empty() => port.to_string(),
        _ => "default".to_string(),
    }
}

fn parse_peers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|peer| !peer.is_empty())
        .map(str::to_string)
        .collect()
}
