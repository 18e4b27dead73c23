//! The mining flag and the periodic mining task.
//!
//! [`MiningState`] is a watch channel. A round snapshots the channel version when
//! it starts and aborts as soon as the flag is written again, so a sync handler
//! that accepts a competing block simply calls [`MiningState::restart`].

use crate::core::{Block, Blockchain};
use crate::error::{BlockchainError, Result};
use crate::network::node::NodeEvent;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Clone, Debug)]
pub struct MiningState {
    flag: Arc<watch::Sender<bool>>,
}

impl MiningState {
    pub fn new(enabled: bool) -> MiningState {
        let (flag, _) = watch::channel(enabled);
        MiningState {
            flag: Arc::new(flag),
        }
    }

    /// Writes only when the value actually changes, so a repeated `set(true)`
    /// leaves a running round alone.
    pub fn set(&self, enabled: bool) {
        self.flag.send_if_modified(|current| {
            if *current == enabled {
                false
            } else {
                *current = enabled;
                true
            }
        });
    }

    pub fn is_mining(&self) -> bool {
        *self.flag.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.flag.subscribe()
    }

    /// Abandon the running round and allow a fresh one
    pub fn restart(&self) {
        self.flag.send_replace(false);
        self.flag.send_replace(true);
    }

    /// Start a round at the current flag version
    pub fn round(&self) -> MiningRound {
        MiningRound {
            receiver: self.flag.subscribe(),
        }
    }
}

/// Cancellation handle for one proof-of-work round
pub struct MiningRound {
    receiver: watch::Receiver<bool>,
}

impl MiningRound {
    /// True once the flag was written after the round began, or is off
    pub fn is_cancelled(&self) -> bool {
        self.receiver.has_changed().unwrap_or(true) || !*self.receiver.borrow()
    }
}

/// Build a candidate from the pool and run proof-of-work until found or cancelled
pub fn mine_round(
    blockchain: &Blockchain,
    miner_address: &str,
    round: &MiningRound,
) -> Result<Option<Block>> {
    let pending = blockchain.pool().peek_all();
    let candidate = blockchain.build_candidate(&pending, miner_address)?;
    debug!(
        "Mining block {} at difficulty {} with {} transactions",
        candidate.get_index(),
        candidate.get_difficulty(),
        candidate.get_transactions().len()
    );
    blockchain.mine(candidate, || round.is_cancelled())
}

/// Mining loop: wait for the flag, sleep one interval, mine one round off the
/// async workers, hand a found block to the chain task.
pub async fn run_miner(
    blockchain: Arc<Blockchain>,
    mining: MiningState,
    miner_address: String,
    interval: Duration,
    events: mpsc::Sender<NodeEvent>,
) {
    let mut enabled = mining.subscribe();
    info!("Miner started for {miner_address}, one round every {interval:?}");

    loop {
        if enabled.wait_for(|on| *on).await.is_err() {
            debug!("Mining flag dropped, miner stops");
            return;
        }
        tokio::time::sleep(interval).await;
        if !mining.is_mining() {
            continue;
        }

        let round = mining.round();
        let chain = Arc::clone(&blockchain);
        let address = miner_address.clone();
        let found = tokio::task::spawn_blocking(move || mine_round(&chain, &address, &round))
            .await
            .map_err(BlockchainError::from)
            .and_then(|result| result);

        match found {
            Ok(Some(block)) => {
                info!(
                    "Mined block {} with nonce {}",
                    block.get_index(),
                    block.get_nonce()
                );
                if events.send(NodeEvent::Mined(block)).await.is_err() {
                    warn!("Chain task is gone, miner stops");
                    return;
                }
            }
            Ok(None) => info!("Mining round abandoned"),
            Err(e) => error!("Mining round failed: {e}"),
        }
    }
}
