// Peer message handling. The handler never touches sockets: every call returns
// the actions the transport should carry out, in order.

use crate::core::{Block, BlockOutcome, Blockchain};
use crate::error::BlockchainError;
use crate::network::message::{Message, SubmissionPayload, SubmissionResult};
use crate::network::mining::MiningState;
use log::{debug, error, info, warn};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

/// Pause before asking a peer for its height again during catch-up
pub const SYNC_REQUEST_DELAY: Duration = Duration::from_millis(500);

const CHECKED_BLOCKS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send { to: String, message: Message },
    Broadcast(Message),
    BroadcastExcept { except: String, message: Message },
    SendAfter { to: String, message: Message, delay: Duration },
}

pub struct SyncHandler {
    blockchain: Arc<Blockchain>,
    mining: MiningState,
    node_id: String,
    synced: bool,
    checked_blocks: LruCache<String, ()>,
}

impl SyncHandler {
    pub fn new(blockchain: Arc<Blockchain>, mining: MiningState, node_id: &str) -> SyncHandler {
        let capacity = NonZeroUsize::new(CHECKED_BLOCKS_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        SyncHandler {
            blockchain,
            mining,
            node_id: node_id.to_string(),
            synced: false,
            checked_blocks: LruCache::new(capacity),
        }
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn get_node_id(&self) -> &str {
        &self.node_id
    }

    /// Sync is complete: announcements are processed and mining may run
    pub fn mark_synced(&mut self) {
        if !self.synced {
            info!("Node {} is in sync", self.node_id);
        }
        self.synced = true;
        self.mining.set(true);
    }

    pub fn has_checked(&self, hash: &str) -> bool {
        self.checked_blocks.contains(hash)
    }

    pub fn on_connected(&mut self, peer: &str) -> Vec<Action> {
        debug!("Peer {peer} connected, asking for its height");
        vec![Action::Send {
            to: peer.to_string(),
            message: Message::RequestHeight,
        }]
    }

    pub fn handle(&mut self, from: &str, message: Message) -> Vec<Action> {
        match message {
            Message::RequestHeight => self.on_request_height(from),
            Message::ReceiveHeight(height) => self.on_receive_height(from, height),
            Message::RequestBlock(index) => self.on_request_block(from, index),
            Message::ReceiveBlock(block) => self.on_receive_block(from, block),
            Message::NewBlockAnnounce { block, sender } => self.on_announce(from, block, sender),
            Message::RegisterTransaction(tx) => {
                match self.blockchain.submit_transaction(tx) {
                    Ok(true) => debug!("Pooled transaction relayed by {from}"),
                    Ok(false) => debug!("Transaction from {from} is already pending"),
                    Err(e) => warn!("Dropping transaction relayed by {from}: {e}"),
                }
                Vec::new()
            }
            Message::SubmitTransaction(payload) => self.on_submission(from, payload),
            Message::Hello { .. } | Message::SubmissionResult(_) => {
                debug!("Ignoring {} from {from}", message.kind());
                Vec::new()
            }
        }
    }

    /// A block found by the local miner
    pub fn handle_mined(&mut self, block: Block) -> Vec<Action> {
        match self.blockchain.accept_block(&block) {
            Ok(BlockOutcome::Committed { .. }) => {
                self.checked_blocks.put(block.get_hash().to_string(), ());
                let sender = self.node_id.clone();
                vec![Action::Broadcast(Message::NewBlockAnnounce { block, sender })]
            }
            Ok(BlockOutcome::AlreadyStored) => {
                info!(
                    "Mined block {} is stale, index already taken",
                    block.get_index()
                );
                Vec::new()
            }
            Err(e) => {
                error!("Locally mined block {} rejected: {e}", block.get_index());
                Vec::new()
            }
        }
    }

    fn local_height(&self) -> Option<u64> {
        match self.blockchain.height() {
            Ok(height) => Some(height),
            Err(e) => {
                error!("Cannot read local height: {e}");
                None
            }
        }
    }

    fn on_request_height(&mut self, from: &str) -> Vec<Action> {
        match self.local_height() {
            Some(height) => vec![Action::Send {
                to: from.to_string(),
                message: Message::ReceiveHeight(height),
            }],
            None => Vec::new(),
        }
    }

    fn on_receive_height(&mut self, from: &str, peer_height: u64) -> Vec<Action> {
        let Some(local) = self.local_height() else {
            return Vec::new();
        };
        if local < peer_height {
            info!("Behind {from} ({local} < {peer_height}), requesting block {}", local + 1);
            // Anything mined on the old tip would be stale
            self.mining.set(false);
            vec![Action::Send {
                to: from.to_string(),
                message: Message::RequestBlock(local + 1),
            }]
        } else {
            self.mark_synced();
            Vec::new()
        }
    }

    fn on_request_block(&mut self, from: &str, index: u64) -> Vec<Action> {
        let block = match self.blockchain.get_block(index) {
            Ok(block) => block,
            Err(e) => {
                error!("Cannot load block {index} for {from}: {e}");
                None
            }
        };
        vec![Action::Send {
            to: from.to_string(),
            message: Message::ReceiveBlock(block),
        }]
    }

    fn on_receive_block(&mut self, from: &str, block: Option<Block>) -> Vec<Action> {
        let Some(block) = block else {
            debug!("{from} had no block for our request");
            return Vec::new();
        };
        match self.blockchain.accept_block(&block) {
            Ok(outcome) => {
                if matches!(outcome, BlockOutcome::Committed { .. }) {
                    info!("Synced block {} from {from}", block.get_index());
                }
                self.checked_blocks.put(block.get_hash().to_string(), ());
                vec![Action::SendAfter {
                    to: from.to_string(),
                    message: Message::RequestHeight,
                    delay: SYNC_REQUEST_DELAY,
                }]
            }
            Err(e) => {
                warn!("Block {} from {from} rejected: {e}", block.get_index());
                Vec::new()
            }
        }
    }

    fn on_announce(&mut self, from: &str, block: Block, sender: String) -> Vec<Action> {
        if !self.synced {
            debug!("Not in sync yet, ignoring block announced by {sender}");
            return Vec::new();
        }
        if sender == self.node_id {
            return Vec::new();
        }
        let hash = block.get_hash().to_string();
        if self.checked_blocks.contains(&hash) {
            debug!("Block {hash} already checked");
            return Vec::new();
        }

        match self.blockchain.accept_block(&block) {
            Ok(BlockOutcome::Committed { .. }) => {
                self.checked_blocks.put(hash, ());
                info!(
                    "Accepted block {} mined by {sender}, restarting mining",
                    block.get_index()
                );
                self.mining.restart();
                vec![Action::BroadcastExcept {
                    except: from.to_string(),
                    message: Message::NewBlockAnnounce { block, sender },
                }]
            }
            Ok(BlockOutcome::AlreadyStored) => {
                self.checked_blocks.put(hash, ());
                debug!(
                    "Block {} from {sender} lost, index already stored",
                    block.get_index()
                );
                Vec::new()
            }
            Err(BlockchainError::ChainLinkage(reason)) if self.is_ahead_of_us(&block) => {
                info!("Announced block {} is ahead of us ({reason}), resyncing", block.get_index());
                vec![Action::Send {
                    to: from.to_string(),
                    message: Message::RequestHeight,
                }]
            }
            Err(e) => {
                warn!("Invalid block attempt by {sender}: {e}");
                if !e.is_retryable() {
                    self.checked_blocks.put(hash, ());
                }
                Vec::new()
            }
        }
    }

    fn is_ahead_of_us(&self, block: &Block) -> bool {
        self.local_height()
            .is_some_and(|height| block.get_index() > height + 1)
    }

    fn on_submission(&mut self, from: &str, payload: SubmissionPayload) -> Vec<Action> {
        let reply = |result: SubmissionResult| Action::Send {
            to: from.to_string(),
            message: Message::SubmissionResult(result),
        };

        let tx = match payload.into_transaction() {
            Ok(tx) => tx,
            Err(e) => {
                warn!("Rejected submission from {from}: {e}");
                return vec![reply(SubmissionResult::Rejected {
                    error: e.to_string(),
                })];
            }
        };
        let id = tx.get_id().to_string();

        match self.blockchain.submit_transaction(tx.clone()) {
            Ok(added) => {
                info!("Transaction {id} accepted into the pool");
                let mut actions = vec![reply(SubmissionResult::Accepted { id })];
                if added {
                    actions.push(Action::BroadcastExcept {
                        except: from.to_string(),
                        message: Message::RegisterTransaction(tx),
                    });
                }
                actions
            }
            Err(e) => {
                warn!("Rejected transaction {id}: {e}");
                vec![reply(SubmissionResult::Rejected {
                    error: e.to_string(),
                })]
            }
        }
    }
}
