// Node wiring. The transport and the miner feed NodeEvents into one channel; a
// single blocking chain task owns the SyncHandler, so chain mutations never run
// on the async workers and handler state needs no lock.

use crate::config::{ChainConfig, NodeSettings};
use crate::core::{Block, Blockchain, Transaction};
use crate::error::Result;
use crate::network::message::{Message, SubmissionPayload, SubmissionResult};
use crate::network::mining::{run_miner, MiningState};
use crate::network::sync::{Action, SyncHandler};
use crate::network::transport::{request, Transport};
use crate::storage::MemoryPool;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
pub enum NodeEvent {
    /// A node finished its hello; clients are not reported
    Connected(String),
    Message { from: String, message: Message },
    Disconnected(String),
    /// Found by the local miner
    Mined(Block),
    /// Stops the chain task
    Shutdown,
}

pub struct Node {
    settings: NodeSettings,
    blockchain: Arc<Blockchain>,
    mining: MiningState,
}

impl Node {
    /// Open this node's chain database; genesis is written on first start
    pub fn new(settings: NodeSettings, config: ChainConfig) -> Result<Node> {
        let blockchain = Blockchain::open(&settings.db_path(), config, Arc::new(MemoryPool::new()))?;
        Ok(Node {
            settings,
            blockchain: Arc::new(blockchain),
            mining: MiningState::new(false),
        })
    }

    pub fn blockchain(&self) -> &Arc<Blockchain> {
        &self.blockchain
    }

    pub fn mining(&self) -> &MiningState {
        &self.mining
    }

    /// Run until ctrl-c or until the chain task stops
    pub async fn run(self) -> Result<()> {
        let (events, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let transport = Transport::new(&self.settings.node_id, &self.settings.node_addr, events.clone());
        let listener = transport.bind().await?;
        tokio::spawn(transport.clone().serve(listener));

        let mut connected = 0;
        for peer in &self.settings.peers {
            match transport.dial(peer).await {
                Ok(()) => connected += 1,
                Err(e) => warn!("Bootstrap peer {peer} unavailable: {e}"),
            }
        }

        let mut handler = SyncHandler::new(
            Arc::clone(&self.blockchain),
            self.mining.clone(),
            &self.settings.node_id,
        );
        if connected == 0 {
            info!("No reachable peers, starting from the local chain");
            handler.mark_synced();
        }

        if let Some(address) = self.settings.mining_addr.clone() {
            tokio::spawn(run_miner(
                Arc::clone(&self.blockchain),
                self.mining.clone(),
                address,
                self.settings.mining_interval,
                events.clone(),
            ));
        }

        let runtime = Handle::current();
        let chain_transport = transport.clone();
        let mut chain_task = tokio::task::spawn_blocking(move || {
            run_chain_task(handler, chain_transport, receiver, runtime)
        });

        tokio::select! {
            joined = &mut chain_task => {
                joined?;
                info!("Chain task finished");
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutting down node {}", self.settings.node_id);
                self.mining.set(false);
                if events.send(NodeEvent::Shutdown).await.is_ok() {
                    chain_task.await?;
                }
            }
        }
        Ok(())
    }
}

/// Drain node events until shutdown or until every sender is gone
pub fn run_chain_task(
    mut handler: SyncHandler,
    transport: Transport,
    mut receiver: mpsc::Receiver<NodeEvent>,
    runtime: Handle,
) {
    while let Some(event) = receiver.blocking_recv() {
        let actions = match event {
            NodeEvent::Connected(peer) => handler.on_connected(&peer),
            NodeEvent::Message { from, message } => handler.handle(&from, message),
            NodeEvent::Disconnected(peer) => {
                debug!("Peer {peer} left");
                Vec::new()
            }
            NodeEvent::Mined(block) => handler.handle_mined(block),
            NodeEvent::Shutdown => return,
        };
        for action in actions {
            perform(&transport, &runtime, action);
        }
    }
}

/// Hand a signed transaction to a running node and wait for its verdict
pub async fn submit_transaction(node_addr: &str, tx: &Transaction) -> Result<SubmissionResult> {
    let client_id = format!("client-{}", Uuid::new_v4());
    let message = Message::SubmitTransaction(SubmissionPayload::from_transaction(tx));
    request(node_addr, &client_id, message, |reply| match reply {
        Message::SubmissionResult(result) => Some(result),
        _ => None,
    })
    .await
}

fn perform(transport: &Transport, runtime: &Handle, action: Action) {
    match action {
        Action::Send { to, message } => {
            if let Err(e) = transport.send(&to, message) {
                warn!("Cannot send to {to}: {e}");
            }
        }
        Action::Broadcast(message) => {
            let sent = transport.broadcast(&message, None);
            debug!("Broadcast {} to {sent} peers", message.kind());
        }
        Action::BroadcastExcept { except, message } => {
            let sent = transport.broadcast(&message, Some(&except));
            debug!("Relayed {} to {sent} peers", message.kind());
        }
        Action::SendAfter { to, message, delay } => {
            let transport = transport.clone();
            runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = transport.send(&to, message) {
                    warn!("Cannot send to {to}: {e}");
                }
            });
        }
    }
}
