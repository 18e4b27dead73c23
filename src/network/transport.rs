//! TCP transport: newline-delimited JSON envelopes, one reader and one writer
//! task per connection, and a registry of connected peers keyed by node id.

use crate::error::{BlockchainError, Result};
use crate::network::message::{Envelope, Message};
use crate::network::node::NodeEvent;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// How long a new connection may take to say hello
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

// One registered connection; the id tells replaced connections apart
struct PeerHandle {
    connection: u64,
    is_node: bool,
    writer: mpsc::UnboundedSender<Envelope>,
}

#[derive(Clone)]
pub struct Transport {
    node_id: String,
    listen_addr: String,
    peers: Arc<RwLock<HashMap<String, PeerHandle>>>,
    next_connection: Arc<AtomicU64>,
    events: mpsc::Sender<NodeEvent>,
}

impl Transport {
    pub fn new(node_id: &str, listen_addr: &str, events: mpsc::Sender<NodeEvent>) -> Transport {
        Transport {
            node_id: node_id.to_string(),
            listen_addr: listen_addr.to_string(),
            peers: Arc::new(RwLock::new(HashMap::new())),
            next_connection: Arc::new(AtomicU64::new(0)),
            events,
        }
    }

    pub fn get_node_id(&self) -> &str {
        &self.node_id
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|e| BlockchainError::Network(format!("Cannot bind {}: {e}", self.listen_addr)))?;
        info!("Node {} listening on {}", self.node_id, self.listen_addr);
        Ok(listener)
    }

    /// Accept connections until the listener fails
    pub async fn serve(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("Incoming connection from {addr}");
                    let transport = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = transport.run_connection(stream).await {
                            warn!("Connection from {addr} closed: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("Accept failed: {e}");
                    return;
                }
            }
        }
    }

    /// Connect to a configured peer; the connection then runs in the background
    pub async fn dial(&self, addr: &str) -> Result<()> {
        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| BlockchainError::Network(format!("Dialing {addr} timed out")))?
            .map_err(|e| BlockchainError::Network(format!("Cannot reach {addr}: {e}")))?;
        info!("Connected to peer at {addr}");

        let transport = self.clone();
        let addr = addr.to_string();
        tokio::spawn(async move {
            if let Err(e) = transport.run_connection(stream).await {
                warn!("Connection to {addr} closed: {e}");
            }
        });
        Ok(())
    }

    pub fn peer_ids(&self) -> Vec<String> {
        match self.peers.read() {
            Ok(peers) => peers.keys().cloned().collect(),
            Err(e) => {
                error!("Peer registry lock poisoned: {e}");
                Vec::new()
            }
        }
    }

    /// Queue a message for one peer
    pub fn send(&self, peer: &str, message: Message) -> Result<()> {
        let peers = self
            .peers
            .read()
            .map_err(|e| BlockchainError::LockAcquisition(format!("Peer registry: {e}")))?;
        let handle = peers
            .get(peer)
            .ok_or_else(|| BlockchainError::Network(format!("Peer {peer} is not connected")))?;
        handle
            .writer
            .send(Envelope::new(&self.node_id, Some(peer), message))
            .map_err(|_| BlockchainError::Network(format!("Peer {peer} writer is closed")))
    }

    /// Queue a message for every connected node except `except`; returns how
    /// many peers it went to
    pub fn broadcast(&self, message: &Message, except: Option<&str>) -> usize {
        let peers = match self.peers.read() {
            Ok(peers) => peers,
            Err(e) => {
                error!("Peer registry lock poisoned: {e}");
                return 0;
            }
        };
        let mut sent = 0;
        for (peer, handle) in peers.iter() {
            if !handle.is_node || Some(peer.as_str()) == except {
                continue;
            }
            let envelope = Envelope::new(&self.node_id, Some(peer), message.clone());
            if handle.writer.send(envelope).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    async fn run_connection(self, stream: TcpStream) -> Result<()> {
        let (read_half, write_half) = stream.into_split();
        let (writer, outbox) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(write_half, outbox));

        writer
            .send(Envelope::new(
                &self.node_id,
                None,
                Message::Hello {
                    node_id: self.node_id.clone(),
                    listen_addr: Some(self.listen_addr.clone()),
                },
            ))
            .map_err(|_| BlockchainError::Network("Writer closed before hello".to_string()))?;

        let mut reader = BufReader::new(read_half);
        let (peer, is_node) = read_hello(&mut reader).await?;
        if peer == self.node_id {
            return Err(BlockchainError::Network("Connected to ourselves".to_string()));
        }

        let connection = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.register(&peer, connection, is_node, writer)?;
        if is_node {
            self.emit(NodeEvent::Connected(peer.clone())).await;
        }

        let result = self.read_loop(&peer, &mut reader).await;
        self.unregister(&peer, connection);
        if is_node {
            self.emit(NodeEvent::Disconnected(peer)).await;
        }
        result
    }

    async fn read_loop(&self, peer: &str, reader: &mut BufReader<OwnedReadHalf>) -> Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                debug!("Peer {peer} hung up");
                return Ok(());
            }
            match Envelope::decode_line(&line) {
                Ok(envelope) => {
                    debug!("Received {} from {peer}", envelope.message.kind());
                    self.emit(NodeEvent::Message {
                        from: peer.to_string(),
                        message: envelope.message,
                    })
                    .await;
                }
                Err(e) => warn!("Dropping payload from {peer}: {e}"),
            }
        }
    }

    fn register(
        &self,
        peer: &str,
        connection: u64,
        is_node: bool,
        writer: mpsc::UnboundedSender<Envelope>,
    ) -> Result<()> {
        let mut peers = self
            .peers
            .write()
            .map_err(|e| BlockchainError::LockAcquisition(format!("Peer registry: {e}")))?;
        // A newer connection to the same peer replaces the older writer
        peers.insert(
            peer.to_string(),
            PeerHandle {
                connection,
                is_node,
                writer,
            },
        );
        info!("Registered {} {peer}", if is_node { "peer" } else { "client" });
        Ok(())
    }

    fn unregister(&self, peer: &str, connection: u64) {
        match self.peers.write() {
            Ok(mut peers) => {
                if peers.get(peer).map(|h| h.connection) == Some(connection) {
                    peers.remove(peer);
                    info!("Peer {peer} disconnected");
                }
            }
            Err(e) => error!("Peer registry lock poisoned: {e}"),
        }
    }

    async fn emit(&self, event: NodeEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Chain task is gone, dropping event");
        }
    }
}

async fn read_hello(reader: &mut BufReader<OwnedReadHalf>) -> Result<(String, bool)> {
    let mut line = String::new();
    let read = tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| BlockchainError::Network("No hello within the handshake timeout".into()))??;
    if read == 0 {
        return Err(BlockchainError::Network("Closed before hello".to_string()));
    }
    match Envelope::decode_line(&line)?.message {
        Message::Hello {
            node_id,
            listen_addr,
        } => Ok((node_id, listen_addr.is_some())),
        other => Err(BlockchainError::MalformedMessage(format!(
            "Expected hello, got {}",
            other.kind()
        ))),
    }
}

async fn write_loop(mut stream: OwnedWriteHalf, mut outbox: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = outbox.recv().await {
        let line = match envelope.encode_line() {
            Ok(line) => line,
            Err(e) => {
                error!("Cannot encode {}: {e}", envelope.message.kind());
                continue;
            }
        };
        if let Err(e) = stream.write_all(&line).await {
            warn!("Write failed: {e}");
            return;
        }
    }
    let _ = stream.shutdown().await;
}

/// One-shot client exchange: say hello without a listen address, send one
/// message and wait for the first reply accepted by `pick`.
pub async fn request<T, F>(addr: &str, client_id: &str, message: Message, pick: F) -> Result<T>
where
    F: Fn(Message) -> Option<T>,
{
    let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| BlockchainError::Network(format!("Dialing {addr} timed out")))?
        .map_err(|e| BlockchainError::Network(format!("Cannot reach {addr}: {e}")))?;
    let (read_half, mut write_half) = stream.into_split();

    let hello = Envelope::new(
        client_id,
        None,
        Message::Hello {
            node_id: client_id.to_string(),
            listen_addr: None,
        },
    );
    write_half.write_all(&hello.encode_line()?).await?;
    write_half
        .write_all(&Envelope::new(client_id, None, message).encode_line()?)
        .await?;

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Err(BlockchainError::Network(format!("{addr} closed without a reply")));
            }
            // Hellos and sync traffic are skipped
            if let Ok(envelope) = Envelope::decode_line(&line) {
                if let Some(reply) = pick(envelope.message) {
                    return Ok(reply);
                }
            }
        }
    })
    .await
    .map_err(|_| BlockchainError::Network(format!("No reply from {addr}")))?
}
