//! Peer-to-peer networking
//!
//! Nodes exchange newline-delimited JSON envelopes over TCP. The sync handler
//! answers height and block requests, catches up from peers block by block,
//! processes announced blocks once in sync, and admits submitted transactions.
//! Mining runs as its own task and is steered through [`MiningState`].

pub mod message;
pub mod mining;
pub mod node;
pub mod sync;
pub mod transport;

pub use message::{Envelope, Message, SubmissionPayload, SubmissionResult};
pub use mining::{mine_round, run_miner, MiningRound, MiningState};
pub use node::{run_chain_task, submit_transaction, Node, NodeEvent};
pub use sync::{Action, SyncHandler, SYNC_REQUEST_DELAY};
pub use transport::{request, Transport};
