//! Data storage and persistence
//!
//! The sled-backed chain store (blocks, balances, committed transactions), the
//! balance ledger on top of it, and the in-memory pool of pending transactions.

pub mod chain_store;
pub mod ledger;
pub mod memory_pool;

pub use chain_store::ChainStore;
pub use ledger::{Ledger, StagedLedger};
pub use memory_pool::MemoryPool;
