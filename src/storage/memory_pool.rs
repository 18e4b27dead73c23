use crate::core::Transaction;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

#[derive(Default)]
struct PoolInner {
    order: VecDeque<String>,
    entries: HashMap<String, Transaction>,
}

/// Pending transactions keyed by id, kept in insertion order
pub struct MemoryPool {
    inner: RwLock<PoolInner>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: RwLock::new(PoolInner::default()),
        }
    }

    /// Add a transaction unless one with the same id is already pending
    pub fn submit(&self, tx: Transaction) -> bool {
        match self.inner.write() {
            Ok(mut pool) => {
                if pool.entries.contains_key(tx.get_id()) {
                    return false;
                }
                let id = tx.get_id().to_string();
                pool.order.push_back(id.clone());
                pool.entries.insert(id, tx);
                true
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
                false
            }
        }
    }

    /// Contents in insertion order
    pub fn peek_all(&self) -> Vec<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool
                .order
                .iter()
                .filter_map(|id| pool.entries.get(id).cloned())
                .collect(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                Vec::new()
            }
        }
    }

    /// Drop the given ids; returns how many were present
    pub fn remove(&self, ids: &[String]) -> usize {
        match self.inner.write() {
            Ok(mut pool) => {
                let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
                let mut removed = 0;
                for id in &doomed {
                    if pool.entries.remove(*id).is_some() {
                        removed += 1;
                    }
                }
                pool.order.retain(|id| !doomed.contains(id.as_str()));
                removed
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
                0
            }
        }
    }

    pub fn get(&self, txid: &str) -> Option<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.entries.get(txid).cloned(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                None
            }
        }
    }

    pub fn contains(&self, txid: &str) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.entries.contains_key(txid),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(pool) => pool.entries.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
