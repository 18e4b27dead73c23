use crate::error::{BlockchainError, Result};
use crate::storage::ChainStore;
use std::collections::BTreeMap;

/// Per-address balances stored under `wallet-<address>`
#[derive(Clone)]
pub struct Ledger {
    store: ChainStore,
}

impl Ledger {
    pub fn new(store: ChainStore) -> Ledger {
        Ledger { store }
    }

    /// Unknown addresses hold 0
    pub fn get_balance(&self, address: &str) -> Result<u64> {
        Ok(self.store.get_balance(address)?.unwrap_or(0))
    }

    pub fn credit(&self, address: &str, amount: u64) -> Result<u64> {
        self.store.update_balance(address, |balance| {
            balance.checked_add(amount).ok_or_else(|| {
                BlockchainError::InvalidTransaction(format!("Balance of {address} overflows"))
            })
        })
    }

    /// Refuses to take a balance below zero
    pub fn debit(&self, address: &str, amount: u64) -> Result<u64> {
        self.store.update_balance(address, |balance| {
            balance
                .checked_sub(amount)
                .ok_or(BlockchainError::InsufficientFunds {
                    required: amount,
                    available: balance,
                })
        })
    }

    /// Sum of every balance. Always a full scan; nothing is cached.
    pub fn total_supply(&self) -> Result<u64> {
        let mut total: u64 = 0;
        for (_, balance) in self.store.balances()? {
            total = total.checked_add(balance).ok_or_else(|| {
                BlockchainError::StoreIo("Total supply overflows u64".to_string())
            })?;
        }
        Ok(total)
    }

    /// Start an overlay for applying one block
    pub fn stage(&self) -> StagedLedger<'_> {
        StagedLedger {
            ledger: self,
            overlay: BTreeMap::new(),
        }
    }
}

/// Credits and debits of a block in progress.
///
/// Reads fall through to the committed ledger until an address is touched. The
/// resulting balances are handed to `ChainStore::commit_block` together with the
/// block, or dropped when the block is rejected.
pub struct StagedLedger<'a> {
    ledger: &'a Ledger,
    overlay: BTreeMap<String, u64>,
}

impl StagedLedger<'_> {
    pub fn get_balance(&self, address: &str) -> Result<u64> {
        match self.overlay.get(address) {
            Some(balance) => Ok(*balance),
            None => self.ledger.get_balance(address),
        }
    }

    pub fn credit(&mut self, address: &str, amount: u64) -> Result<()> {
        let balance = self.get_balance(address)?;
        let next = balance.checked_add(amount).ok_or_else(|| {
            BlockchainError::InvalidTransaction(format!("Balance of {address} overflows"))
        })?;
        self.overlay.insert(address.to_string(), next);
        Ok(())
    }

    pub fn debit(&mut self, address: &str, amount: u64) -> Result<()> {
        let balance = self.get_balance(address)?;
        let next = balance
            .checked_sub(amount)
            .ok_or(BlockchainError::InsufficientFunds {
                required: amount,
                available: balance,
            })?;
        self.overlay.insert(address.to_string(), next);
        Ok(())
    }

    /// Debit `amount + fee` from the sender and credit `amount` to the receiver.
    /// Both sides are checked before either balance changes.
    pub fn transfer(&mut self, sender: &str, receiver: &str, amount: u64, fee: u64) -> Result<()> {
        let total = amount.checked_add(fee).ok_or_else(|| {
            BlockchainError::InvalidTransaction("amount + fee overflows".to_string())
        })?;
        let sender_balance = self.get_balance(sender)?;
        let sender_after = sender_balance
            .checked_sub(total)
            .ok_or(BlockchainError::InsufficientFunds {
                required: total,
                available: sender_balance,
            })?;

        let receiver_before = if receiver == sender {
            sender_after
        } else {
            self.get_balance(receiver)?
        };
        let receiver_after = receiver_before.checked_add(amount).ok_or_else(|| {
            BlockchainError::InvalidTransaction(format!("Balance of {receiver} overflows"))
        })?;

        self.overlay.insert(sender.to_string(), sender_after);
        self.overlay.insert(receiver.to_string(), receiver_after);
        Ok(())
    }

    /// Total supply if the overlay were committed now
    pub fn projected_supply(&self) -> Result<u128> {
        let committed = u128::from(self.ledger.total_supply()?);
        let mut replaced: u128 = 0;
        let mut staged: u128 = 0;
        for (address, balance) in &self.overlay {
            replaced += u128::from(self.ledger.get_balance(address)?);
            staged += u128::from(*balance);
        }
        Ok(committed + staged - replaced)
    }

    pub fn changes(&self) -> &BTreeMap<String, u64> {
        &self.overlay
    }

    pub fn into_changes(self) -> BTreeMap<String, u64> {
        self.overlay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> (tempfile::TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        (dir, Ledger::new(store))
    }

    #[test]
    fn test_unknown_address_is_zero() {
        let (_dir, ledger) = ledger();
        assert_eq!(ledger.get_balance("nobody").unwrap(), 0);
        assert_eq!(ledger.total_supply().unwrap(), 0);
    }

    #[test]
    fn test_credit_and_debit() {
        let (_dir, ledger) = ledger();
        assert_eq!(ledger.credit("alice", 100).unwrap(), 100);
        assert_eq!(ledger.debit("alice", 40).unwrap(), 60);
        assert_eq!(ledger.total_supply().unwrap(), 60);
    }

    #[test]
    fn test_debit_never_goes_negative() {
        let (_dir, ledger) = ledger();
        ledger.credit("alice", 50).unwrap();
        let err = ledger.debit("alice", 91).unwrap_err();
        assert_eq!(
            err,
            BlockchainError::InsufficientFunds {
                required: 91,
                available: 50
            }
        );
        assert_eq!(ledger.get_balance("alice").unwrap(), 50);
    }

    #[test]
    fn test_overlay_reads_through_and_stays_private() {
        let (_dir, ledger) = ledger();
        ledger.credit("alice", 100).unwrap();

        let mut staged = ledger.stage();
        staged.debit("alice", 91).unwrap();
        staged.credit("bob", 90).unwrap();
        staged.credit("miner", 51).unwrap();

        assert_eq!(staged.get_balance("alice").unwrap(), 9);
        assert!(staged.debit("alice", 10).is_err());
        assert_eq!(staged.projected_supply().unwrap(), 150);

        // Nothing reaches the store until the block commits
        assert_eq!(ledger.get_balance("alice").unwrap(), 100);
        assert_eq!(ledger.get_balance("bob").unwrap(), 0);
        assert_eq!(staged.into_changes().len(), 3);
    }

    #[test]
    fn test_transfer_is_all_or_nothing() {
        let (_dir, ledger) = ledger();
        ledger.credit("alice", 100).unwrap();

        let mut staged = ledger.stage();
        staged.transfer("alice", "bob", 90, 1).unwrap();
        assert_eq!(staged.get_balance("alice").unwrap(), 9);
        assert_eq!(staged.get_balance("bob").unwrap(), 90);

        let err = staged.transfer("alice", "bob", 9, 1).unwrap_err();
        assert!(matches!(err, BlockchainError::InsufficientFunds { .. }));
        assert_eq!(staged.get_balance("alice").unwrap(), 9);
        assert_eq!(staged.get_balance("bob").unwrap(), 90);

        // Paying yourself only costs the fee
        staged.transfer("alice", "alice", 5, 1).unwrap();
        assert_eq!(staged.get_balance("alice").unwrap(), 8);
    }
}
