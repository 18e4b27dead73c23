// Transactions move value between addresses in the balance ledger.
// An address is the hex encoding of an ECDSA P-256 public key, so the sender field
// is all I need to verify a signature. Two sentinel senders mint new value:
// "coinbase" (the block reward) and "genesis" (the initial allocation).

use crate::error::{BlockchainError, Result};
use crate::utils::{
    ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, hex_decode, sha256_hex,
};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};

pub const COINBASE_SENDER: &str = "coinbase";
pub const GENESIS_SENDER: &str = "genesis";

/// A value transfer. Field order is the canonical JSON order used for Merkle leaves.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    sender: String,
    receiver: String,
    amount: u64,
    fee: u64,
    signature: Option<String>,
    time: i64,
    id: String,
}

impl Transaction {
    /// Unsigned transfer; call [`Transaction::sign`] before submitting it
    pub fn new(sender: &str, receiver: &str, amount: u64, fee: u64, time: i64) -> Transaction {
        Self::from_parts(sender, receiver, amount, fee, None, time)
    }

    /// Rebuild a transaction from its wire fields; the id is always recomputed
    pub fn from_parts(
        sender: &str,
        receiver: &str,
        amount: u64,
        fee: u64,
        signature: Option<String>,
        time: i64,
    ) -> Transaction {
        Transaction {
            id: Self::compute_hash(sender, receiver, amount, fee, time),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            amount,
            fee,
            signature,
            time,
        }
    }

    // The coinbase pays the block reward; its fee field records the fees the
    // miner collected from the other transactions in the block
    pub fn new_coinbase(miner: &str, reward: u64, collected_fees: u64, time: i64) -> Transaction {
        Self::from_parts(COINBASE_SENDER, miner, reward, collected_fees, None, time)
    }

    pub fn new_genesis(receiver: &str, amount: u64, time: i64) -> Transaction {
        Self::from_parts(GENESIS_SENDER, receiver, amount, 0, None, time)
    }

    /// sha256(sender ‖ receiver ‖ amount ‖ fee ‖ time), hex encoded
    pub fn compute_hash(sender: &str, receiver: &str, amount: u64, fee: u64, time: i64) -> String {
        let payload = format!("{sender}{receiver}{amount}{fee}{time}");
        sha256_hex(payload.as_bytes())
    }

    pub fn hash(&self) -> String {
        Self::compute_hash(
            &self.sender,
            &self.receiver,
            self.amount,
            self.fee,
            self.time,
        )
    }

    pub fn sign(&mut self, pkcs8: &[u8]) -> Result<()> {
        if self.is_system() {
            return Err(BlockchainError::InvalidTransaction(format!(
                "{} transactions are not signed",
                self.sender
            )));
        }
        let signature = ecdsa_p256_sha256_sign_digest(pkcs8, self.id.as_bytes())?;
        self.signature = Some(HEXLOWER.encode(&signature));
        Ok(())
    }

    /// The id must be the content hash; ids double as store keys.
    /// Applies to system transactions too.
    pub fn verify_id(&self) -> Result<()> {
        let expected = self.hash();
        if expected != self.id {
            return Err(BlockchainError::InvalidTransaction(format!(
                "id {} does not match content hash {expected}",
                self.id
            )));
        }
        Ok(())
    }

    /// Check the id and the signature of a user transaction
    pub fn verify_signature(&self) -> Result<()> {
        if self.is_system() {
            return Err(BlockchainError::InvalidSignature(format!(
                "{} transaction carries no signature",
                self.sender
            )));
        }

        // I never trust the id on the wire; a mismatch means the fields were edited
        self.verify_id()?;

        let signature = self
            .signature
            .as_deref()
            .ok_or_else(|| BlockchainError::InvalidSignature("signature missing".to_string()))?;
        let public_key = hex_decode(&self.sender).map_err(|_| {
            BlockchainError::InvalidSignature("sender is not a hex public key".to_string())
        })?;
        let signature = hex_decode(signature)
            .map_err(|_| BlockchainError::InvalidSignature("signature is not hex".to_string()))?;

        if ecdsa_p256_sha256_sign_verify(&public_key, &signature, self.id.as_bytes()) {
            Ok(())
        } else {
            Err(BlockchainError::InvalidSignature(format!(
                "signature does not verify for transaction {}",
                self.id
            )))
        }
    }

    /// Amount plus fee, the total a sender must be able to cover
    pub fn total_debit(&self) -> Result<u64> {
        self.amount.checked_add(self.fee).ok_or_else(|| {
            BlockchainError::InvalidTransaction("amount + fee overflows".to_string())
        })
    }

    pub fn is_coinbase(&self) -> bool {
        self.sender == COINBASE_SENDER
    }

    pub fn is_genesis(&self) -> bool {
        self.sender == GENESIS_SENDER
    }

    pub fn is_system(&self) -> bool {
        self.is_coinbase() || self.is_genesis()
    }

    pub fn get_id(&self) -> &str {
        self.id.as_str()
    }

    pub fn get_sender(&self) -> &str {
        self.sender.as_str()
    }

    pub fn get_receiver(&self) -> &str {
        self.receiver.as_str()
    }

    pub fn get_amount(&self) -> u64 {
        self.amount
    }

    pub fn get_fee(&self) -> u64 {
        self.fee
    }

    pub fn get_signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn get_time(&self) -> i64 {
        self.time
    }

    /// Canonical JSON encoding, the input of a Merkle leaf
    pub fn canonical_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| BlockchainError::Serialization(e.to_string()))
    }
}
