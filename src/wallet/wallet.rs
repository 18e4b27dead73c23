use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, hex_decode, new_key_pair, public_key_from_pkcs8};
use data_encoding::HEXLOWER;
use zeroize::{Zeroize, ZeroizeOnDrop};

// Uncompressed SEC1 point: 0x04 prefix, 32-byte x, 32-byte y
const PUBLIC_KEY_LEN: usize = 65;
const UNCOMPRESSED_POINT_TAG: u8 = 0x04;

/// An ECDSA P-256 key pair. The address is the hex encoded public key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    #[zeroize(skip)]
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        Self::from_pkcs8(new_key_pair()?)
    }

    pub fn from_pkcs8(pkcs8: Vec<u8>) -> Result<Wallet> {
        let public_key = public_key_from_pkcs8(&pkcs8)?;
        Ok(Wallet { pkcs8, public_key })
    }

    /// Restore a wallet from the hex private key printed by `createwallet`
    pub fn from_private_key_hex(private_key: &str) -> Result<Wallet> {
        let pkcs8 = hex_decode(private_key.trim())
            .map_err(|_| BlockchainError::Crypto("Private key is not valid hex".to_string()))?;
        Self::from_pkcs8(pkcs8)
    }

    pub fn address(&self) -> String {
        HEXLOWER.encode(&self.public_key)
    }

    pub fn private_key_hex(&self) -> String {
        HEXLOWER.encode(&self.pkcs8)
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_pkcs8(&self) -> &[u8] {
        self.pkcs8.as_slice()
    }

    /// Build and sign a transfer from this wallet, stamped with the current time
    pub fn sign_transaction(&self, receiver: &str, amount: u64, fee: u64) -> Result<Transaction> {
        let mut tx = Transaction::new(&self.address(), receiver, amount, fee, current_timestamp()?);
        tx.sign(&self.pkcs8)?;
        Ok(tx)
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// An address is well formed when it decodes to an uncompressed public key
pub fn validate_address(address: &str) -> bool {
    match hex_decode(address) {
        Ok(bytes) => bytes.len() == PUBLIC_KEY_LEN && bytes[0] == UNCOMPRESSED_POINT_TAG,
        Err(_) => false,
    }
}
