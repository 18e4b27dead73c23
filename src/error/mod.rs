//! Error handling for the chain node
//!
//! Every failure the node can observe is mapped into [`BlockchainError`]. None of
//! them terminate a running node: validation failures drop the offending block or
//! transaction, store and lock failures are reported to the caller as retryable.

use std::fmt;

/// Result type alias for chain operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    /// Unparsable or unexpected peer payload
    MalformedMessage(String),
    /// Signature missing or not valid for the sender's public key
    InvalidSignature(String),
    /// Sender cannot cover amount + fee
    InsufficientFunds { required: u64, available: u64 },
    /// Accepting would push total supply past the configured cap
    SupplyExceeded { supply: u64, limit: u64 },
    /// Index or previous-header mismatch against the local tip
    ChainLinkage(String),
    /// Recomputed header hash disagrees with the stored one
    HashMismatch { expected: String, found: String },
    /// Recomputed merkle root disagrees with the header
    MerkleMismatch { expected: String, found: String },
    /// Structural block problems (coinbase layout, target, difficulty)
    InvalidBlock(String),
    /// Structural transaction problems (fee, amounts, sentinel misuse)
    InvalidTransaction(String),
    /// Submission payload is missing a required field
    MissingField(&'static str),
    /// Persistence layer failure
    StoreIo(String),
    /// The chain mutation lock could not be taken
    LockAcquisition(String),
    Serialization(String),
    Crypto(String),
    Config(String),
    Network(String),
    Mining(String),
    Io(String),
}

impl BlockchainError {
    /// Store and lock failures leave no partial state and may simply be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BlockchainError::StoreIo(_) | BlockchainError::LockAcquisition(_)
        )
    }

    /// Errors a submitting client caused, as opposed to node-side failures.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BlockchainError::MissingField(_)
                | BlockchainError::InvalidSignature(_)
                | BlockchainError::InsufficientFunds { .. }
                | BlockchainError::InvalidTransaction(_)
                | BlockchainError::MalformedMessage(_)
        )
    }
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::MalformedMessage(msg) => write!(f, "Malformed message: {msg}"),
            BlockchainError::InvalidSignature(msg) => write!(f, "Invalid signature: {msg}"),
            BlockchainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            BlockchainError::SupplyExceeded { supply, limit } => {
                write!(f, "Supply exceeded: {supply} would pass the cap of {limit}")
            }
            BlockchainError::ChainLinkage(msg) => write!(f, "Chain linkage error: {msg}"),
            BlockchainError::HashMismatch { expected, found } => {
                write!(f, "Hash mismatch: expected {expected}, found {found}")
            }
            BlockchainError::MerkleMismatch { expected, found } => {
                write!(f, "Merkle root mismatch: expected {expected}, found {found}")
            }
            BlockchainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            BlockchainError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {msg}"),
            BlockchainError::MissingField(field) => write!(f, "Missing field: {field}"),
            BlockchainError::StoreIo(msg) => write!(f, "Store error: {msg}"),
            BlockchainError::LockAcquisition(msg) => write!(f, "Lock acquisition failed: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            BlockchainError::Network(msg) => write!(f, "Network error: {msg}"),
            BlockchainError::Mining(msg) => write!(f, "Mining error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::StoreIo(err.to_string())
    }
}

impl From<sled::transaction::TransactionError<BlockchainError>> for BlockchainError {
    fn from(err: sled::transaction::TransactionError<BlockchainError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => {
                BlockchainError::StoreIo(e.to_string())
            }
        }
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for BlockchainError {
    fn from(err: serde_json::Error) -> Self {
        BlockchainError::MalformedMessage(err.to_string())
    }
}

impl From<toml::de::Error> for BlockchainError {
    fn from(err: toml::de::Error) -> Self {
        BlockchainError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for BlockchainError {
    fn from(err: tokio::task::JoinError) -> Self {
        BlockchainError::Mining(format!("Mining worker failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(BlockchainError::StoreIo("disk".to_string()).is_retryable());
        assert!(BlockchainError::LockAcquisition("poisoned".to_string()).is_retryable());
        assert!(!BlockchainError::ChainLinkage("index".to_string()).is_retryable());
        assert!(!BlockchainError::InsufficientFunds {
            required: 10,
            available: 1
        }
        .is_retryable());
    }

    #[test]
    fn test_client_error_classification() {
        assert!(BlockchainError::MissingField("sender").is_client_error());
        assert!(!BlockchainError::StoreIo("disk".to_string()).is_client_error());
    }

    #[test]
    fn test_display_messages() {
        let err = BlockchainError::InsufficientFunds {
            required: 91,
            available: 50,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: required 91, available 50"
        );
        assert_eq!(
            BlockchainError::MissingField("fee").to_string(),
            "Missing field: fee"
        );
    }
}
