//! Wallet key pairs and transaction signing
//!
//! Keys are ECDSA P-256; an address is the hex encoded public key.

#[allow(clippy::module_inception)]
pub mod wallet;

pub use wallet::{validate_address, Wallet};
