//! Utility functions and helpers
//!
//! Hashing, signatures, timestamps and the bincode layer used for everything the
//! chain store persists.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    argon2_digest, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, hex_decode, new_key_pair, public_key_from_pkcs8,
    sha256_digest, sha256_hex,
};

pub use serialization::{deserialize, serialize};
