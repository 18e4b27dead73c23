//! Fixtures for in-crate tests: temporary chains, a shared founder wallet and
//! helpers to mine and re-validate blocks.

pub mod test_utils;

pub use test_utils::*;
