//! Configuration management
//!
//! Two layers: [`ChainConfig`] holds the consensus parameters every peer must
//! agree on (loaded from TOML), [`NodeSettings`] holds per-process details such
//! as the listen address, data directory and mining address (read from the
//! environment and CLI flags).

pub mod chain;
pub mod settings;

pub use chain::{ChainConfig, PowAlgorithm};
pub use settings::NodeSettings;
