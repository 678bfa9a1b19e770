//! Configuration management
//!
//! Node settings come from code defaults, an optional TOML file, and finally
//! `LEDGER_*` environment variables.

pub mod settings;

pub use settings::{ChainParams, MinerConfig, NodeConfig, SyncConfig};
