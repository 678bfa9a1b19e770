//! # ledger-core
//!
//! The core of a minimal proof-of-work node: a hash-linked chain of blocks,
//! the consensus rules guarding it, the set of spendable outputs and a
//! fee-ordered pool of unconfirmed transactions.
//!
//! ## Layout
//! - `core/`: blocks, transactions, Merkle commitment, proof-of-work,
//!   validation, the chain state machine and the miner
//! - `storage/`: the storage contract with sled and in-memory backends, the
//!   UTXO set and the memory pool
//! - `network/`: the peer request contract, the sync gate, in-process peers
//!   and announcements
//! - `config/`: node settings (defaults, TOML, environment)
//! - `utils/`: hashing and signing capabilities, bincode helpers
//! - `cli/`: arguments for the `ledger-node` binary
//!
//! ## Flow
//! Blocks and transactions, whether mined locally or received from a peer,
//! pass the validators before the chain commits them. A committed block is
//! then fanned out to the UTXO set, the pool, the body writer and anything
//! else subscribed to the chain's events.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::{ChainParams, MinerConfig, NodeConfig, SyncConfig};
pub use core::{
    Block, BlockHeader, Blockchain, ChainEvent, ChainStatus, EventKind, MineOutcome, Miner,
    Observer, ProofOfWork, TXInput, TXOutput, Transaction, ValidationError,
};
pub use error::{BlockchainError, Result};
pub use network::{LocalPeer, PeerClient};
pub use storage::{MemoryPool, MemoryStorage, SledStorage, Storage, UTXOSet};
pub use utils::{
    current_timestamp, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    hash_pub_key, new_key_pair, ripemd160_digest, sha256_digest,
};
