//! Core ledger functionality
//!
//! Blocks, transactions and their Merkle commitment, proof-of-work, the
//! consensus rules, the chain state machine and the block assembler.

pub mod block;
pub mod blockchain;
pub mod events;
pub mod merkle;
pub mod miner;
pub mod monetary;
pub mod proof_of_work;
pub mod transaction;
pub mod validation;

pub use block::{Block, BlockHeader, BLOCK_VERSION};
pub use blockchain::{Blockchain, ChainStatus, HeaderIterator};
pub use events::{ChainEvent, EventBus, EventKind, Observer};
pub use merkle::{MerkleProof, MerkleTree, ProofElement};
pub use miner::{MineOutcome, Miner};
pub use monetary::{
    RewardSchedule, HALVING_INTERVAL, INITIAL_BLOCK_REWARD, MAX_HALVINGS, SATOSHIS_PER_COIN,
};
pub use proof_of_work::{PowOutcome, ProofOfWork, MAX_TARGET_BITS};
pub use transaction::{outpoint_key, TXInput, TXOutput, Transaction};
pub use validation::{validate_transaction_light, ChainTip, ValidationError, Validator};
