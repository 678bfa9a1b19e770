//! Data storage and persistence
//!
//! The chain talks to durable storage through the narrow [`Storage`]
//! contract. Persisting a header is the commit point: it moves the "last
//! header" and "last block hash" pointers. Persisting a body is separate and
//! happens afterwards through the [`BlockBodyWriter`] observer.
//!
//! The UTXO set and the memory pool live here too; both are in-memory and are
//! rebuilt from stored blocks on startup.

pub mod memory_pool;
pub mod memory_store;
pub mod sled_store;
pub mod utxo_set;

pub use memory_pool::{MemoryPool, MempoolEntry};
pub use memory_store::MemoryStorage;
pub use sled_store::SledStorage;
pub use utxo_set::{UTXOSet, Utxo};

use crate::core::{Block, BlockHeader, ChainEvent, Observer};
use crate::error::Result;
use std::sync::Arc;

pub trait Storage: Send + Sync {
    /// Durably store a header. Also updates "last header", "last block hash"
    /// and, for a genesis header, "first header".
    fn persist_header(&self, hash: &str, header: &BlockHeader) -> Result<()>;

    /// Store a full block. Updates "last block" and, for genesis, "first block".
    fn persist_block(&self, block: &Block) -> Result<()>;

    fn last_header(&self) -> Result<BlockHeader>;

    fn last_block(&self) -> Result<Block>;

    fn genesis_header(&self) -> Result<BlockHeader>;

    fn genesis_block(&self) -> Result<Block>;

    fn header(&self, hash: &str) -> Result<BlockHeader>;

    fn block(&self, hash: &str) -> Result<Block>;

    fn last_block_hash(&self) -> Result<String>;
}

/// Persists block bodies once the chain has committed their headers
pub struct BlockBodyWriter {
    storage: Arc<dyn Storage>,
}

impl BlockBodyWriter {
    pub fn new(storage: Arc<dyn Storage>) -> BlockBodyWriter {
        BlockBodyWriter { storage }
    }
}

impl Observer for BlockBodyWriter {
    fn name(&self) -> &str {
        "block-body-writer"
    }

    fn on_event(&self, event: &ChainEvent) -> Result<()> {
        if let ChainEvent::BlockAdded(block) = event {
            self.storage.persist_block(block)?;
        }
        Ok(())
    }
}
