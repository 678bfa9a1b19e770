use crate::core::{Block, BlockHeader};
use crate::error::{BlockchainError, Result};
use crate::storage::Storage;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct Inner {
    headers: HashMap<String, BlockHeader>,
    blocks: HashMap<String, Block>,
    last_header: Option<String>,
    first_header: Option<String>,
    last_block: Option<String>,
    first_block: Option<String>,
}

/// Non-durable [`Storage`] for tests and throwaway nodes
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        MemoryStorage::default()
    }

    fn not_found(what: &str) -> BlockchainError {
        BlockchainError::NotFound(what.to_string())
    }
}

impl Storage for MemoryStorage {
    fn persist_header(&self, hash: &str, header: &BlockHeader) -> Result<()> {
        let mut inner = self.inner.write()?;
        inner.headers.insert(hash.to_string(), header.clone());
        inner.last_header = Some(hash.to_string());
        if header.is_genesis() {
            inner.first_header = Some(hash.to_string());
        }
        Ok(())
    }

    fn persist_block(&self, block: &Block) -> Result<()> {
        let mut inner = self.inner.write()?;
        let hash = block.get_hash().to_string();
        inner.blocks.insert(hash.clone(), block.clone());
        if block.is_genesis() {
            inner.first_block = Some(hash.clone());
        }
        inner.last_block = Some(hash);
        Ok(())
    }

    fn last_header(&self) -> Result<BlockHeader> {
        let hash = self.last_block_hash()?;
        self.header(&hash)
    }

    fn last_block(&self) -> Result<Block> {
        let hash = self
            .inner
            .read()?
            .last_block
            .clone()
            .ok_or_else(|| Self::not_found("last_block"))?;
        self.block(&hash)
    }

    fn genesis_header(&self) -> Result<BlockHeader> {
        let hash = self
            .inner
            .read()?
            .first_header
            .clone()
            .ok_or_else(|| Self::not_found("first_header"))?;
        self.header(&hash)
    }

    fn genesis_block(&self) -> Result<Block> {
        let hash = self
            .inner
            .read()?
            .first_block
            .clone()
            .ok_or_else(|| Self::not_found("first_block"))?;
        self.block(&hash)
    }

    fn header(&self, hash: &str) -> Result<BlockHeader> {
        self.inner
            .read()?
            .headers
            .get(hash)
            .cloned()
            .ok_or_else(|| Self::not_found(&format!("header {hash}")))
    }

    fn block(&self, hash: &str) -> Result<Block> {
        self.inner
            .read()?
            .blocks
            .get(hash)
            .cloned()
            .ok_or_else(|| Self::not_found(&format!("block {hash}")))
    }

    // Header and block-hash pointers move together at header-persist time
    fn last_block_hash(&self) -> Result<String> {
        self.inner
            .read()?
            .last_header
            .clone()
            .ok_or_else(|| Self::not_found("last_block_hash"))
    }
}
