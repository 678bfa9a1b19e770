// Sled-backed storage: one tree for block bodies and one for headers, each
// with well-known pointer keys next to the hash-keyed entries

use crate::core::{Block, BlockHeader};
use crate::error::{BlockchainError, Result};
use crate::storage::Storage;
use log::info;
use sled::transaction::TransactionError;
use sled::{Db, Tree};
use std::path::{Path, PathBuf};

const BLOCKS_TREE: &str = "blocks";
const HEADERS_TREE: &str = "headers";

const LAST_BLOCK_KEY: &str = "last_block";
const FIRST_BLOCK_KEY: &str = "first_block";
const LAST_HEADER_KEY: &str = "last_header";
const FIRST_HEADER_KEY: &str = "first_header";
const LAST_BLOCK_HASH_KEY: &str = "last_block_hash";

#[derive(Clone)]
pub struct SledStorage {
    db: Db,
    blocks: Tree,
    headers: Tree,
    path: PathBuf,
}

impl SledStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<SledStorage> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path)
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        let blocks = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))?;
        let headers = db
            .open_tree(HEADERS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open headers tree: {e}")))?;
        info!("Opened chain database at {}", path.display());
        Ok(SledStorage {
            db,
            blocks,
            headers,
            path,
        })
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn pointer(tree: &Tree, key: &str) -> Result<String> {
        let bytes = tree
            .get(key)
            .map_err(|e| BlockchainError::Database(format!("Failed to read {key}: {e}")))?
            .ok_or_else(|| BlockchainError::NotFound(key.to_string()))?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| BlockchainError::Database(format!("Invalid {key} pointer: {e}")))
    }

    fn entry(tree: &Tree, hash: &str, what: &str) -> Result<sled::IVec> {
        tree.get(hash)
            .map_err(|e| BlockchainError::Database(format!("Failed to read {what} {hash}: {e}")))?
            .ok_or_else(|| BlockchainError::NotFound(format!("{what} {hash}")))
    }
}

impl Storage for SledStorage {
    fn persist_header(&self, hash: &str, header: &BlockHeader) -> Result<()> {
        let data = header.serialize()?;
        let genesis = header.is_genesis();
        self.headers
            .transaction(|tx_db| {
                tx_db.insert(hash, data.as_slice())?;
                tx_db.insert(LAST_HEADER_KEY, hash)?;
                tx_db.insert(LAST_BLOCK_HASH_KEY, hash)?;
                if genesis {
                    tx_db.insert(FIRST_HEADER_KEY, hash)?;
                }
                Ok(())
            })
            .map_err(|e: TransactionError| {
                BlockchainError::Database(format!("Failed to persist header {hash}: {e}"))
            })?;
        self.headers.flush()?;
        Ok(())
    }

    fn persist_block(&self, block: &Block) -> Result<()> {
        let hash = block.get_hash();
        let data = block.serialize()?;
        let genesis = block.is_genesis();
        self.blocks
            .transaction(|tx_db| {
                tx_db.insert(hash, data.as_slice())?;
                tx_db.insert(LAST_BLOCK_KEY, hash)?;
                if genesis {
                    tx_db.insert(FIRST_BLOCK_KEY, hash)?;
                }
                Ok(())
            })
            .map_err(|e: TransactionError| {
                BlockchainError::Database(format!("Failed to persist block {hash}: {e}"))
            })?;
        Ok(())
    }

    fn last_header(&self) -> Result<BlockHeader> {
        let hash = Self::pointer(&self.headers, LAST_HEADER_KEY)?;
        self.header(&hash)
    }

    fn last_block(&self) -> Result<Block> {
        let hash = Self::pointer(&self.blocks, LAST_BLOCK_KEY)?;
        self.block(&hash)
    }

    fn genesis_header(&self) -> Result<BlockHeader> {
        let hash = Self::pointer(&self.headers, FIRST_HEADER_KEY)?;
        self.header(&hash)
    }

    fn genesis_block(&self) -> Result<Block> {
        let hash = Self::pointer(&self.blocks, FIRST_BLOCK_KEY)?;
        self.block(&hash)
    }

    fn header(&self, hash: &str) -> Result<BlockHeader> {
        let bytes = Self::entry(&self.headers, hash, "header")?;
        BlockHeader::deserialize(bytes.as_ref())
    }

    fn block(&self, hash: &str) -> Result<Block> {
        let bytes = Self::entry(&self.blocks, hash, "block")?;
        Block::deserialize(bytes.as_ref())
    }

    fn last_block_hash(&self) -> Result<String> {
        Self::pointer(&self.headers, LAST_BLOCK_HASH_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Transaction, BLOCK_VERSION};
    use crate::utils::Sha256Hasher;
    use tempfile::tempdir;

    fn block(prev: &str, height: u64) -> Block {
        let coinbase = Transaction::new_coinbase(height, 50, b"m", &Sha256Hasher).unwrap();
        let header = BlockHeader::new(
            BLOCK_VERSION,
            prev.to_string(),
            coinbase.get_id().to_vec(),
            height,
            height as i64,
            0,
        );
        Block::new(header, vec![coinbase], &Sha256Hasher)
    }

    #[test]
    fn test_empty_store_reports_not_found() {
        let dir = tempdir().unwrap();
        let storage = SledStorage::open(dir.path().join("db")).unwrap();
        assert!(storage.last_header().unwrap_err().is_not_found());
        assert!(storage.last_block_hash().unwrap_err().is_not_found());
        assert!(storage.block("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_header_commit_moves_last_hash_before_body() {
        let dir = tempdir().unwrap();
        let storage = SledStorage::open(dir.path().join("db")).unwrap();
        let genesis = block("", 0);
        storage
            .persist_header(genesis.get_hash(), genesis.get_header())
            .unwrap();

        assert_eq!(storage.last_block_hash().unwrap(), genesis.get_hash());
        assert_eq!(storage.genesis_header().unwrap(), *genesis.get_header());
        assert!(storage.last_block().unwrap_err().is_not_found());

        storage.persist_block(&genesis).unwrap();
        assert_eq!(storage.last_block().unwrap(), genesis);
        assert_eq!(storage.genesis_block().unwrap(), genesis);
    }

    #[test]
    fn test_reopen_keeps_pointers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let genesis = block("", 0);
        let next = block(genesis.get_hash(), 1);
        {
            let storage = SledStorage::open(&path).unwrap();
            for b in [&genesis, &next] {
                storage.persist_header(b.get_hash(), b.get_header()).unwrap();
                storage.persist_block(b).unwrap();
            }
            storage.flush().unwrap();
        }

        let storage = SledStorage::open(&path).unwrap();
        assert_eq!(storage.last_header().unwrap(), *next.get_header());
        assert_eq!(storage.genesis_block().unwrap(), genesis);
        assert_eq!(storage.header(next.get_hash()).unwrap().get_height(), 1);
    }
}
