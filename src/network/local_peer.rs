use crate::core::{Block, BlockHeader, Blockchain, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::PeerClient;
use async_trait::async_trait;
use data_encoding::HEXLOWER;
use std::sync::Arc;

/// Serves another chain living in the same process
#[derive(Clone)]
pub struct LocalPeer {
    id: String,
    chain: Arc<Blockchain>,
}

impl LocalPeer {
    pub fn new(id: impl Into<String>, chain: Arc<Blockchain>) -> LocalPeer {
        LocalPeer {
            id: id.into(),
            chain,
        }
    }

    pub fn get_chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }
}

#[async_trait]
impl PeerClient for LocalPeer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn last_header(&self) -> Result<BlockHeader> {
        self.chain.last_header()
    }

    async fn headers(&self) -> Result<Vec<BlockHeader>> {
        self.chain.headers()
    }

    async fn block(&self, hash: &str) -> Result<Block> {
        self.chain.block(hash)
    }

    async fn transaction(&self, txid: &[u8]) -> Result<Transaction> {
        self.chain.pool_transaction(txid).ok_or_else(|| {
            BlockchainError::NotFound(format!("transaction {}", HEXLOWER.encode(txid)))
        })
    }
}
