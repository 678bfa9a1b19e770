use crate::core::{MerkleTree, Transaction};
use crate::error::Result;
use crate::utils::{deserialize, serialize, Hasher};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};

pub const BLOCK_VERSION: u32 = 1;

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    version: u32,
    // Empty for the genesis block
    pre_block_hash: String,
    merkle_root: Vec<u8>,
    height: u64,
    timestamp: i64,
    // Required leading zero bits
    target: u32,
    nonce: u64,
}

impl BlockHeader {
    pub fn new(
        version: u32,
        pre_block_hash: String,
        merkle_root: Vec<u8>,
        height: u64,
        timestamp: i64,
        target: u32,
    ) -> BlockHeader {
        BlockHeader {
            version,
            pre_block_hash,
            merkle_root,
            height,
            timestamp,
            target,
            nonce: 0,
        }
    }

    /// Canonical byte representation that the block hash commits to
    pub fn assemble(&self) -> Vec<u8> {
        self.assemble_with_nonce(self.nonce)
    }

    pub fn assemble_with_nonce(&self, nonce: u64) -> Vec<u8> {
        let mut data_bytes = Vec::with_capacity(
            4 + self.pre_block_hash.len() + self.merkle_root.len() + 8 + 8 + 4 + 8,
        );
        data_bytes.extend(self.version.to_be_bytes());
        data_bytes.extend(self.pre_block_hash.as_bytes());
        data_bytes.extend(&self.merkle_root);
        data_bytes.extend(self.height.to_be_bytes());
        data_bytes.extend(self.timestamp.to_be_bytes());
        data_bytes.extend(self.target.to_be_bytes());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes
    }

    /// Lower-case hex hash of the assembled header
    pub fn hash(&self, hasher: &dyn Hasher) -> String {
        HEXLOWER.encode(&hasher.digest(&self.assemble()))
    }

    pub fn is_genesis(&self) -> bool {
        self.pre_block_hash.is_empty()
    }

    pub fn get_version(&self) -> u32 {
        self.version
    }

    pub fn get_pre_block_hash(&self) -> &str {
        self.pre_block_hash.as_str()
    }

    pub fn get_merkle_root(&self) -> &[u8] {
        &self.merkle_root
    }

    pub fn get_height(&self) -> u64 {
        self.height
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_target(&self) -> u32 {
        self.target
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    // Only the nonce and timestamp move during mining
    pub fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<BlockHeader> {
        deserialize(bytes)
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Block {
    header: BlockHeader,
    transactions: Vec<Transaction>,
    hash: String,
}

impl Block {
    /// Assemble a block around an already-solved header
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>, hasher: &dyn Hasher) -> Block {
        let hash = header.hash(hasher);
        Block {
            header,
            transactions,
            hash,
        }
    }

    /// Block as received from elsewhere, carrying a declared hash that
    /// validation must check
    pub fn from_parts(header: BlockHeader, transactions: Vec<Transaction>, hash: String) -> Block {
        Block {
            header,
            transactions,
            hash,
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> &str {
        self.header.get_pre_block_hash()
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn get_height(&self) -> u64 {
        self.header.get_height()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.header.get_timestamp()
    }

    pub fn get_merkle_root(&self) -> &[u8] {
        self.header.get_merkle_root()
    }

    pub fn is_genesis(&self) -> bool {
        self.header.is_genesis()
    }

    pub fn transaction_ids(&self) -> Vec<Vec<u8>> {
        self.transactions
            .iter()
            .map(|tx| tx.get_id().to_vec())
            .collect()
    }

    /// Recompute the Merkle root from the transaction list
    pub fn calculate_merkle_root(&self, hasher: &dyn Hasher) -> Result<Vec<u8>> {
        MerkleTree::calculate_merkle_root(&self.transaction_ids(), hasher)
    }

    pub fn verify_merkle_root(&self, hasher: &dyn Hasher) -> Result<bool> {
        Ok(self.calculate_merkle_root(hasher)? == self.header.get_merkle_root())
    }

    /// Inclusion proof for the transaction at `index`
    pub fn generate_merkle_proof(
        &self,
        index: usize,
        hasher: &dyn Hasher,
    ) -> Result<crate::core::MerkleProof> {
        MerkleTree::new(&self.transaction_ids(), hasher)?.proof(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Sha256Hasher;

    fn sample_block() -> Block {
        let coinbase = Transaction::new_coinbase(0, 50, b"miner", &Sha256Hasher).unwrap();
        let root =
            MerkleTree::calculate_merkle_root(&[coinbase.get_id().to_vec()], &Sha256Hasher)
                .unwrap();
        let header = BlockHeader::new(BLOCK_VERSION, String::new(), root, 0, 1_700_000_000, 0);
        Block::new(header, vec![coinbase], &Sha256Hasher)
    }

    #[test]
    fn test_genesis_is_identified_by_empty_previous_hash() {
        let block = sample_block();
        assert!(block.is_genesis());
        assert_eq!(block.get_height(), 0);
    }

    #[test]
    fn test_hash_tracks_nonce() {
        let block = sample_block();
        let mut header = block.get_header().clone();
        assert_eq!(header.hash(&Sha256Hasher), block.get_hash());

        header.set_nonce(1);
        assert_ne!(header.hash(&Sha256Hasher), block.get_hash());
        assert_ne!(header.assemble(), block.get_header().assemble());
    }

    #[test]
    fn test_merkle_root_verifies() {
        let block = sample_block();
        assert!(block.verify_merkle_root(&Sha256Hasher).unwrap());
        let proof = block.generate_merkle_proof(0, &Sha256Hasher).unwrap();
        assert!(proof.verify(&Sha256Hasher));
    }

    #[test]
    fn test_serialization_preserves_block() {
        let block = sample_block();
        let bytes = block.serialize().unwrap();
        assert_eq!(Block::deserialize(&bytes).unwrap(), block);
    }
}
