use crate::core::ValidationError;
use crate::error::{BlockchainError, Result};
use crate::utils::Hasher;
use serde::{Deserialize, Serialize};

/// Merkle tree over an ordered list of transaction ids.
///
/// Leaves are the ids themselves (no leaf re-hash). A parent is the hash of
/// `left || right`, and a level with an odd number of nodes pairs its last
/// node with itself. Every level is kept so inclusion proofs can be built.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Vec<u8>>>,
    leaf_count: usize,
}

/// Merkle proof for transaction inclusion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Id of the transaction being proven
    pub transaction_hash: Vec<u8>,
    pub merkle_root: Vec<u8>,
    /// Sibling hashes from leaf level up to (not including) the root
    pub proof_path: Vec<ProofElement>,
    pub transaction_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofElement {
    pub hash: Vec<u8>,
    /// true if the sibling sits on the right
    pub is_right: bool,
}

impl MerkleTree {
    pub fn new(leaves: &[Vec<u8>], hasher: &dyn Hasher) -> Result<Self> {
        if leaves.is_empty() {
            return Err(ValidationError::EmptyBlock.into());
        }

        let mut levels = Vec::new();
        let mut current = leaves.to_vec();
        loop {
            if current.len() % 2 == 1 {
                let last = current[current.len() - 1].clone();
                current.push(last);
            }
            let next: Vec<Vec<u8>> = current
                .chunks(2)
                .map(|pair| Self::hash_pair(hasher, &pair[0], &pair[1]))
                .collect();
            levels.push(current);
            if next.len() == 1 {
                levels.push(next);
                break;
            }
            current = next;
        }

        Ok(MerkleTree {
            levels,
            leaf_count: leaves.len(),
        })
    }

    pub fn root(&self) -> &[u8] {
        // Construction always ends with a single-node level
        &self.levels[self.levels.len() - 1][0]
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn proof(&self, index: usize) -> Result<MerkleProof> {
        let leaves = &self.levels[0];
        if index >= self.leaf_count {
            return Err(BlockchainError::NotFound(format!(
                "Transaction index {index} out of bounds ({} leaves)",
                self.leaf_count
            )));
        }

        let mut proof_path = Vec::new();
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let is_right = position % 2 == 0;
            let sibling = if is_right { position + 1 } else { position - 1 };
            proof_path.push(ProofElement {
                hash: level[sibling].clone(),
                is_right,
            });
            position /= 2;
        }

        Ok(MerkleProof {
            transaction_hash: leaves[index].clone(),
            merkle_root: self.root().to_vec(),
            proof_path,
            transaction_index: index,
        })
    }

    fn hash_pair(hasher: &dyn Hasher, left: &[u8], right: &[u8]) -> Vec<u8> {
        let mut combined = Vec::with_capacity(left.len() + right.len());
        combined.extend_from_slice(left);
        combined.extend_from_slice(right);
        hasher.digest(&combined)
    }

    /// Root over `ids` without keeping the intermediate levels around
    pub fn calculate_merkle_root(ids: &[Vec<u8>], hasher: &dyn Hasher) -> Result<Vec<u8>> {
        Ok(Self::new(ids, hasher)?.root().to_vec())
    }
}

impl MerkleProof {
    pub fn verify(&self, hasher: &dyn Hasher) -> bool {
        let mut current_hash = self.transaction_hash.clone();
        for element in &self.proof_path {
            current_hash = if element.is_right {
                MerkleTree::hash_pair(hasher, &current_hash, &element.hash)
            } else {
                MerkleTree::hash_pair(hasher, &element.hash, &current_hash)
            };
        }
        current_hash == self.merkle_root
    }
}
