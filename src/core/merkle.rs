use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};

/// Merkle tree over the transactions of a block
///
/// Leaves are the SHA-256 of each transaction's canonical JSON. Every layer pairs
/// adjacent hashes and hashes the concatenated bytes; a layer with an odd number
/// of hashes duplicates its last hash before pairing. A single leaf is its own root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    // levels[0] holds the leaves, the last level holds only the root
    levels: Vec<Vec<Vec<u8>>>,
}

/// Merkle proof for transaction verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Leaf hash being proven
    pub leaf_hash: Vec<u8>,
    /// Index of the transaction in the block
    pub transaction_index: usize,
    /// Sibling hashes from the leaf up to the root
    pub proof_path: Vec<ProofElement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofElement {
    /// Sibling hash
    pub hash: Vec<u8>,
    /// Direction: true if sibling is on the right, false if on the left
    pub is_right: bool,
}

impl MerkleTree {
    /// Create a new Merkle tree from a list of transactions
    pub fn new(transactions: &[Transaction]) -> Result<Self> {
        let leaves = transactions
            .iter()
            .map(Self::leaf_hash)
            .collect::<Result<Vec<_>>>()?;
        Self::from_hashes(&leaves)
    }

    /// Create a Merkle tree from leaf hashes
    pub fn from_hashes(hashes: &[Vec<u8>]) -> Result<Self> {
        if hashes.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Cannot create Merkle tree from empty transaction list".to_string(),
            ));
        }

        let mut levels = vec![hashes.to_vec()];
        while let Some(current) = levels.last() {
            if current.len() == 1 {
                break;
            }
            let next = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => Self::hash_pair(left, right),
                    [single] => Self::hash_pair(single, single),
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            levels.push(next);
        }

        Ok(MerkleTree { levels })
    }

    pub fn leaf_hash(transaction: &Transaction) -> Result<Vec<u8>> {
        Ok(sha256_digest(&transaction.canonical_json()?))
    }

    pub fn root(&self) -> &[u8] {
        // from_hashes guarantees at least one level holding exactly one hash
        self.levels
            .last()
            .and_then(|level| level.first())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn root_hex(&self) -> String {
        HEXLOWER.encode(self.root())
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Generate a Merkle proof for the transaction at the given index
    pub fn proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        let leaf_hash = self
            .levels
            .first()
            .and_then(|leaves| leaves.get(transaction_index))
            .cloned()
            .ok_or_else(|| {
                BlockchainError::InvalidBlock(format!(
                    "Transaction index {transaction_index} out of bounds (leaves: {})",
                    self.leaf_count()
                ))
            })?;

        let mut proof_path = Vec::new();
        let mut index = transaction_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let (sibling_index, is_right) = if index % 2 == 0 {
                (index + 1, true)
            } else {
                (index - 1, false)
            };
            // Odd layer: the last hash is paired with itself
            let sibling = level.get(sibling_index).unwrap_or(&level[index]).clone();
            proof_path.push(ProofElement {
                hash: sibling,
                is_right,
            });
            index /= 2;
        }

        Ok(MerkleProof {
            leaf_hash,
            transaction_index,
            proof_path,
        })
    }

    /// Compute the root of a transaction list without keeping the tree
    pub fn compute_root(transactions: &[Transaction]) -> Result<String> {
        Ok(Self::new(transactions)?.root_hex())
    }

    fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
        let mut combined = Vec::with_capacity(left.len() + right.len());
        combined.extend_from_slice(left);
        combined.extend_from_slice(right);
        sha256_digest(&combined)
    }
}

impl MerkleProof {
    /// Verify this proof against a hex encoded root
    pub fn verify(&self, merkle_root: &str) -> bool {
        let current = self
            .proof_path
            .iter()
            .fold(self.leaf_hash.clone(), |current, element| {
                if element.is_right {
                    MerkleTree::hash_pair(&current, &element.hash)
                } else {
                    MerkleTree::hash_pair(&element.hash, &current)
                }
            });
        HEXLOWER.encode(&current) == merkle_root.to_ascii_lowercase()
    }
}
