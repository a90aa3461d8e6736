//! Merkle Tree Builder
//!
//! Folds an ordered list of leaf hashes into one deterministic root.
//!
//! Convention (protocol version 1): pairs are combined left to right as
//! `SHA-256(left || right)`. When a level holds an odd number of nodes the
//! last node is paired with a copy of itself. An empty tree has the
//! `EMPTY_ROOT` sentinel as its root and a single leaf is its own root.

use tracing::debug;

use crate::error::EvidenceError;
use crate::hash::{Sha256Hash, EMPTY_ROOT};
use crate::merkle::proof::{MerkleProof, Position, ProofStep};

/// Fully materialized tree. Only kept in memory while extracting proofs.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// `levels[0]` holds the leaves; the last level holds the root.
    levels: Vec<Vec<Sha256Hash>>,
}

impl MerkleTree {
    pub fn build(leaves: Vec<Sha256Hash>) -> Self {
        if leaves.is_empty() {
            return Self { levels: Vec::new() };
        }

        let mut levels = vec![leaves];
        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let next: Vec<Sha256Hash> = level
                .chunks(2)
                .map(|pair| {
                    let right = pair.get(1).unwrap_or(&pair[0]);
                    Sha256Hash::combine(&pair[0], right)
                })
                .collect();
            levels.push(next);
        }

        debug!(
            "Built Merkle tree: {} leaves, {} levels",
            levels[0].len(),
            levels.len()
        );
        Self { levels }
    }

    pub fn root(&self) -> Sha256Hash {
        self.levels
            .last()
            .and_then(|top| top.first())
            .copied()
            .unwrap_or(EMPTY_ROOT)
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn leaves(&self) -> &[Sha256Hash] {
        self.levels.first().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn depth(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }

    /// Inclusion proof for the leaf at `index`: one step per level below the root.
    pub fn proof(&self, index: usize) -> Result<MerkleProof, EvidenceError> {
        let leaf_count = self.leaf_count();
        if index >= leaf_count {
            return Err(EvidenceError::malformed(format!(
                "leaf index {} out of range for {} leaves",
                index, leaf_count
            )));
        }

        let mut steps = Vec::with_capacity(self.depth());
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let step = if position % 2 == 0 {
                // Odd tail: the sibling is the node's own duplicate.
                let sibling = level.get(position + 1).unwrap_or(&level[position]);
                ProofStep {
                    sibling: *sibling,
                    position: Position::Right,
                }
            } else {
                ProofStep {
                    sibling: level[position - 1],
                    position: Position::Left,
                }
            };
            steps.push(step);
            position /= 2;
        }

        Ok(MerkleProof {
            leaf_hash: self.levels[0][index],
            steps,
            root: self.root(),
        })
    }
}

/// Root over `leaves` without keeping intermediate levels around.
pub fn merkle_root(leaves: &[Sha256Hash]) -> Sha256Hash {
    match leaves {
        [] => EMPTY_ROOT,
        [single] => *single,
        _ => MerkleTree::build(leaves.to_vec()).root(),
    }
}
