//! Merkle Inclusion Proofs
//!
//! A proof is the leaf hash plus the ordered sibling path needed to
//! recompute a root. Verification is pure and local: a non-matching proof
//! is a `false` result, never an error. Only structurally malformed wire
//! input is rejected, and that happens before any hashing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EvidenceError;
use crate::hash::Sha256Hash;

/// Side on which the sibling sits relative to the running hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Right,
}

impl Position {
    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Left => "left",
            Position::Right => "right",
        }
    }

    pub fn flipped(&self) -> Self {
        match self {
            Position::Left => Position::Right,
            Position::Right => Position::Left,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Position {
    type Err = EvidenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" | "LEFT" | "Left" => Ok(Position::Left),
            "right" | "RIGHT" | "Right" => Ok(Position::Right),
            other => Err(EvidenceError::malformed(format!(
                "unknown sibling position '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: Sha256Hash,
    pub position: Position,
}

impl ProofStep {
    pub fn apply(&self, current: &Sha256Hash) -> Sha256Hash {
        match self.position {
            Position::Left => Sha256Hash::combine(&self.sibling, current),
            Position::Right => Sha256Hash::combine(current, &self.sibling),
        }
    }
}

/// Typed proof, as produced by `MerkleTree::proof`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_hash: Sha256Hash,
    pub steps: Vec<ProofStep>,
    pub root: Sha256Hash,
}

impl MerkleProof {
    /// Verify this proof against the root it was extracted with
    pub fn verify(&self) -> bool {
        verify_proof(&self.leaf_hash, &self.steps, &self.root)
    }

    /// Verify against an externally stored root
    pub fn verify_against(&self, root: &Sha256Hash) -> bool {
        verify_proof(&self.leaf_hash, &self.steps, root)
    }

    pub fn size(&self) -> usize {
        self.steps.len()
    }

    /// Wire form with hex siblings and position names
    pub fn to_path(&self) -> ProofPath {
        ProofPath {
            siblings: self.steps.iter().map(|s| s.sibling.to_hex()).collect(),
            positions: self.steps.iter().map(|s| s.position.to_string()).collect(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Merkle proof: {} steps, leaf: {}, root: {}",
            self.steps.len(),
            self.leaf_hash,
            self.root
        )
    }
}

/// Untrusted proof input as received from auditors: parallel lists of hex
/// sibling hashes and `left`/`right` positions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofPath {
    pub siblings: Vec<String>,
    pub positions: Vec<String>,
}

impl ProofPath {
    /// Validate structure and decode. Fails with `MalformedProof` on length
    /// mismatch, bad hex or an unknown position.
    pub fn parse(&self) -> Result<Vec<ProofStep>, EvidenceError> {
        if self.siblings.len() != self.positions.len() {
            return Err(EvidenceError::malformed(format!(
                "{} sibling hashes but {} positions",
                self.siblings.len(),
                self.positions.len()
            )));
        }

        self.siblings
            .iter()
            .zip(&self.positions)
            .enumerate()
            .map(|(i, (sibling, position))| {
                let sibling = Sha256Hash::from_hex(sibling)
                    .map_err(|e| EvidenceError::malformed(format!("step {}: {}", i, e)))?;
                let position = position
                    .parse::<Position>()
                    .map_err(|e| EvidenceError::malformed(format!("step {}: {}", i, e)))?;
                Ok(ProofStep { sibling, position })
            })
            .collect()
    }
}

/// Recompute the root from `leaf` and `steps` and compare with `root`.
pub fn verify_proof(leaf: &Sha256Hash, steps: &[ProofStep], root: &Sha256Hash) -> bool {
    let computed = steps
        .iter()
        .fold(*leaf, |current, step| step.apply(&current));
    computed == *root
}

/// Verify hex-encoded input. `Ok(false)` for a well-formed proof that does
/// not match; `Err(MalformedProof)` for input that is not a proof at all.
pub fn verify_proof_path(
    leaf_hex: &str,
    path: &ProofPath,
    root_hex: &str,
) -> Result<bool, EvidenceError> {
    let leaf = Sha256Hash::from_hex(leaf_hex)
        .map_err(|e| EvidenceError::malformed(format!("leaf: {}", e)))?;
    let root = Sha256Hash::from_hex(root_hex)
        .map_err(|e| EvidenceError::malformed(format!("root: {}", e)))?;
    let steps = path.parse()?;
    Ok(verify_proof(&leaf, &steps, &root))
}
