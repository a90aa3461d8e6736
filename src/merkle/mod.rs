//! Merkle trees over event payload hashes and inclusion proofs against
//! their roots.

pub mod proof;
pub mod tree;

pub use proof::{verify_proof, verify_proof_path, MerkleProof, Position, ProofPath, ProofStep};
pub use tree::{merkle_root, MerkleTree};
