//! Periodic Merkle anchoring
//!
//! Each closed time window of events is committed to a single Merkle root.
//! Anchors are later strengthened by independent witnesses.

pub mod model;
pub mod scheduler;
pub mod service;
pub mod witness;

pub use model::{
    AnchorOutcome, AnchorWindow, IntegrityStatus, MerkleAnchor, TrustTier, Witness, WitnessInput,
};
pub use scheduler::{AnchorScheduler, SchedulerHandle, SchedulerState, SchedulerStatus};
pub use service::{AnchorService, BuiltAnchor};
pub use witness::WitnessRegistry;
