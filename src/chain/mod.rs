//! Hash-chained event log
//!
//! Every recorded event commits to its predecessor's payload hash, so any
//! edit, deletion or reordering of stored events breaks verification from
//! that point on.

pub mod builder;
pub mod canonical;
pub mod event;
pub mod recorder;
pub mod verify;

pub use builder::{compute_payload_hash, link, ChainHead, FIRST_SEQUENCE};
pub use event::{EventMetadata, EvidenceEvent, NewEvent, Severity};
pub use recorder::EventRecorder;
pub use verify::{find_violations, verify_chain, ChainStatus, ChainVerifier, ChainViolation};
