pub mod anchor;
pub mod chain;
pub mod config;
pub mod database;
pub mod error;
pub mod hash;
pub mod merkle;
pub mod ots;

pub use error::EvidenceError;
pub use hash::Sha256Hash;
