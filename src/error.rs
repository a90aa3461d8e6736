use std::fmt;

use thiserror::Error;

impl From<serde_json::Error> for EvidenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for EvidenceError {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreUnavailable(format!("Database error: {}", err))
    }
}

impl From<sqlx::migrate::MigrateError> for EvidenceError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::StoreUnavailable(format!("Migration error: {}", err))
    }
}

impl From<config::ConfigError> for EvidenceError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Where in the chain a verification sweep found the break.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// Stored payload hash does not match the recomputed canonical hash.
    PayloadHashMismatch { stored: String, recomputed: String },
    /// `previous_hash` does not equal the predecessor's payload hash.
    BrokenLink { expected: String, found: String },
    /// Sequence numbers are not contiguous.
    SequenceGap { expected: i64, found: i64 },
    /// First event does not reference the genesis sentinel.
    GenesisMismatch { found: String },
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayloadHashMismatch { stored, recomputed } => write!(
                f,
                "payload hash mismatch (stored {}, recomputed {})",
                stored, recomputed
            ),
            Self::BrokenLink { expected, found } => write!(
                f,
                "previous hash mismatch (expected {}, found {})",
                expected, found
            ),
            Self::SequenceGap { expected, found } => write!(
                f,
                "sequence gap (expected {}, found {})",
                expected, found
            ),
            Self::GenesisMismatch { found } => {
                write!(f, "first event does not link to genesis (found {})", found)
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error("Chain integrity violation at sequence {sequence_number} (event {event_id}): {kind}")]
    ChainIntegrityViolation {
        sequence_number: i64,
        event_id: String,
        kind: ViolationKind,
    },

    #[error("Anchor not found: {0}")]
    AnchorNotFound(String),

    #[error("Malformed proof: {0}")]
    MalformedProof(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Sequence number {0} already taken by a concurrent writer")]
    SequenceConflict(i64),

    #[error("Anchor {anchor_id} diverges from its events: stored root {stored}, recomputed {recomputed}")]
    AnchorDivergence {
        anchor_id: String,
        stored: String,
        recomputed: String,
    },

    #[error("Invalid anchor window: {0}")]
    InvalidWindow(String),

    #[error("Event {event_id} is not covered by anchor {anchor_id}")]
    EventNotInAnchor { anchor_id: String, event_id: String },

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Anchor scheduler is already running")]
    SchedulerAlreadyRunning,

    #[error("Witness provider error: {0}")]
    Witness(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EvidenceError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedProof(msg.into())
    }

    pub fn violation(sequence_number: i64, event_id: &str, kind: ViolationKind) -> Self {
        Self::ChainIntegrityViolation {
            sequence_number,
            event_id: event_id.to_string(),
            kind,
        }
    }

    /// Errors a caller can fix by changing its input, as opposed to store or integrity failures.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::AnchorNotFound(_)
                | Self::MalformedProof(_)
                | Self::InvalidWindow(_)
                | Self::EventNotInAnchor { .. }
                | Self::EventNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EvidenceError>;
