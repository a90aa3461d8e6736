//! Chain Verification
//!
//! Sweeps the event log and locates the first event that breaks the chain.

use tracing::{error, info};

use crate::chain::builder::{recompute_payload_hash, ChainHead, FIRST_SEQUENCE};
use crate::chain::event::EvidenceEvent;
use crate::error::{EvidenceError, ViolationKind};
use crate::hash::GENESIS_HASH;

/// Incremental verifier, fed events in sequence order.
#[derive(Debug, Clone)]
pub struct ChainVerifier {
    head: ChainHead,
    verified: u64,
}

impl Default for ChainVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainVerifier {
    /// Verifier for a sweep that starts at the first event.
    pub fn new() -> Self {
        Self::resume_from(ChainHead::genesis())
    }

    /// Verifier for a sweep that starts right after `head`.
    pub fn resume_from(head: ChainHead) -> Self {
        Self { head, verified: 0 }
    }

    /// Check one event against the running head.
    pub fn push(&mut self, event: &EvidenceEvent) -> Result<(), EvidenceError> {
        let expected_sequence = self.head.next_sequence();
        if event.sequence_number != expected_sequence {
            return Err(self.report(
                event,
                ViolationKind::SequenceGap {
                    expected: expected_sequence,
                    found: event.sequence_number,
                },
            ));
        }

        let recomputed = recompute_payload_hash(event);
        if recomputed != event.payload_hash {
            return Err(self.report(
                event,
                ViolationKind::PayloadHashMismatch {
                    stored: event.payload_hash.to_hex(),
                    recomputed: recomputed.to_hex(),
                },
            ));
        }

        if event.previous_hash != self.head.payload_hash {
            let kind = if event.sequence_number == FIRST_SEQUENCE {
                ViolationKind::GenesisMismatch {
                    found: event.previous_hash.to_hex(),
                }
            } else {
                ViolationKind::BrokenLink {
                    expected: self.head.payload_hash.to_hex(),
                    found: event.previous_hash.to_hex(),
                }
            };
            return Err(self.report(event, kind));
        }

        self.head = ChainHead::of(event);
        self.verified += 1;
        Ok(())
    }

    pub fn head(&self) -> ChainHead {
        self.head
    }

    pub fn verified(&self) -> u64 {
        self.verified
    }

    fn report(&self, event: &EvidenceEvent, kind: ViolationKind) -> EvidenceError {
        error!(
            "Chain integrity violation at sequence {}: {}",
            event.sequence_number, kind
        );
        EvidenceError::violation(event.sequence_number, &event.event_id, kind)
    }
}

/// Outcome of a full sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    /// No events recorded yet. Not the same as verified.
    Empty,
    Verified { events: u64, head: ChainHead },
}

impl ChainStatus {
    pub fn summary(&self) -> String {
        match self {
            ChainStatus::Empty => "No events recorded".to_string(),
            ChainStatus::Verified { events, head } => format!(
                "Chain verified: {} events, head #{} {}",
                events, head.sequence_number, head.payload_hash
            ),
        }
    }
}

/// Verify a complete chain starting from genesis. The first violation is
/// returned as an error naming the offending event.
pub fn verify_chain(events: &[EvidenceEvent]) -> Result<ChainStatus, EvidenceError> {
    if events.is_empty() {
        return Ok(ChainStatus::Empty);
    }

    let mut verifier = ChainVerifier::new();
    for event in events {
        verifier.push(event)?;
    }

    info!("Chain verification successful: {} events", verifier.verified());
    Ok(ChainStatus::Verified {
        events: verifier.verified(),
        head: verifier.head(),
    })
}

/// A single break found by `find_violations`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainViolation {
    pub sequence_number: i64,
    pub event_id: String,
    pub kind: ViolationKind,
}

/// Every break in the chain, not only the first. Each event is checked
/// against its stored predecessor rather than a recomputed one, so one
/// tampered event reports once instead of poisoning the rest of the sweep.
pub fn find_violations(events: &[EvidenceEvent]) -> Vec<ChainViolation> {
    let mut violations = Vec::new();
    let mut previous: Option<&EvidenceEvent> = None;

    for event in events {
        let mut record = |kind| {
            violations.push(ChainViolation {
                sequence_number: event.sequence_number,
                event_id: event.event_id.clone(),
                kind,
            })
        };

        let (expected_sequence, expected_previous) = match previous {
            Some(prev) => (prev.sequence_number + 1, prev.payload_hash),
            None => (FIRST_SEQUENCE, GENESIS_HASH),
        };

        if event.sequence_number != expected_sequence {
            record(ViolationKind::SequenceGap {
                expected: expected_sequence,
                found: event.sequence_number,
            });
        }

        let recomputed = recompute_payload_hash(event);
        if recomputed != event.payload_hash {
            record(ViolationKind::PayloadHashMismatch {
                stored: event.payload_hash.to_hex(),
                recomputed: recomputed.to_hex(),
            });
        }

        if event.previous_hash != expected_previous {
            if previous.is_none() {
                record(ViolationKind::GenesisMismatch {
                    found: event.previous_hash.to_hex(),
                });
            } else {
                record(ViolationKind::BrokenLink {
                    expected: expected_previous.to_hex(),
                    found: event.previous_hash.to_hex(),
                });
            }
        }

        previous = Some(event);
    }

    violations
}
