//! Hash Chain Builder
//!
//! Computes each event's payload hash and links it to its predecessor.

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::chain::canonical::{canonical_timestamp, to_canonical_bytes};
use crate::chain::event::{truncate_to_millis, EvidenceEvent, NewEvent};
use crate::hash::{Sha256Hash, GENESIS_HASH};

/// Sequence number assigned to the first event ever recorded.
pub const FIRST_SEQUENCE: i64 = 1;

/// Tip of the chain: the last accepted sequence number and its payload hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainHead {
    pub sequence_number: i64,
    pub payload_hash: Sha256Hash,
}

impl ChainHead {
    /// Head of an empty chain.
    pub fn genesis() -> Self {
        Self {
            sequence_number: FIRST_SEQUENCE - 1,
            payload_hash: GENESIS_HASH,
        }
    }

    pub fn of(event: &EvidenceEvent) -> Self {
        Self {
            sequence_number: event.sequence_number,
            payload_hash: event.payload_hash,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.sequence_number < FIRST_SEQUENCE
    }

    pub fn next_sequence(&self) -> i64 {
        self.sequence_number + 1
    }
}

/// `SHA-256` over the canonical encoding of the hashed fields.
pub fn compute_payload_hash(
    event_type: &str,
    payload: &serde_json::Value,
    occurred_at: &DateTime<Utc>,
    sequence_number: i64,
    previous_hash: &Sha256Hash,
) -> Sha256Hash {
    let document = json!({
        "eventType": event_type,
        "payload": payload,
        "occurredAt": canonical_timestamp(occurred_at),
        "sequenceNumber": sequence_number,
        "previousHash": previous_hash.to_hex(),
    });
    Sha256Hash::digest(&to_canonical_bytes(&document))
}

/// Recompute the hash of a stored event from its own fields.
pub fn recompute_payload_hash(event: &EvidenceEvent) -> Sha256Hash {
    compute_payload_hash(
        &event.event_type,
        &event.payload,
        &event.occurred_at,
        event.sequence_number,
        &event.previous_hash,
    )
}

/// Build the event that follows `head`. Pure: reserving the sequence number
/// durably is the recorder's job.
pub fn link(head: &ChainHead, input: NewEvent, recorded_at: DateTime<Utc>) -> EvidenceEvent {
    let recorded_at = truncate_to_millis(recorded_at);
    let occurred_at = truncate_to_millis(input.occurred_at.unwrap_or(recorded_at));
    let sequence_number = head.next_sequence();
    let previous_hash = head.payload_hash;

    let payload_hash = compute_payload_hash(
        &input.event_type,
        &input.payload,
        &occurred_at,
        sequence_number,
        &previous_hash,
    );

    EvidenceEvent {
        event_id: Uuid::new_v4().to_string(),
        correlation_id: input.metadata.correlation_id,
        causation_id: input.metadata.causation_id,
        sequence_number,
        occurred_at,
        recorded_at,
        event_type: input.event_type,
        severity: input.severity,
        source_system: input.metadata.source_system,
        regulatory_tags: input.regulatory_tags,
        articles: input.articles,
        payload: input.payload,
        payload_hash,
        previous_hash,
    }
}

/// Link a batch of inputs in order, starting from `head`.
pub fn link_all(
    head: ChainHead,
    inputs: impl IntoIterator<Item = NewEvent>,
    recorded_at: DateTime<Utc>,
) -> Vec<EvidenceEvent> {
    let mut head = head;
    inputs
        .into_iter()
        .map(|input| {
            let event = link(&head, input, recorded_at);
            head = ChainHead::of(&event);
            event
        })
        .collect()
}
