use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::anchor::model::{MerkleAnchor, Witness};
use crate::chain::event::EvidenceEvent;
use crate::error::EvidenceError;
use crate::hash::Sha256Hash;

pub fn to_millis(at: &DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>, EvidenceError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| EvidenceError::Serialization(format!("Stored timestamp out of range: {}", ms)))
}

fn stored_hash(column: &str, value: &str) -> Result<Sha256Hash, EvidenceError> {
    Sha256Hash::from_hex(value)
        .map_err(|e| EvidenceError::Serialization(format!("Stored {} is not a hash: {}", column, e)))
}

#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub event_id: String,
    pub sequence_number: i64,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub occurred_at: i64,
    pub recorded_at: i64,
    pub event_type: String,
    pub severity: String,
    pub source_system: Option<String>,
    pub regulatory_tags: String,
    pub articles: String,
    pub payload: String,
    pub payload_hash: String,
    pub previous_hash: String,
}

impl TryFrom<EventRow> for EvidenceEvent {
    type Error = EvidenceError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(EvidenceEvent {
            event_id: row.event_id,
            correlation_id: row.correlation_id,
            causation_id: row.causation_id,
            sequence_number: row.sequence_number,
            occurred_at: from_millis(row.occurred_at)?,
            recorded_at: from_millis(row.recorded_at)?,
            event_type: row.event_type,
            severity: row.severity.parse()?,
            source_system: row.source_system,
            regulatory_tags: serde_json::from_str(&row.regulatory_tags)?,
            articles: serde_json::from_str(&row.articles)?,
            payload: serde_json::from_str(&row.payload)?,
            payload_hash: stored_hash("payload_hash", &row.payload_hash)?,
            previous_hash: stored_hash("previous_hash", &row.previous_hash)?,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AnchorRow {
    pub anchor_id: String,
    pub period_start: i64,
    pub period_end: i64,
    pub event_count: i64,
    pub first_sequence: Option<i64>,
    pub last_sequence: Option<i64>,
    pub merkle_root: String,
    pub protocol_version: i64,
    pub created_at: i64,
}

impl AnchorRow {
    pub fn into_anchor(self, witnesses: Vec<Witness>) -> Result<MerkleAnchor, EvidenceError> {
        Ok(MerkleAnchor {
            anchor_id: self.anchor_id,
            period_start: from_millis(self.period_start)?,
            period_end: from_millis(self.period_end)?,
            event_count: self.event_count,
            first_sequence: self.first_sequence,
            last_sequence: self.last_sequence,
            merkle_root: stored_hash("merkle_root", &self.merkle_root)?,
            protocol_version: u32::try_from(self.protocol_version).map_err(|_| {
                EvidenceError::Serialization(format!(
                    "Stored protocol version out of range: {}",
                    self.protocol_version
                ))
            })?,
            witnesses,
            created_at: from_millis(self.created_at)?,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct WitnessRow {
    pub witness_id: i64,
    pub anchor_id: String,
    pub target: String,
    pub witnessed_at: i64,
    pub proof: String,
    pub provider: String,
    pub trust_tier: String,
    pub recorded_at: i64,
}

impl TryFrom<WitnessRow> for Witness {
    type Error = EvidenceError;

    fn try_from(row: WitnessRow) -> Result<Self, Self::Error> {
        Ok(Witness {
            target: row.target,
            timestamp: from_millis(row.witnessed_at)?,
            proof: row.proof,
            provider: row.provider,
            trust_tier: row.trust_tier.parse()?,
            recorded_at: from_millis(row.recorded_at)?,
        })
    }
}
