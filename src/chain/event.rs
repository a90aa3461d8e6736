//! Evidence Event
//!
//! Defines the immutable record stored for every regulatory-relevant
//! event, plus the producer-side input used to record one.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EvidenceError;
use crate::hash::Sha256Hash;

/// Ordered severity tier, `L1` lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    L1,
    L2,
    L3,
    L4,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::L1 => "L1",
            Severity::L2 => "L2",
            Severity::L3 => "L3",
            Severity::L4 => "L4",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = EvidenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "L1" => Ok(Severity::L1),
            "L2" => Ok(Severity::L2),
            "L3" => Ok(Severity::L3),
            "L4" => Ok(Severity::L4),
            other => Err(EvidenceError::Serialization(format!(
                "Unknown severity tier: {}",
                other
            ))),
        }
    }
}

/// Correlation data attached by the producer; not part of the hash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub source_system: Option<String>,
}

/// A single immutable evidence record, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceEvent {
    pub event_id: String,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub sequence_number: i64,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub event_type: String,
    pub severity: Severity,
    pub source_system: Option<String>,
    pub regulatory_tags: Vec<String>,
    pub articles: Vec<String>,
    pub payload: serde_json::Value,
    pub payload_hash: Sha256Hash,
    pub previous_hash: Sha256Hash,
}

impl EvidenceEvent {
    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "#{} {} [{}] {}",
            self.sequence_number, self.event_type, self.severity, self.payload_hash
        )
    }
}

/// Producer input for `record_event`.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub severity: Severity,
    pub payload: serde_json::Value,
    pub regulatory_tags: Vec<String>,
    pub articles: Vec<String>,
    pub metadata: EventMetadata,
    /// Defaults to the acceptance instant when absent.
    pub occurred_at: Option<DateTime<Utc>>,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, severity: Severity, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            severity,
            payload,
            regulatory_tags: Vec::new(),
            articles: Vec::new(),
            metadata: EventMetadata::default(),
            occurred_at: None,
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.regulatory_tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_articles(mut self, articles: &[&str]) -> Self {
        self.articles = articles.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }
}

/// Timestamps are stored and hashed at millisecond precision.
pub fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(TimeDelta::milliseconds(1)).unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::L1 < Severity::L2);
        assert!(Severity::L3 < Severity::L4);
        assert_eq!(
            [Severity::L3, Severity::L1, Severity::L4].iter().max(),
            Some(&Severity::L4)
        );
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!("L2".parse::<Severity>().unwrap(), Severity::L2);
        assert!("L5".parse::<Severity>().is_err());
    }

    #[test]
    fn test_truncate_to_millis() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let truncated = truncate_to_millis(at);
        assert_eq!(truncated.timestamp_subsec_nanos(), 123_000_000);
        assert_eq!(truncated.timestamp(), 1_700_000_000);
    }
}
