//! Anchor and Witness Types

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EvidenceError;
use crate::hash::Sha256Hash;

/// Half-open time window `[start, end)` committed to by one anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AnchorWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, EvidenceError> {
        if start >= end {
            return Err(EvidenceError::InvalidWindow(format!(
                "period start {} is not before period end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Window of length `period` containing `instant`, aligned to the Unix
    /// epoch in UTC. A 24h period yields UTC calendar days.
    pub fn containing(instant: DateTime<Utc>, period: Duration) -> Result<Self, EvidenceError> {
        let period_ms = period.num_milliseconds();
        if period_ms <= 0 {
            return Err(EvidenceError::InvalidWindow(format!(
                "anchor period must be positive, got {}",
                period
            )));
        }
        let start_ms = instant.timestamp_millis().div_euclid(period_ms) * period_ms;
        let start = Utc
            .timestamp_millis_opt(start_ms)
            .single()
            .ok_or_else(|| EvidenceError::InvalidWindow(format!("instant {} out of range", instant)))?;
        Self::new(start, start + period)
    }

    /// Window immediately before this one.
    pub fn previous(&self) -> Self {
        let length = self.length();
        Self {
            start: self.start - length,
            end: self.start,
        }
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        self.start <= *instant && *instant < self.end
    }

    /// A window is closed once nothing can still occur inside it.
    pub fn is_closed_at(&self, now: &DateTime<Utc>) -> bool {
        self.end <= *now
    }
}

impl fmt::Display for AnchorWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Relative strength of an attestation, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    LocalTimestamp,
    TimestampAuthority,
    DistributedLedger,
}

impl TrustTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustTier::LocalTimestamp => "local_timestamp",
            TrustTier::TimestampAuthority => "timestamp_authority",
            TrustTier::DistributedLedger => "distributed_ledger",
        }
    }

    /// Default tier for a provider that did not state one. An OpenTimestamps
    /// calendar receipt stays pending until upgraded and ranks as an authority.
    pub fn for_provider(provider: &str) -> Self {
        match provider.to_ascii_lowercase().as_str() {
            "bitcoin" | "ethereum" => TrustTier::DistributedLedger,
            "opentimestamps" | "rfc3161" | "tsa" => TrustTier::TimestampAuthority,
            _ => TrustTier::LocalTimestamp,
        }
    }
}

impl fmt::Display for TrustTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustTier {
    type Err = EvidenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_timestamp" => Ok(TrustTier::LocalTimestamp),
            "timestamp_authority" => Ok(TrustTier::TimestampAuthority),
            "distributed_ledger" => Ok(TrustTier::DistributedLedger),
            other => Err(EvidenceError::Serialization(format!(
                "Unknown trust tier: {}",
                other
            ))),
        }
    }
}

/// Third-party attestation binding an anchor root to an external record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub proof: String,
    pub provider: String,
    pub trust_tier: TrustTier,
    pub recorded_at: DateTime<Utc>,
}

impl Witness {
    pub fn from_input(input: WitnessInput, recorded_at: DateTime<Utc>) -> Self {
        let trust_tier = input.resolved_tier();
        Self {
            target: input.target,
            timestamp: input.timestamp,
            proof: input.proof,
            provider: input.provider,
            trust_tier,
            recorded_at,
        }
    }
}

/// What an integration submits to `add_witness`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessInput {
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub proof: String,
    pub provider: String,
    #[serde(default)]
    pub trust_tier: Option<TrustTier>,
}

impl WitnessInput {
    pub fn resolved_tier(&self) -> TrustTier {
        self.trust_tier
            .unwrap_or_else(|| TrustTier::for_provider(&self.provider))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleAnchor {
    pub anchor_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub event_count: i64,
    /// Sequence range covered; `None` for an empty window.
    pub first_sequence: Option<i64>,
    pub last_sequence: Option<i64>,
    pub merkle_root: Sha256Hash,
    pub protocol_version: u32,
    pub witnesses: Vec<Witness>,
    pub created_at: DateTime<Utc>,
}

impl MerkleAnchor {
    pub fn window(&self) -> AnchorWindow {
        AnchorWindow {
            start: self.period_start,
            end: self.period_end,
        }
    }

    pub fn integrity_status(&self) -> IntegrityStatus {
        IntegrityStatus::from_witnesses(&self.witnesses)
    }

    pub fn summary(&self) -> String {
        format!(
            "Anchor {} {}: {} events, root: {}",
            self.anchor_id,
            self.window(),
            self.event_count,
            self.merkle_root
        )
    }
}

/// Result of `create_anchor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorOutcome {
    pub anchor_id: String,
    pub merkle_root: Sha256Hash,
    pub event_count: i64,
    /// `false` when the window was already anchored with the same root.
    pub created: bool,
}

/// Demonstrated integrity strength of an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IntegrityStatus {
    /// No attestation has arrived yet.
    NoWitnesses,
    Witnessed {
        strongest: TrustTier,
        witness_count: usize,
    },
}

impl IntegrityStatus {
    /// Strength is the maximum tier present.
    pub fn from_witnesses(witnesses: &[Witness]) -> Self {
        match witnesses.iter().map(|w| w.trust_tier).max() {
            None => IntegrityStatus::NoWitnesses,
            Some(strongest) => IntegrityStatus::Witnessed {
                strongest,
                witness_count: witnesses.len(),
            },
        }
    }

    pub fn strongest(&self) -> Option<TrustTier> {
        match self {
            IntegrityStatus::NoWitnesses => None,
            IntegrityStatus::Witnessed { strongest, .. } => Some(*strongest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn witness(tier: TrustTier) -> Witness {
        Witness {
            target: "target".to_string(),
            timestamp: Utc::now(),
            proof: "proof".to_string(),
            provider: "test".to_string(),
            trust_tier: tier,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_window_containing_aligns_to_utc_day() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 31, 1, 30, 0).unwrap();
        let window = AnchorWindow::containing(instant, Duration::hours(24)).unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
        assert!(window.contains(&instant));
        assert!(!window.contains(&window.end));
    }

    #[test]
    fn test_window_previous() {
        let window = AnchorWindow::containing(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Duration::hours(24),
        )
        .unwrap();
        let prev = window.previous();
        assert_eq!(prev.end, window.start);
        assert_eq!(prev.start, Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_window_rejects_inverted_range() {
        let t = Utc::now();
        assert!(matches!(
            AnchorWindow::new(t, t),
            Err(EvidenceError::InvalidWindow(_))
        ));
        assert!(AnchorWindow::containing(t, Duration::zero()).is_err());
    }

    #[test]
    fn test_trust_tier_ordering() {
        assert!(TrustTier::LocalTimestamp < TrustTier::TimestampAuthority);
        assert!(TrustTier::TimestampAuthority < TrustTier::DistributedLedger);
        assert_eq!(
            "distributed_ledger".parse::<TrustTier>().unwrap(),
            TrustTier::DistributedLedger
        );
    }

    #[test]
    fn test_integrity_is_max_tier_not_average() {
        let witnesses = vec![
            witness(TrustTier::LocalTimestamp),
            witness(TrustTier::DistributedLedger),
            witness(TrustTier::LocalTimestamp),
        ];
        assert_eq!(
            IntegrityStatus::from_witnesses(&witnesses),
            IntegrityStatus::Witnessed {
                strongest: TrustTier::DistributedLedger,
                witness_count: 3,
            }
        );
    }

    #[test]
    fn test_no_witnesses_is_distinct_state() {
        let status = IntegrityStatus::from_witnesses(&[]);
        assert_eq!(status, IntegrityStatus::NoWitnesses);
        assert_eq!(status.strongest(), None);
    }

    #[test]
    fn test_provider_default_tier() {
        let mut input = WitnessInput {
            target: "calendar".to_string(),
            timestamp: Utc::now(),
            proof: "00".to_string(),
            provider: "RFC3161".to_string(),
            trust_tier: None,
        };
        assert_eq!(input.resolved_tier(), TrustTier::TimestampAuthority);
        input.trust_tier = Some(TrustTier::LocalTimestamp);
        assert_eq!(input.resolved_tier(), TrustTier::LocalTimestamp);
    }

    #[test]
    fn test_pending_ots_receipt_is_not_ledger_tier() {
        assert_eq!(
            TrustTier::for_provider("opentimestamps"),
            TrustTier::TimestampAuthority
        );
        assert_eq!(TrustTier::for_provider("Bitcoin"), TrustTier::DistributedLedger);
        assert_eq!(TrustTier::for_provider("notary"), TrustTier::LocalTimestamp);

        let input = WitnessInput {
            target: "https://alice.btc.calendar.opentimestamps.org".to_string(),
            timestamp: Utc::now(),
            proof: "f010".to_string(),
            provider: "opentimestamps".to_string(),
            trust_tier: None,
        };
        assert_eq!(input.resolved_tier(), TrustTier::TimestampAuthority);
    }
}
