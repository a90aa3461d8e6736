//! Anchor Service
//!
//! Commits each time window of the event log to a single Merkle root and
//! regenerates inclusion proofs from the anchored range on demand.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::anchor::model::{AnchorOutcome, AnchorWindow, MerkleAnchor};
use crate::chain::event::EvidenceEvent;
use crate::database::{Database, Queries};
use crate::error::EvidenceError;
use crate::hash::{Sha256Hash, HASH_PROTOCOL_VERSION};
use crate::merkle::proof::MerkleProof;
use crate::merkle::tree::MerkleTree;

/// Root and range computed for a window, not yet persisted.
#[derive(Debug, Clone)]
pub struct BuiltAnchor {
    pub window: AnchorWindow,
    pub merkle_root: Sha256Hash,
    pub event_count: i64,
    pub first_sequence: Option<i64>,
    pub last_sequence: Option<i64>,
}

impl BuiltAnchor {
    pub fn from_events(window: AnchorWindow, events: &[EvidenceEvent]) -> Self {
        let leaves = events.iter().map(|e| e.payload_hash).collect();
        let tree = MerkleTree::build(leaves);
        Self {
            window,
            merkle_root: tree.root(),
            event_count: events.len() as i64,
            first_sequence: events.first().map(|e| e.sequence_number),
            last_sequence: events.last().map(|e| e.sequence_number),
        }
    }
}

#[derive(Clone)]
pub struct AnchorService {
    database: Database,
}

impl AnchorService {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Anchor `[period_start, period_end)`. Re-running for an anchored
    /// window returns the existing anchor when the root is unchanged and
    /// fails with `AnchorDivergence` when it is not.
    pub async fn create_anchor(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<AnchorOutcome, EvidenceError> {
        let window = AnchorWindow::new(period_start, period_end)?;
        let events = self.collect(&window, Utc::now()).await?;
        let built = BuiltAnchor::from_events(window, &events);
        self.persist(built).await
    }

    /// Events of a closed window in sequence order. `now` is the snapshot
    /// instant; windows that end after it are rejected.
    pub async fn collect(
        &self,
        window: &AnchorWindow,
        now: DateTime<Utc>,
    ) -> Result<Vec<EvidenceEvent>, EvidenceError> {
        if !window.is_closed_at(&now) {
            return Err(EvidenceError::InvalidWindow(format!(
                "window {} has not closed yet (now {})",
                window,
                now.to_rfc3339()
            )));
        }
        let events = self.database.events_in_window(window).await?;
        debug!("Collected {} events for window {}", events.len(), window);
        Ok(events)
    }

    /// Write the anchor in one transaction, or reconcile with the anchor
    /// already present for the window.
    pub async fn persist(&self, built: BuiltAnchor) -> Result<AnchorOutcome, EvidenceError> {
        let mut tx = self.database.begin().await?;

        if let Some(existing) = Queries::anchor_for_window(&mut tx, &built.window).await? {
            return reconcile(existing, &built);
        }

        let anchor = MerkleAnchor {
            anchor_id: Uuid::new_v4().to_string(),
            period_start: built.window.start,
            period_end: built.window.end,
            event_count: built.event_count,
            first_sequence: built.first_sequence,
            last_sequence: built.last_sequence,
            merkle_root: built.merkle_root,
            protocol_version: HASH_PROTOCOL_VERSION,
            witnesses: Vec::new(),
            created_at: Utc::now(),
        };

        if !Queries::insert_anchor(&mut tx, &anchor).await? {
            // Lost a race with another anchoring run for the same window.
            let existing = Queries::anchor_for_window(&mut tx, &built.window)
                .await?
                .ok_or_else(|| {
                    EvidenceError::StoreUnavailable(format!(
                        "anchor for window {} vanished after conflict",
                        built.window
                    ))
                })?;
            return reconcile(existing, &built);
        }
        tx.commit().await?;

        info!("Created {}", anchor.summary());
        Ok(AnchorOutcome {
            anchor_id: anchor.anchor_id,
            merkle_root: anchor.merkle_root,
            event_count: anchor.event_count,
            created: true,
        })
    }

    pub async fn get_anchor(&self, anchor_id: &str) -> Result<MerkleAnchor, EvidenceError> {
        self.database
            .get_anchor(anchor_id)
            .await?
            .ok_or_else(|| EvidenceError::AnchorNotFound(anchor_id.to_string()))
    }

    /// Recompute an anchor from the current event set and compare roots.
    pub async fn verify_anchor(&self, anchor_id: &str) -> Result<bool, EvidenceError> {
        let anchor = self.get_anchor(anchor_id).await?;
        let events = self.database.events_in_window(&anchor.window()).await?;
        let rebuilt = BuiltAnchor::from_events(anchor.window(), &events);
        Ok(rebuilt.merkle_root == anchor.merkle_root && rebuilt.event_count == anchor.event_count)
    }

    /// Inclusion proof for `event_id` against the stored root of `anchor_id`.
    pub async fn generate_proof(
        &self,
        anchor_id: &str,
        event_id: &str,
    ) -> Result<MerkleProof, EvidenceError> {
        let anchor = self.get_anchor(anchor_id).await?;
        let event = self
            .database
            .get_event(event_id)
            .await?
            .ok_or_else(|| EvidenceError::EventNotFound(event_id.to_string()))?;

        let not_covered = || EvidenceError::EventNotInAnchor {
            anchor_id: anchor_id.to_string(),
            event_id: event_id.to_string(),
        };
        if !anchor.window().contains(&event.occurred_at) {
            return Err(not_covered());
        }

        let events = self.database.events_in_window(&anchor.window()).await?;
        let index = events
            .iter()
            .position(|e| e.event_id == event.event_id)
            .ok_or_else(not_covered)?;

        let tree = MerkleTree::build(events.iter().map(|e| e.payload_hash).collect());
        if tree.root() != anchor.merkle_root {
            error!(
                "Anchor {} no longer matches its events: stored {}, rebuilt {}",
                anchor.anchor_id,
                anchor.merkle_root,
                tree.root()
            );
            return Err(EvidenceError::AnchorDivergence {
                anchor_id: anchor.anchor_id,
                stored: anchor.merkle_root.to_hex(),
                recomputed: tree.root().to_hex(),
            });
        }

        tree.proof(index)
    }
}

fn reconcile(existing: MerkleAnchor, built: &BuiltAnchor) -> Result<AnchorOutcome, EvidenceError> {
    if existing.merkle_root == built.merkle_root && existing.event_count == built.event_count {
        debug!(
            "Window {} already anchored as {} with identical root",
            built.window, existing.anchor_id
        );
        return Ok(AnchorOutcome {
            anchor_id: existing.anchor_id,
            merkle_root: existing.merkle_root,
            event_count: existing.event_count,
            created: false,
        });
    }

    error!(
        "Window {} already anchored as {} with root {}, recomputed {}",
        built.window, existing.anchor_id, existing.merkle_root, built.merkle_root
    );
    Err(EvidenceError::AnchorDivergence {
        anchor_id: existing.anchor_id,
        stored: existing.merkle_root.to_hex(),
        recomputed: built.merkle_root.to_hex(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::builder::{link, ChainHead};
    use crate::chain::event::{NewEvent, Severity};
    use crate::hash::EMPTY_ROOT;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn day() -> AnchorWindow {
        AnchorWindow::new(
            Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 11, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_window_anchors_sentinel() {
        let service = AnchorService::new(Database::new_in_memory().await.unwrap());
        let window = day();
        let outcome = service.create_anchor(window.start, window.end).await.unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.event_count, 0);
        assert_eq!(outcome.merkle_root, EMPTY_ROOT);

        let anchor = service.get_anchor(&outcome.anchor_id).await.unwrap();
        assert_eq!(anchor.first_sequence, None);
        assert_eq!(anchor.protocol_version, HASH_PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_open_window_rejected() {
        let service = AnchorService::new(Database::new_in_memory().await.unwrap());
        let now = Utc::now();
        let err = service
            .create_anchor(now - Duration::hours(1), now + Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EvidenceError::InvalidWindow(_)));
        assert_eq!(service.database().anchor_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_divergent_rerun_never_creates_second_anchor() {
        let db = Database::new_in_memory().await.unwrap();
        let service = AnchorService::new(db.clone());
        let window = day();

        let first = service.create_anchor(window.start, window.end).await.unwrap();
        assert_eq!(first.event_count, 0);

        // A backdated event lands inside the already anchored window.
        let late = link(
            &ChainHead::genesis(),
            NewEvent::new("late", Severity::L1, json!({})).occurred_at(window.start + Duration::hours(3)),
            Utc::now(),
        );
        let mut conn = db.acquire().await.unwrap();
        Queries::insert_event(&mut conn, &late).await.unwrap();
        drop(conn);

        let err = service.create_anchor(window.start, window.end).await.unwrap_err();
        assert!(matches!(err, EvidenceError::AnchorDivergence { .. }));
        assert_eq!(db.anchor_count().await.unwrap(), 1);
        assert!(!service.verify_anchor(&first.anchor_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_anchor() {
        let service = AnchorService::new(Database::new_in_memory().await.unwrap());
        assert!(matches!(
            service.get_anchor("missing").await,
            Err(EvidenceError::AnchorNotFound(_))
        ));
        assert!(matches!(
            service.generate_proof("missing", "event").await,
            Err(EvidenceError::AnchorNotFound(_))
        ));
    }
}
