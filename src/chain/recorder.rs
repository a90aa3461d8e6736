//! Event Recorder
//!
//! The single write entry point for evidence events. Sequence and
//! previous-hash assignment is the one mutual-exclusion point of the
//! system: an in-process writer lock serializes local producers and the
//! `UNIQUE(sequence_number)` constraint arbitrates between processes.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::chain::builder::{self, ChainHead};
use crate::chain::event::NewEvent;
use crate::chain::verify::{ChainStatus, ChainVerifier};
use crate::database::{Database, Queries};
use crate::error::EvidenceError;

/// Page size used when sweeping the stored chain.
const VERIFY_BATCH: i64 = 500;

/// Whether `err` means another writer appended first, so the append must
/// be rebuilt on a fresh head. Besides a taken sequence number this covers
/// SQLITE_BUSY (5) and SQLITE_BUSY_SNAPSHOT (517): in WAL mode a deferred
/// transaction whose read snapshot went stale cannot upgrade to a writer.
fn is_write_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation()
                || matches!(db_err.code().as_deref(), Some("5") | Some("517"))
        }
        _ => false,
    }
}

#[derive(Clone)]
pub struct EventRecorder {
    database: Database,
    writer: Arc<Mutex<()>>,
    max_retries: u32,
}

impl EventRecorder {
    pub fn new(database: Database, max_retries: u32) -> Self {
        Self {
            database,
            writer: Arc::new(Mutex::new(())),
            max_retries: max_retries.max(1),
        }
    }

    /// Hash, link and durably append one event. Returns its id.
    pub async fn record_event(&self, input: NewEvent) -> Result<String, EvidenceError> {
        let _writer = self.writer.lock().await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_append(input.clone()).await {
                Ok(event_id) => return Ok(event_id),
                Err(EvidenceError::SequenceConflict(sequence)) if attempt < self.max_retries => {
                    warn!(
                        "Sequence {} taken by another writer, retrying ({}/{})",
                        sequence, attempt, self.max_retries
                    );
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    error!("Failed to record {} event: {}", input.event_type, e);
                    return Err(e);
                }
            }
        }
    }

    async fn try_append(&self, input: NewEvent) -> Result<String, EvidenceError> {
        let mut tx = self.database.begin().await?;

        let head = Queries::chain_head(&mut tx).await?;
        let event = builder::link(&head, input, Utc::now());

        let conflict = |e: sqlx::Error| {
            if is_write_conflict(&e) {
                EvidenceError::SequenceConflict(event.sequence_number)
            } else {
                e.into()
            }
        };
        Queries::insert_event(&mut tx, &event).await.map_err(conflict)?;
        tx.commit().await.map_err(conflict)?;

        debug!("Recorded evidence event {}", event.summary());
        Ok(event.event_id)
    }

    pub async fn head(&self) -> Result<ChainHead, EvidenceError> {
        self.database.chain_head().await
    }

    /// Sweep the whole stored chain in pages. The first break is returned as
    /// `ChainIntegrityViolation` naming the offending event.
    pub async fn verify_stored_chain(&self) -> Result<ChainStatus, EvidenceError> {
        let mut verifier = ChainVerifier::new();
        let mut after = verifier.head().sequence_number;

        loop {
            let page = self.database.events_after(after, VERIFY_BATCH).await?;
            let Some(last) = page.last() else {
                break;
            };
            after = last.sequence_number;
            for event in &page {
                verifier.push(event)?;
            }
        }

        if verifier.verified() == 0 {
            return Ok(ChainStatus::Empty);
        }
        Ok(ChainStatus::Verified {
            events: verifier.verified(),
            head: verifier.head(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::event::Severity;
    use crate::hash::GENESIS_HASH;
    use serde_json::json;

    async fn recorder() -> EventRecorder {
        EventRecorder::new(Database::new_in_memory().await.unwrap(), 3)
    }

    #[tokio::test]
    async fn test_record_links_events() {
        let recorder = recorder().await;
        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(
                recorder
                    .record_event(NewEvent::new("incident.logged", Severity::L2, json!({ "i": i })))
                    .await
                    .unwrap(),
            );
        }

        let db = &recorder.database;
        let first = db.get_event(&ids[0]).await.unwrap().unwrap();
        assert_eq!(first.sequence_number, 1);
        assert_eq!(first.previous_hash, GENESIS_HASH);

        for pair in ids.windows(2) {
            let prev = db.get_event(&pair[0]).await.unwrap().unwrap();
            let next = db.get_event(&pair[1]).await.unwrap().unwrap();
            assert_eq!(next.previous_hash, prev.payload_hash);
            assert_eq!(next.sequence_number, prev.sequence_number + 1);
        }
    }

    #[tokio::test]
    async fn test_concurrent_producers_form_single_chain() {
        let recorder = recorder().await;
        let handles: Vec<_> = (0..20)
            .map(|i| {
                let recorder = recorder.clone();
                tokio::spawn(async move {
                    recorder
                        .record_event(NewEvent::new("risk.scored", Severity::L1, json!({ "producer": i })))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        match recorder.verify_stored_chain().await.unwrap() {
            ChainStatus::Verified { events, head } => {
                assert_eq!(events, 20);
                assert_eq!(head.sequence_number, 20);
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_writers_sharing_a_store_all_land() {
        // Two recorders over separate pools behave like two processes: their
        // writer locks do not see each other, only the store arbitrates.
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("evidence.db").display());
        let first = Database::new(&url).await.unwrap();
        first.run_migrations().await.unwrap();
        let second = Database::new(&url).await.unwrap();

        let recorders = [EventRecorder::new(first, 20), EventRecorder::new(second, 20)];
        let handles: Vec<_> = (0..40)
            .map(|i| {
                let recorder = recorders[i % 2].clone();
                tokio::spawn(async move {
                    recorder
                        .record_event(NewEvent::new("access.granted", Severity::L1, json!({ "n": i })))
                        .await
                })
            })
            .collect();

        let mut failures = Vec::new();
        for handle in handles {
            if let Err(e) = handle.await.unwrap() {
                failures.push(e.to_string());
            }
        }
        assert!(failures.is_empty(), "lost appends: {:?}", failures);

        match recorders[0].verify_stored_chain().await.unwrap() {
            ChainStatus::Verified { events, head } => {
                assert_eq!(events, 40);
                assert_eq!(head.sequence_number, 40);
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_foreign_append_becomes_new_head() {
        let recorder = recorder().await;
        recorder
            .record_event(NewEvent::new("a", Severity::L1, json!(1)))
            .await
            .unwrap();

        let head = recorder.head().await.unwrap();
        let foreign = builder::link(&head, NewEvent::new("foreign", Severity::L1, json!(2)), Utc::now());
        let mut conn = recorder.database.acquire().await.unwrap();
        Queries::insert_event(&mut conn, &foreign).await.unwrap();

        // Re-inserting the same sequence number is the conflict the retry
        // loop recovers from.
        let stale = builder::link(&head, NewEvent::new("stale", Severity::L1, json!(3)), Utc::now());
        let err = Queries::insert_event(&mut conn, &stale).await.unwrap_err();
        assert!(is_write_conflict(&err));
        drop(conn);

        let id = recorder
            .record_event(NewEvent::new("b", Severity::L1, json!(3)))
            .await
            .unwrap();
        let event = recorder.database.get_event(&id).await.unwrap().unwrap();
        assert_eq!(event.sequence_number, 3);
        assert_eq!(event.previous_hash, foreign.payload_hash);
    }

    #[tokio::test]
    async fn test_float_payloads_reload_with_identical_hash() {
        let recorder = recorder().await;
        let scores = [
            1.0715660391465826e-75,
            -1.603964615428183e143,
            0.1 + 0.2,
            5e-324,
            f64::MAX,
        ];
        for score in scores {
            recorder
                .record_event(NewEvent::new("model.scored", Severity::L2, json!({ "score": score })))
                .await
                .unwrap();
        }

        assert!(matches!(
            recorder.verify_stored_chain().await.unwrap(),
            ChainStatus::Verified { events: 5, .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_store_verifies_as_empty() {
        let recorder = recorder().await;
        assert_eq!(recorder.verify_stored_chain().await.unwrap(), ChainStatus::Empty);
    }
}
