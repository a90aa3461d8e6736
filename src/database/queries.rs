use sqlx::SqliteConnection;

use crate::anchor::model::{AnchorWindow, MerkleAnchor, Witness};
use crate::chain::builder::ChainHead;
use crate::chain::event::EvidenceEvent;
use crate::database::models::*;
use crate::error::EvidenceError;
use crate::hash::Sha256Hash;

const EVENT_COLUMNS: &str = "event_id, sequence_number, correlation_id, causation_id, occurred_at, \
     recorded_at, event_type, severity, source_system, regulatory_tags, articles, payload, \
     payload_hash, previous_hash";

const ANCHOR_COLUMNS: &str = "anchor_id, period_start, period_end, event_count, first_sequence, \
     last_sequence, merkle_root, protocol_version, created_at";

pub struct Queries;

impl Queries {
    pub async fn chain_head(conn: &mut SqliteConnection) -> Result<ChainHead, EvidenceError> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT sequence_number, payload_hash FROM evidence_events ORDER BY sequence_number DESC LIMIT 1",
        )
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            None => Ok(ChainHead::genesis()),
            Some((sequence_number, hash)) => Ok(ChainHead {
                sequence_number,
                payload_hash: Sha256Hash::from_hex(&hash).map_err(|e| {
                    EvidenceError::Serialization(format!("Stored head hash is not a hash: {}", e))
                })?,
            }),
        }
    }

    /// Plain insert; a duplicate sequence number surfaces as a unique violation.
    pub async fn insert_event(
        conn: &mut SqliteConnection,
        event: &EvidenceEvent,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO evidence_events
            (event_id, sequence_number, correlation_id, causation_id, occurred_at, recorded_at,
             event_type, severity, source_system, regulatory_tags, articles, payload,
             payload_hash, previous_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.event_id)
        .bind(event.sequence_number)
        .bind(&event.correlation_id)
        .bind(&event.causation_id)
        .bind(to_millis(&event.occurred_at))
        .bind(to_millis(&event.recorded_at))
        .bind(&event.event_type)
        .bind(event.severity.as_str())
        .bind(&event.source_system)
        .bind(serde_json::Value::from(event.regulatory_tags.clone()).to_string())
        .bind(serde_json::Value::from(event.articles.clone()).to_string())
        .bind(event.payload.to_string())
        .bind(event.payload_hash.to_hex())
        .bind(event.previous_hash.to_hex())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn get_event(
        conn: &mut SqliteConnection,
        event_id: &str,
    ) -> Result<Option<EvidenceEvent>, EvidenceError> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {} FROM evidence_events WHERE event_id = ?",
            EVENT_COLUMNS
        ))
        .bind(event_id)
        .fetch_optional(&mut *conn)
        .await?;
        row.map(EvidenceEvent::try_from).transpose()
    }

    /// Events with `start <= occurred_at < end`, in sequence order.
    pub async fn events_in_window(
        conn: &mut SqliteConnection,
        window: &AnchorWindow,
    ) -> Result<Vec<EvidenceEvent>, EvidenceError> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {} FROM evidence_events WHERE occurred_at >= ? AND occurred_at < ? ORDER BY sequence_number",
            EVENT_COLUMNS
        ))
        .bind(to_millis(&window.start))
        .bind(to_millis(&window.end))
        .fetch_all(&mut *conn)
        .await?;
        rows.into_iter().map(EvidenceEvent::try_from).collect()
    }

    /// Page of events with sequence number greater than `after`.
    pub async fn events_after(
        conn: &mut SqliteConnection,
        after: i64,
        limit: i64,
    ) -> Result<Vec<EvidenceEvent>, EvidenceError> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {} FROM evidence_events WHERE sequence_number > ? ORDER BY sequence_number LIMIT ?",
            EVENT_COLUMNS
        ))
        .bind(after)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
        rows.into_iter().map(EvidenceEvent::try_from).collect()
    }

    pub async fn event_count(conn: &mut SqliteConnection) -> Result<i64, EvidenceError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM evidence_events")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }

    /// Returns `false` when the window already has an anchor.
    pub async fn insert_anchor(
        conn: &mut SqliteConnection,
        anchor: &MerkleAnchor,
    ) -> Result<bool, EvidenceError> {
        let result = sqlx::query(
            r#"
            INSERT INTO merkle_anchors
            (anchor_id, period_start, period_end, event_count, first_sequence, last_sequence,
             merkle_root, protocol_version, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (period_start, period_end) DO NOTHING
            "#,
        )
        .bind(&anchor.anchor_id)
        .bind(to_millis(&anchor.period_start))
        .bind(to_millis(&anchor.period_end))
        .bind(anchor.event_count)
        .bind(anchor.first_sequence)
        .bind(anchor.last_sequence)
        .bind(anchor.merkle_root.to_hex())
        .bind(i64::from(anchor.protocol_version))
        .bind(to_millis(&anchor.created_at))
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn anchor_for_window(
        conn: &mut SqliteConnection,
        window: &AnchorWindow,
    ) -> Result<Option<MerkleAnchor>, EvidenceError> {
        let row: Option<AnchorRow> = sqlx::query_as(&format!(
            "SELECT {} FROM merkle_anchors WHERE period_start = ? AND period_end = ?",
            ANCHOR_COLUMNS
        ))
        .bind(to_millis(&window.start))
        .bind(to_millis(&window.end))
        .fetch_optional(&mut *conn)
        .await?;
        Self::with_witnesses(conn, row).await
    }

    pub async fn get_anchor(
        conn: &mut SqliteConnection,
        anchor_id: &str,
    ) -> Result<Option<MerkleAnchor>, EvidenceError> {
        let row: Option<AnchorRow> = sqlx::query_as(&format!(
            "SELECT {} FROM merkle_anchors WHERE anchor_id = ?",
            ANCHOR_COLUMNS
        ))
        .bind(anchor_id)
        .fetch_optional(&mut *conn)
        .await?;
        Self::with_witnesses(conn, row).await
    }

    pub async fn latest_anchor(
        conn: &mut SqliteConnection,
    ) -> Result<Option<MerkleAnchor>, EvidenceError> {
        let row: Option<AnchorRow> = sqlx::query_as(&format!(
            "SELECT {} FROM merkle_anchors ORDER BY period_end DESC LIMIT 1",
            ANCHOR_COLUMNS
        ))
        .fetch_optional(&mut *conn)
        .await?;
        Self::with_witnesses(conn, row).await
    }

    pub async fn anchor_count(conn: &mut SqliteConnection) -> Result<i64, EvidenceError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM merkle_anchors")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }

    pub async fn witnesses_for(
        conn: &mut SqliteConnection,
        anchor_id: &str,
    ) -> Result<Vec<Witness>, EvidenceError> {
        let rows: Vec<WitnessRow> = sqlx::query_as(
            r#"
            SELECT witness_id, anchor_id, target, witnessed_at, proof, provider, trust_tier, recorded_at
            FROM anchor_witnesses
            WHERE anchor_id = ?
            ORDER BY witness_id
            "#,
        )
        .bind(anchor_id)
        .fetch_all(&mut *conn)
        .await?;
        rows.into_iter().map(Witness::try_from).collect()
    }

    /// Single-statement append guarded by the anchor's existence. Returns the
    /// number of rows inserted: zero means the anchor does not exist.
    pub async fn insert_witness(
        conn: &mut SqliteConnection,
        anchor_id: &str,
        witness: &Witness,
    ) -> Result<u64, EvidenceError> {
        let result = sqlx::query(
            r#"
            INSERT INTO anchor_witnesses
            (anchor_id, target, witnessed_at, proof, provider, trust_tier, recorded_at)
            SELECT ?, ?, ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM merkle_anchors WHERE anchor_id = ?)
            "#,
        )
        .bind(anchor_id)
        .bind(&witness.target)
        .bind(to_millis(&witness.timestamp))
        .bind(&witness.proof)
        .bind(&witness.provider)
        .bind(witness.trust_tier.as_str())
        .bind(to_millis(&witness.recorded_at))
        .bind(anchor_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    async fn with_witnesses(
        conn: &mut SqliteConnection,
        row: Option<AnchorRow>,
    ) -> Result<Option<MerkleAnchor>, EvidenceError> {
        match row {
            None => Ok(None),
            Some(row) => {
                let witnesses = Self::witnesses_for(conn, &row.anchor_id).await?;
                row.into_anchor(witnesses).map(Some)
            }
        }
    }
}
