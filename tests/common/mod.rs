#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use evidence_trail::chain::{EventMetadata, EventRecorder, NewEvent, Severity};
use evidence_trail::database::Database;
use serde_json::json;

/// Setup an in-memory SQLite database for testing
pub async fn setup_test_db() -> Database {
    Database::new_in_memory().await.expect("Failed to create test database")
}

pub fn test_recorder(database: &Database) -> EventRecorder {
    EventRecorder::new(database.clone(), 5)
}

/// Start of the fixed UTC day most fixtures are placed in.
pub fn test_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

/// A decision event `minutes` into the test day.
pub fn decision_event(index: usize, minutes: i64) -> NewEvent {
    NewEvent::new(
        "model.decision",
        Severity::L2,
        json!({
            "decisionId": format!("dec-{}", index),
            "outcome": if index % 2 == 0 { "approved" } else { "declined" },
            "score": index * 7,
        }),
    )
    .with_tags(&["ai-act", "transparency"])
    .with_articles(&["12", "19"])
    .with_metadata(EventMetadata {
        correlation_id: Some(format!("corr-{}", index)),
        causation_id: None,
        source_system: Some("scoring-service".to_string()),
    })
    .occurred_at(test_day() + Duration::minutes(minutes))
}

/// Record `count` events spread across the test day; returns their ids.
pub async fn record_test_events(recorder: &EventRecorder, count: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let id = recorder
            .record_event(decision_event(i, 60 * (i as i64 + 1)))
            .await
            .expect("Failed to record test event");
        ids.push(id);
    }
    ids
}
