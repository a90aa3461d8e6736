pub mod models;
pub mod queries;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::anchor::model::{AnchorWindow, MerkleAnchor};
use crate::chain::builder::ChainHead;
use crate::chain::event::EvidenceEvent;
use crate::error::EvidenceError;

pub use queries::Queries;

/// Handle to the event, anchor and witness tables.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, EvidenceError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        info!("Connected to evidence store at {}", database_url);
        Ok(Database { pool })
    }

    /// Private in-memory store with migrations applied. A single connection
    /// that is never recycled, so the schema outlives idle periods.
    pub async fn new_in_memory() -> Result<Self, EvidenceError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let db = Database { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn run_migrations(&self) -> Result<(), EvidenceError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, EvidenceError> {
        Ok(self.pool.begin().await?)
    }

    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>, EvidenceError> {
        Ok(self.pool.acquire().await?)
    }

    pub async fn chain_head(&self) -> Result<ChainHead, EvidenceError> {
        let mut conn = self.acquire().await?;
        Queries::chain_head(&mut conn).await
    }

    pub async fn get_event(&self, event_id: &str) -> Result<Option<EvidenceEvent>, EvidenceError> {
        let mut conn = self.acquire().await?;
        Queries::get_event(&mut conn, event_id).await
    }

    pub async fn events_in_window(
        &self,
        window: &AnchorWindow,
    ) -> Result<Vec<EvidenceEvent>, EvidenceError> {
        let mut conn = self.acquire().await?;
        Queries::events_in_window(&mut conn, window).await
    }

    pub async fn events_after(
        &self,
        after: i64,
        limit: i64,
    ) -> Result<Vec<EvidenceEvent>, EvidenceError> {
        let mut conn = self.acquire().await?;
        Queries::events_after(&mut conn, after, limit).await
    }

    pub async fn event_count(&self) -> Result<i64, EvidenceError> {
        let mut conn = self.acquire().await?;
        Queries::event_count(&mut conn).await
    }

    pub async fn get_anchor(&self, anchor_id: &str) -> Result<Option<MerkleAnchor>, EvidenceError> {
        let mut conn = self.acquire().await?;
        Queries::get_anchor(&mut conn, anchor_id).await
    }

    pub async fn anchor_for_window(
        &self,
        window: &AnchorWindow,
    ) -> Result<Option<MerkleAnchor>, EvidenceError> {
        let mut conn = self.acquire().await?;
        Queries::anchor_for_window(&mut conn, window).await
    }

    pub async fn latest_anchor(&self) -> Result<Option<MerkleAnchor>, EvidenceError> {
        let mut conn = self.acquire().await?;
        Queries::latest_anchor(&mut conn).await
    }

    pub async fn anchor_count(&self) -> Result<i64, EvidenceError> {
        let mut conn = self.acquire().await?;
        Queries::anchor_count(&mut conn).await
    }
}
