//! Witness Registry
//!
//! Attaches out-of-band attestations to anchors that already exist.

use chrono::Utc;
use tracing::{info, warn};

use crate::anchor::model::{IntegrityStatus, Witness, WitnessInput};
use crate::database::{Database, Queries};
use crate::error::EvidenceError;

#[derive(Clone)]
pub struct WitnessRegistry {
    database: Database,
}

impl WitnessRegistry {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Append a witness to `anchor_id`. Fails with `AnchorNotFound` for an
    /// unknown anchor and never creates one.
    pub async fn add_witness(
        &self,
        anchor_id: &str,
        input: WitnessInput,
    ) -> Result<Witness, EvidenceError> {
        let witness = Witness::from_input(input, Utc::now());

        let mut conn = self.database.acquire().await?;
        let inserted = Queries::insert_witness(&mut conn, anchor_id, &witness).await?;
        if inserted == 0 {
            warn!("Rejected {} witness for unknown anchor {}", witness.provider, anchor_id);
            return Err(EvidenceError::AnchorNotFound(anchor_id.to_string()));
        }

        info!(
            "Recorded {} witness ({}) for anchor {}",
            witness.provider, witness.trust_tier, anchor_id
        );
        Ok(witness)
    }

    pub async fn witnesses(&self, anchor_id: &str) -> Result<Vec<Witness>, EvidenceError> {
        let mut conn = self.database.acquire().await?;
        Queries::get_anchor(&mut conn, anchor_id)
            .await?
            .map(|anchor| anchor.witnesses)
            .ok_or_else(|| EvidenceError::AnchorNotFound(anchor_id.to_string()))
    }

    /// Strongest tier attested for the anchor, or `NoWitnesses`.
    pub async fn integrity_status(&self, anchor_id: &str) -> Result<IntegrityStatus, EvidenceError> {
        let witnesses = self.witnesses(anchor_id).await?;
        Ok(IntegrityStatus::from_witnesses(&witnesses))
    }
}
