//! Witness Publisher
//!
//! Turns a freshly created anchor into an OpenTimestamps witness. Runs off
//! the anchoring path: callers spawn `attest` and move on.

use chrono::Utc;
use tracing::{error, info};

use crate::anchor::model::{AnchorOutcome, TrustTier, Witness, WitnessInput};
use crate::anchor::witness::WitnessRegistry;
use crate::error::EvidenceError;
use crate::ots::client::OtsClient;

pub const OTS_PROVIDER: &str = "opentimestamps";

#[derive(Clone)]
pub struct WitnessPublisher {
    client: OtsClient,
    registry: WitnessRegistry,
}

impl WitnessPublisher {
    pub fn new(client: OtsClient, registry: WitnessRegistry) -> Self {
        Self { client, registry }
    }

    /// Stamp the anchor root and record the calendar receipt as a witness.
    /// A pending calendar receipt counts as a timestamp authority until it
    /// is upgraded to a Bitcoin attestation.
    pub async fn attest(&self, anchor: &AnchorOutcome) -> Result<Witness, EvidenceError> {
        let proof = self.client.stamp(&anchor.merkle_root).await?;

        let input = WitnessInput {
            target: self.client.calendar_url().to_string(),
            timestamp: Utc::now(),
            proof: hex::encode(proof),
            provider: OTS_PROVIDER.to_string(),
            trust_tier: Some(TrustTier::TimestampAuthority),
        };
        let witness = self.registry.add_witness(&anchor.anchor_id, input).await?;
        info!("Anchor {} submitted to OpenTimestamps", anchor.anchor_id);
        Ok(witness)
    }

    /// Fire-and-forget variant used by the scheduler.
    pub fn spawn_attest(&self, anchor: AnchorOutcome) -> tokio::task::JoinHandle<()> {
        let publisher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = publisher.attest(&anchor).await {
                error!("Failed to attest anchor {}: {}", anchor.anchor_id, e);
            }
        })
    }
}
