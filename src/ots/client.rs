//! OpenTimestamps Client
//!
//! Submits anchor roots to an OpenTimestamps calendar server. The calendar
//! answers with a pending timestamp that later commits to a Bitcoin block.

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::EvidenceError;
use crate::hash::Sha256Hash;

const OTS_MEDIA_TYPE: &str = "application/vnd.opentimestamps.v1";

/// OpenTimestamps client for one calendar server
#[derive(Clone, Debug)]
pub struct OtsClient {
    calendar_url: String,
    http_client: Client,
}

impl OtsClient {
    pub fn new(calendar_url: String, timeout: Duration) -> Result<Self, EvidenceError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("evidence-trail/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EvidenceError::Witness(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            calendar_url: calendar_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn calendar_url(&self) -> &str {
        &self.calendar_url
    }

    /// Submit a digest for timestamping; returns the serialized pending timestamp.
    pub async fn stamp(&self, digest: &Sha256Hash) -> Result<Vec<u8>, EvidenceError> {
        let url = format!("{}/digest", self.calendar_url);
        info!("Submitting {} to OpenTimestamps calendar {}", digest, self.calendar_url);

        let response = self
            .http_client
            .post(&url)
            .header(ACCEPT, OTS_MEDIA_TYPE)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(digest.as_bytes().to_vec())
            .send()
            .await
            .map_err(|e| EvidenceError::Witness(format!("Calendar request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EvidenceError::Witness(format!(
                "Calendar {} rejected digest: HTTP {}",
                self.calendar_url, status
            )));
        }

        let proof = response
            .bytes()
            .await
            .map_err(|e| EvidenceError::Witness(format!("Failed to read calendar response: {}", e)))?;
        if proof.is_empty() {
            return Err(EvidenceError::Witness(
                "Calendar returned an empty timestamp".to_string(),
            ));
        }

        debug!("Received {} byte pending timestamp", proof.len());
        Ok(proof.to_vec())
    }
}
