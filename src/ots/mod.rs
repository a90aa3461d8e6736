//! OpenTimestamps Integration Module
//!
//! Provides independent attestation of anchor roots by submitting them to
//! OpenTimestamps calendars, which aggregate them into Bitcoin transactions.

pub mod client;
pub mod publisher;

pub use client::OtsClient;
pub use publisher::WitnessPublisher;
