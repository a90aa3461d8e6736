//! SHA-256 Digests and Protocol Constants
//!
//! Every hash in the evidence trail is a raw 32-byte SHA-256 digest that
//! travels as lowercase hex. The genesis and empty-root sentinels below are
//! part of the hashing protocol: producers and verifiers must agree on them
//! exactly, so they are versioned together with the canonical encoding.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::EvidenceError;

/// Version of the hashing protocol (canonical encoding, sentinels, odd-leaf rule).
pub const HASH_PROTOCOL_VERSION: u32 = 1;

/// `previous_hash` of the first event ever recorded.
pub const GENESIS_HASH: Sha256Hash = Sha256Hash([0u8; 32]);

/// Merkle root of a window that contains no events.
pub const EMPTY_ROOT: Sha256Hash = Sha256Hash([0u8; 32]);

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha256Hash([u8; 32]);

impl Sha256Hash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash arbitrary bytes
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// `SHA-256(left || right)` over the raw digests. Not commutative.
    pub fn combine(left: &Sha256Hash, right: &Sha256Hash) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(left.0);
        hasher.update(right.0);
        Self(hasher.finalize().into())
    }

    /// Parse a 64-character hex string (either case)
    pub fn from_hex(s: &str) -> Result<Self, EvidenceError> {
        if s.len() != 64 {
            return Err(EvidenceError::malformed(format!(
                "expected 64 hex characters, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| EvidenceError::malformed(format!("invalid hex '{}': {}", s, e)))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Copy with a single bit inverted.
    pub fn with_bit_flipped(&self, bit: usize) -> Self {
        let mut bytes = self.0;
        bytes[(bit / 8) % 32] ^= 1 << (bit % 8);
        Self(bytes)
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Hash({})", self.to_hex())
    }
}

impl FromStr for Sha256Hash {
    type Err = EvidenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Sha256Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Sha256Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_are_all_zero() {
        assert!(GENESIS_HASH.is_zero());
        assert!(EMPTY_ROOT.is_zero());
        assert_eq!(GENESIS_HASH.to_hex(), "0".repeat(64));
    }

    #[test]
    fn test_hex_parsing() {
        let h = Sha256Hash::digest(b"evidence");
        assert_eq!(Sha256Hash::from_hex(&h.to_hex()).unwrap(), h);
        assert_eq!(Sha256Hash::from_hex(&h.to_hex().to_uppercase()).unwrap(), h);

        assert!(matches!(
            Sha256Hash::from_hex("abc"),
            Err(EvidenceError::MalformedProof(_))
        ));
        assert!(matches!(
            Sha256Hash::from_hex(&"zz".repeat(32)),
            Err(EvidenceError::MalformedProof(_))
        ));
    }

    #[test]
    fn test_combine_is_order_sensitive() {
        let a = Sha256Hash::digest(b"a");
        let b = Sha256Hash::digest(b"b");
        assert_ne!(Sha256Hash::combine(&a, &b), Sha256Hash::combine(&b, &a));

        let mut concat = Vec::new();
        concat.extend_from_slice(a.as_bytes());
        concat.extend_from_slice(b.as_bytes());
        assert_eq!(Sha256Hash::combine(&a, &b), Sha256Hash::digest(&concat));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let h = Sha256Hash::digest(b"x");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h.to_hex()));
        let back: Sha256Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
