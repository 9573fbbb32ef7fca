//! The event record stored by the relay.
//!
//! Events are parsed from NIP-01 JSON. Verification of the id and signature is
//! delegated to the nostr crate; the store itself only ever sees [`Event`].

use crate::error::{Error, Result};
use nostr::JsonUtil; // Required for Event::from_json()
use serde::{Deserialize, Serialize};

/// Length of a hex-encoded event id or public key.
pub const HEX_KEY_LEN: usize = 64;

/// Length of a hex-encoded Schnorr signature.
pub const HEX_SIG_LEN: usize = 128;

/// An immutable, signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event id (hex SHA-256).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Creation time, Unix seconds.
    pub created_at: u32,
    /// Event kind.
    pub kind: u16,
    /// Tag list; the first element of each tag is its name.
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    /// Free-form content.
    #[serde(default)]
    pub content: String,
    /// Schnorr signature (hex).
    pub sig: String,
}

impl Event {
    /// Parse an event from JSON and verify its id and signature.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed, the id does not match the
    /// canonical hash, or the signature does not verify.
    pub fn from_json_verified(json: &str) -> Result<Self> {
        let event = nostr::Event::from_json(json)?;
        event.verify()?;
        Self::try_from(&event)
    }

    /// Parse an event from JSON without cryptographic verification.
    ///
    /// Only the shape of the id, pubkey, and signature fields is checked.
    pub fn from_json_unverified(json: &str) -> Result<Self> {
        let event: Self = serde_json::from_str(json)?;
        event.check_fields()?;
        Ok(event)
    }

    /// Check that the fixed-length fields are hex strings of the expected length.
    pub fn check_fields(&self) -> Result<()> {
        check_hex("id", &self.id, HEX_KEY_LEN)?;
        check_hex("pubkey", &self.pubkey, HEX_KEY_LEN)?;
        check_hex("sig", &self.sig, HEX_SIG_LEN)
    }
}

impl TryFrom<&nostr::Event> for Event {
    type Error = Error;

    fn try_from(event: &nostr::Event) -> Result<Self> {
        let created_at =
            u32::try_from(event.created_at.as_u64()).map_err(|_| Error::InvalidField {
                field: "created_at",
                reason: format!("{} does not fit in 32 bits", event.created_at.as_u64()),
            })?;

        Ok(Self {
            id: event.id.to_hex(),
            pubkey: event.pubkey.to_hex(),
            created_at,
            kind: event.kind.as_u16(),
            tags: event
                .tags
                .iter()
                .map(|tag| tag.as_slice().iter().map(|s| s.to_string()).collect())
                .collect(),
            content: event.content.clone(),
            sig: event.sig.to_string(),
        })
    }
}

fn check_hex(field: &'static str, value: &str, len: usize) -> Result<()> {
    if value.len() != len {
        return Err(Error::InvalidField {
            field,
            reason: format!("expected {len} hex characters, got {}", value.len()),
        });
    }
    if !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidField {
            field,
            reason: "not hex".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_EVENT: &str = r#"{"id":"4ff2236ceb2fdc6dee6317cd0b841f3f020ac985bb3f99f7f4c1f973ec28d06b","pubkey":"35e433c42e5bb838daabd178d54620e427cccb214c55b95daac3dbd9506fbcaf","created_at":1758468146,"kind":1059,"tags":[["p","c40d9a07a3ece16bbed2b141fc7f0d133be6e88460dd052ae062c5b7c92fd7a0"]],"content":"test content","sig":"95dac63b919f424211b12d70786d42c03ec63cbe9196f6d6e773260926d3fd37054eecd3e7c70beb1ed9ef1e2a68cf62c09fc3ad5ec5d45e9143ab4044275b2f"}"#;

    #[test]
    fn test_from_json_unverified_parses_fields() {
        let event = Event::from_json_unverified(SAMPLE_EVENT).unwrap();
        assert_eq!(event.kind, 1059);
        assert_eq!(event.created_at, 1758468146);
        assert_eq!(event.content, "test content");
        assert_eq!(event.tags.len(), 1);
        assert_eq!(event.tags[0][0], "p");
    }

    #[test]
    fn test_from_json_unverified_rejects_short_id() {
        let json = SAMPLE_EVENT.replace(
            "4ff2236ceb2fdc6dee6317cd0b841f3f020ac985bb3f99f7f4c1f973ec28d06b",
            "abc",
        );
        let err = Event::from_json_unverified(&json).unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "id", .. }));
    }

    #[test]
    fn test_from_json_unverified_rejects_non_hex_pubkey() {
        let json = SAMPLE_EVENT.replace(
            "35e433c42e5bb838daabd178d54620e427cccb214c55b95daac3dbd9506fbcaf",
            &"z".repeat(64),
        );
        let err = Event::from_json_unverified(&json).unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "pubkey", .. }));
    }

    #[test]
    fn test_from_json_verified_rejects_invalid_json() {
        assert!(Event::from_json_verified("not json").is_err());
    }

    #[test]
    fn test_from_json_verified_rejects_tampered_content() {
        let tampered = SAMPLE_EVENT.replace("test content", "tampered content");
        assert!(Event::from_json_verified(&tampered).is_err());
    }

    #[test]
    fn test_missing_tags_default_to_empty() {
        let json = r#"{"id":"4ff2236ceb2fdc6dee6317cd0b841f3f020ac985bb3f99f7f4c1f973ec28d06b","pubkey":"35e433c42e5bb838daabd178d54620e427cccb214c55b95daac3dbd9506fbcaf","created_at":1,"kind":1,"content":"","sig":"95dac63b919f424211b12d70786d42c03ec63cbe9196f6d6e773260926d3fd37054eecd3e7c70beb1ed9ef1e2a68cf62c09fc3ad5ec5d45e9143ab4044275b2f"}"#;
        let event = Event::from_json_unverified(json).unwrap();
        assert!(event.tags.is_empty());
    }
}
