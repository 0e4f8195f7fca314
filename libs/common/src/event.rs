//! Signed event model, id hashing, validation and Schnorr signatures.

use secp256k1::{schnorr, Message, XOnlyPublicKey, SECP256K1};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::keys::SecretKey;

/// Kind reserved for authentication responses. Never publishable.
pub const AUTH_KIND: u16 = 22242;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("id does not match event contents")]
    IdMismatch,

    #[error("bad signature")]
    BadSignature,
}

/// A signed event as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

/// Everything needed to produce an [`Event`] except the signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl EventTemplate {
    /// Sign the template, filling in `pubkey`, `id` and `sig`.
    pub fn sign(self, secret: &SecretKey) -> Result<Event, EventError> {
        let pubkey = secret.public_key().as_hex().to_string();
        let digest = event_digest(&pubkey, self.created_at, self.kind, &self.tags, &self.content)?;

        let message = Message::from_digest(digest);
        let sig = SECP256K1.sign_schnorr_no_aux_rand(&message, &secret.keypair());

        Ok(Event {
            id: hex::encode(digest),
            pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: hex::encode(sig.serialize()),
        })
    }
}

impl Event {
    /// Structural check: lowercase hex id/pubkey/sig of the right lengths.
    pub fn validate(&self) -> Result<(), EventError> {
        check_hex("id", &self.id, 64)?;
        check_hex("pubkey", &self.pubkey, 64)?;
        check_hex("sig", &self.sig, 128)?;
        Ok(())
    }

    /// Recompute the id from the event contents.
    pub fn compute_id(&self) -> Result<String, EventError> {
        event_digest(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content)
            .map(hex::encode)
    }

    /// Full verification: structure, id hash and BIP-340 signature.
    pub fn verify(&self) -> Result<(), EventError> {
        self.validate()?;

        let digest = event_digest(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        if hex::encode(digest) != self.id {
            return Err(EventError::IdMismatch);
        }

        let pubkey_bytes = hex::decode(&self.pubkey).map_err(|e| invalid("pubkey", e))?;
        let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes).map_err(|e| invalid("pubkey", e))?;
        let sig_bytes = hex::decode(&self.sig).map_err(|e| invalid("sig", e))?;
        let sig = schnorr::Signature::from_slice(&sig_bytes).map_err(|e| invalid("sig", e))?;

        SECP256K1
            .verify_schnorr(&sig, &Message::from_digest(digest), &pubkey)
            .map_err(|_| EventError::BadSignature)
    }

    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// sha256 over `[0, pubkey, created_at, kind, tags, content]`.
fn event_digest(
    pubkey: &str,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> Result<[u8; 32], EventError> {
    let serialized = serde_json::to_string(&(0, pubkey, created_at, kind, tags, content))
        .map_err(|e| EventError::Serialization(e.to_string()))?;
    Ok(Sha256::digest(serialized.as_bytes()).into())
}

fn check_hex(field: &'static str, value: &str, len: usize) -> Result<(), EventError> {
    if value.len() != len {
        return Err(EventError::InvalidField {
            field,
            reason: format!("expected {len} characters, got {}", value.len()),
        });
    }
    if !value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(EventError::InvalidField {
            field,
            reason: "expected lowercase hex".to_string(),
        });
    }
    Ok(())
}

fn invalid(field: &'static str, err: impl std::fmt::Display) -> EventError {
    EventError::InvalidField {
        field,
        reason: err.to_string(),
    }
}
