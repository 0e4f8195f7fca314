//! Challenge/response authentication, in both directions.
//!
//! Downstream: when an allow-list is configured every client is challenged on
//! connect and may not publish or subscribe until it answers with a signed
//! kind-22242 event from an allowed key. Upstream: when we hold a secret for
//! the first allowed key, relays that challenge us get a signed answer.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use bouncer_common::id::prefix;
use bouncer_common::{Event, EventError, EventTemplate, PublicKey, SecretKey, AUTH_KIND};
use rand::Rng;
use thiserror::Error;

use crate::config::Config;

/// How far an AUTH event's `created_at` may drift from our clock.
pub const MAX_AUTH_SKEW_SECS: i64 = 10 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("no challenge was issued")]
    NoChallenge,

    #[error("expected kind 22242")]
    WrongKind,

    #[error("pubkey is not authorized")]
    NotAuthorized,

    #[error("challenge mismatch")]
    ChallengeMismatch,

    #[error("created_at is too far from now")]
    Expired,

    #[error("{0}")]
    BadProof(#[from] EventError),
}

/// Generate an opaque random token with the given prefix.
pub fn generate_opaque_token(prefix: &str, bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(&mut buf[..]);
    format!("{}_{}", prefix, URL_SAFE_NO_PAD.encode(&buf))
}

pub struct AuthGate {
    authorized_keys: Vec<PublicKey>,
    upstream_secret: Option<SecretKey>,
}

impl AuthGate {
    pub fn new(authorized_keys: Vec<PublicKey>, upstream_secret: Option<SecretKey>) -> Self {
        Self {
            authorized_keys,
            upstream_secret,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.authorized_keys.clone(),
            config.upstream_credentials().cloned(),
        )
    }

    /// Whether new sessions start unauthenticated.
    pub fn is_gated(&self) -> bool {
        !self.authorized_keys.is_empty()
    }

    /// A fresh single-use challenge, or `None` when gating is off.
    pub fn issue_challenge(&self) -> Option<String> {
        self.is_gated()
            .then(|| generate_opaque_token(prefix::CHALLENGE, 16))
    }

    /// Check a client's AUTH response against the challenge it was issued.
    pub fn verify(&self, challenge: Option<&str>, event: &Event) -> Result<PublicKey, AuthFailure> {
        self.verify_at(challenge, event, chrono::Utc::now().timestamp())
    }

    fn verify_at(
        &self,
        challenge: Option<&str>,
        event: &Event,
        now: i64,
    ) -> Result<PublicKey, AuthFailure> {
        let challenge = challenge.ok_or(AuthFailure::NoChallenge)?;
        if event.kind != AUTH_KIND {
            return Err(AuthFailure::WrongKind);
        }

        let pubkey = self
            .authorized_keys
            .iter()
            .find(|k| k.as_hex() == event.pubkey)
            .ok_or(AuthFailure::NotAuthorized)?;

        if event.tag_value("challenge") != Some(challenge) {
            return Err(AuthFailure::ChallengeMismatch);
        }
        if (event.created_at as i64 - now).abs() > MAX_AUTH_SKEW_SECS {
            return Err(AuthFailure::Expired);
        }

        event.verify()?;
        Ok(pubkey.clone())
    }

    /// Sign an answer to a relay's challenge. `None` when we hold no
    /// credentials.
    pub fn respond_upstream(
        &self,
        relay_url: &str,
        challenge: &str,
    ) -> Option<Result<Event, EventError>> {
        let secret = self.upstream_secret.as_ref()?;
        let template = EventTemplate {
            created_at: chrono::Utc::now().timestamp().max(0) as u64,
            kind: AUTH_KIND,
            tags: vec![
                vec!["relay".to_string(), relay_url.to_string()],
                vec!["challenge".to_string(), challenge.to_string()],
            ],
            content: String::new(),
        };
        Some(template.sign(secret))
    }
}
