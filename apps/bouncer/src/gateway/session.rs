//! Per-connection client state.

use bouncer_common::PublicKey;
use serde_json::Value;
use tokio::sync::mpsc;

use super::auth::AuthGate;
use super::frames::Outbound;

/// State for a single downstream WebSocket connection.
pub struct ClientSession {
    /// Process-unique identifier (`cl_` prefixed ULID).
    pub client_id: String,
    /// Remote address, for logs.
    pub peer: String,
    authorized: bool,
    /// Outstanding challenge. Cleared once answered successfully.
    challenge: Option<String>,
    pubkey: Option<PublicKey>,
    outbound: mpsc::UnboundedSender<String>,
}

impl ClientSession {
    /// Start a session. When the gate is active the session begins
    /// unauthenticated and the challenge frame is queued immediately.
    pub fn new(
        client_id: String,
        peer: String,
        outbound: mpsc::UnboundedSender<String>,
        gate: &AuthGate,
    ) -> Self {
        let challenge = gate.issue_challenge();
        let session = Self {
            client_id,
            peer,
            authorized: challenge.is_none(),
            challenge,
            pubkey: None,
            outbound,
        };
        if let Some(challenge) = &session.challenge {
            session.send(&Outbound::auth_challenge(challenge));
        }
        session
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    pub fn challenge(&self) -> Option<&str> {
        self.challenge.as_deref()
    }

    pub fn pubkey(&self) -> Option<&PublicKey> {
        self.pubkey.as_ref()
    }

    pub fn authenticate(&mut self, pubkey: PublicKey) {
        self.authorized = true;
        self.challenge = None;
        self.pubkey = Some(pubkey);
    }

    /// Queue a frame for this client. Returns `false` once the connection is
    /// gone.
    pub fn send(&self, frame: &Value) -> bool {
        self.outbound.send(frame.to_string()).is_ok()
    }
}
