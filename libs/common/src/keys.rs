//! Public and secret key parsing.
//!
//! Keys arrive from configuration either as 64-char hex or as bech32
//! (`npub1…` / `nsec1…`). Everything downstream works with lowercase hex
//! public keys and `secp256k1` secret keys.

use std::fmt;

use bech32::Hrp;
use secp256k1::SECP256K1;
use thiserror::Error;

const NPUB_HRP: &str = "npub";
const NSEC_HRP: &str = "nsec";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("bech32 decoding error: {0}")]
    Bech32(String),

    #[error("expected human-readable part {expected}, got {got}")]
    InvalidHrp { expected: String, got: String },

    #[error("invalid key format: {0}")]
    InvalidFormat(String),
}

// ---------------------------------------------------------------------------
// Public keys
// ---------------------------------------------------------------------------

/// An x-only public key, held as 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(String);

impl PublicKey {
    /// Parse a public key given as hex or `npub`.
    pub fn parse(input: &str) -> Result<Self, KeyError> {
        let input = input.trim();
        let bytes = if input.starts_with("npub1") {
            decode_bech32(NPUB_HRP, input)?
        } else {
            decode_hex32(input)?
        };
        secp256k1::XOnlyPublicKey::from_slice(&bytes)
            .map_err(|e| KeyError::InvalidFormat(e.to_string()))?;
        Ok(Self(hex::encode(bytes)))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Secret keys
// ---------------------------------------------------------------------------

/// A signing key. `Debug` never prints the key material.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(secp256k1::SecretKey);

impl SecretKey {
    /// Parse a secret key given as hex or `nsec`.
    pub fn parse(input: &str) -> Result<Self, KeyError> {
        let input = input.trim();
        let bytes = if input.starts_with("nsec1") {
            decode_bech32(NSEC_HRP, input)?
        } else {
            decode_hex32(input)?
        };
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        secp256k1::SecretKey::from_slice(bytes)
            .map(Self)
            .map_err(|e| KeyError::InvalidFormat(e.to_string()))
    }

    /// The x-only public key matching this secret.
    pub fn public_key(&self) -> PublicKey {
        let (xonly, _parity) = self.0.x_only_public_key(SECP256K1);
        PublicKey(hex::encode(xonly.serialize()))
    }

    pub(crate) fn keypair(&self) -> secp256k1::Keypair {
        secp256k1::Keypair::from_secret_key(SECP256K1, &self.0)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecretKey").field(&"<redacted>").finish()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn decode_hex32(input: &str) -> Result<[u8; 32], KeyError> {
    if input.len() != 64 {
        return Err(KeyError::InvalidFormat(format!(
            "expected 64 hex characters, got {}",
            input.len()
        )));
    }
    let mut out = [0u8; 32];
    hex::decode_to_slice(input, &mut out).map_err(|e| KeyError::InvalidFormat(e.to_string()))?;
    Ok(out)
}

fn decode_bech32(expected_hrp: &str, encoded: &str) -> Result<[u8; 32], KeyError> {
    let expected = Hrp::parse(expected_hrp).map_err(|e| KeyError::Bech32(e.to_string()))?;
    let (hrp, data) = bech32::decode(encoded).map_err(|e| KeyError::Bech32(e.to_string()))?;

    if hrp != expected {
        return Err(KeyError::InvalidHrp {
            expected: expected_hrp.to_string(),
            got: hrp.to_string(),
        });
    }

    data.as_slice().try_into().map_err(|_| {
        KeyError::InvalidFormat(format!("expected 32 bytes, got {}", data.len()))
    })
}
