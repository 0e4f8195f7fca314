use std::path::PathBuf;
use std::time::Duration;

use bouncer_common::{PublicKey, SecretKey};

/// Default SQLite file used when storage is file-backed.
const DEFAULT_DB_PATH: &str = ".temporary.db";

/// Where the session tables live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    Memory,
    Disk(PathBuf),
}

/// Bouncer configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP/WebSocket server binds to.
    pub port: u16,
    /// Upstream relay URLs. Fixed for the lifetime of the process.
    pub relays: Vec<String>,
    /// Client public keys allowed through the gate. Empty disables gating.
    pub authorized_keys: Vec<PublicKey>,
    /// Secrets used to answer upstream AUTH challenges, keyed by public key.
    pub private_keys: Vec<(PublicKey, SecretKey)>,
    pub storage: StorageMode,
    /// Log relay connects/disconnects at info instead of debug.
    pub log_about_relays: bool,
    /// Fixed delay between an upstream closing and the next connect attempt.
    pub reconnect_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing or
    /// a key cannot be parsed.
    pub fn from_env() -> Self {
        let relays = parse_relays(&required_var("RELAYS"));
        if relays.is_empty() {
            panic!("RELAYS must name at least one relay");
        }

        let authorized_keys = optional_var("AUTHORIZED_KEYS")
            .map(|v| parse_public_keys(&v))
            .unwrap_or_default();

        let private_keys = optional_var("PRIVATE_KEYS")
            .map(|v| parse_private_keys(&v))
            .unwrap_or_default();

        let db_path = optional_var("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let storage = storage_mode(
            optional_var("TMP_STORE").as_deref(),
            optional_var("IN_MEMORY").is_some(),
            PathBuf::from(db_path),
        );

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            relays,
            authorized_keys,
            private_keys,
            storage,
            log_about_relays: optional_var("LOG_ABOUT_RELAYS").is_some_and(|v| is_truthy(&v)),
            reconnect_delay: Duration::from_millis(
                std::env::var("RECONNECT_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5000),
            ),
        }
    }

    /// Minimal in-memory config for the given relays. Used by tests and tools.
    pub fn for_relays(relays: Vec<String>) -> Self {
        Self {
            port: 0,
            relays,
            authorized_keys: Vec::new(),
            private_keys: Vec::new(),
            storage: StorageMode::Memory,
            log_about_relays: false,
            reconnect_delay: Duration::from_secs(5),
        }
    }

    /// Secret for the key used when an upstream challenges us: the first
    /// authorized key, if a secret was configured for it.
    pub fn upstream_credentials(&self) -> Option<&SecretKey> {
        let first = self.authorized_keys.first()?;
        self.private_keys
            .iter()
            .find(|(pubkey, _)| pubkey == first)
            .map(|(_, secret)| secret)
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn is_truthy(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "0" | "false" | "no" | "off")
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Comma-separated relay URLs, duplicates removed, order kept.
pub fn parse_relays(raw: &str) -> Vec<String> {
    let mut relays: Vec<String> = Vec::new();
    for url in split_list(raw) {
        if !relays.iter().any(|r| r == url) {
            relays.push(url.to_string());
        }
    }
    relays
}

pub fn parse_public_keys(raw: &str) -> Vec<PublicKey> {
    split_list(raw)
        .map(|k| {
            PublicKey::parse(k)
                .unwrap_or_else(|e| panic!("invalid key {k} in AUTHORIZED_KEYS: {e}"))
        })
        .collect()
}

/// `pubkey=secret` pairs.
pub fn parse_private_keys(raw: &str) -> Vec<(PublicKey, SecretKey)> {
    split_list(raw)
        .map(|pair| {
            let (pubkey, secret) = pair
                .split_once('=')
                .unwrap_or_else(|| panic!("PRIVATE_KEYS entry {pair} must be pubkey=secret"));
            let pubkey = PublicKey::parse(pubkey)
                .unwrap_or_else(|e| panic!("invalid public key {pubkey} in PRIVATE_KEYS: {e}"));
            let secret = SecretKey::parse(secret)
                .unwrap_or_else(|e| panic!("invalid secret for {pubkey} in PRIVATE_KEYS: {e}"));
            if secret.public_key() != pubkey {
                panic!("PRIVATE_KEYS secret does not match {pubkey}");
            }
            (pubkey, secret)
        })
        .collect()
}

fn storage_mode(tmp_store: Option<&str>, in_memory: bool, db_path: PathBuf) -> StorageMode {
    if in_memory {
        return StorageMode::Memory;
    }
    match tmp_store {
        Some("disk") => StorageMode::Disk(db_path),
        _ => StorageMode::Memory,
    }
}
