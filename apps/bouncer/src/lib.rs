pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod mux;
pub mod routes;
pub mod upstream;

use std::sync::Arc;

use config::Config;
use error::StoreError;
use gateway::auth::AuthGate;
use gateway::registry::SessionRegistry;
use mux::Multiplexer;

/// Shared application state available to every connection.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub mux: Arc<Multiplexer>,
    pub sessions: Arc<SessionRegistry>,
    pub gate: Arc<AuthGate>,
}

impl AppState {
    /// Open the configured session store and wire up the shared services.
    pub fn new(config: Config) -> Result<Self, StoreError> {
        let store = db::open(&config.storage)?;
        let sessions = Arc::new(SessionRegistry::new());
        let mux = Arc::new(Multiplexer::new(store, sessions.clone(), config.relays.len()));
        let gate = Arc::new(AuthGate::from_config(&config));

        Ok(Self {
            config: Arc::new(config),
            mux,
            sessions,
            gate,
        })
    }
}
