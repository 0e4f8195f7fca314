use serde_json::Value;
use thiserror::Error;

use crate::gateway::frames::Outbound;

/// How a rejection is surfaced to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// `["NOTICE", message]`
    Notice,
    /// `["OK", event_id, false, message]`
    Ok { event_id: String },
}

/// Client-visible error. Every variant renders to exactly one frame and never
/// closes the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyError {
    pub rejection: Rejection,
    pub message: String,
}

impl ProxyError {
    pub fn notice(message: impl Into<String>) -> Self {
        Self {
            rejection: Rejection::Notice,
            message: message.into(),
        }
    }

    pub fn rejected(event_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rejection: Rejection::Ok {
                event_id: event_id.into(),
            },
            message: message.into(),
        }
    }

    pub fn bad_json() -> Self {
        Self::notice("error: bad JSON.")
    }

    pub fn bad_request() -> Self {
        Self::notice("error: bad request.")
    }

    pub fn invalid_event() -> Self {
        Self::notice("error: invalid event")
    }

    pub fn filter_not_object() -> Self {
        Self::notice("expected filter to be obj, instead gives the otherwise.")
    }

    pub fn unauthorized() -> Self {
        Self::notice("unauthorized.")
    }

    pub fn unrecognized() -> Self {
        Self::notice("error: unrecognized command.")
    }

    pub fn internal() -> Self {
        Self::notice("error: internal error.")
    }

    /// Render as the downstream wire frame.
    pub fn into_frame(self) -> Value {
        match self.rejection {
            Rejection::Notice => Outbound::notice(&self.message),
            Rejection::Ok { event_id } => Outbound::ok(&event_id, false, &self.message),
        }
    }
}

impl From<StoreError> for ProxyError {
    fn from(_: StoreError) -> Self {
        Self::internal()
    }
}

/// Failure in a session-table backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        tracing::error!(?err, "database error");
        Self::Sqlite(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!(?err, "stored filter is not valid JSON");
        Self::Corrupt(err.to_string())
    }
}
