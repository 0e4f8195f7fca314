//! Wire frames: ordered JSON arrays tagged by their first element.
//!
//! Inbound frames are decoded once into [`ClientFrame`] / [`RelayFrame`];
//! nothing past this module touches raw arrays.

use bouncer_common::Event;
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::ProxyError;

// ---------------------------------------------------------------------------
// Client → bouncer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// `["EVENT", event]`, structurally valid.
    Event(Event),
    /// `["REQ", sub_id, filter, ...]`, every filter an object.
    Req {
        subscription_id: String,
        filters: Vec<Value>,
    },
    /// `["CLOSE", sub_id]`
    Close { subscription_id: String },
    /// `["AUTH", signed_event]`
    Auth(Event),
    /// Anything else that parsed as JSON. Carries the tag for logging.
    Unknown(String),
}

impl ClientFrame {
    /// Decode a text message from a client. The error is the exact reply to
    /// send back.
    pub fn decode(text: &str) -> Result<Self, ProxyError> {
        let value: Value = serde_json::from_str(text).map_err(|_| ProxyError::bad_json())?;

        let Some(items) = value.as_array() else {
            return Ok(Self::Unknown(value.to_string()));
        };
        let tag = items.first().and_then(Value::as_str).unwrap_or_default();

        match tag {
            "EVENT" => decode_event(items.get(1))
                .map(Self::Event)
                .ok_or_else(ProxyError::invalid_event),
            "REQ" => {
                if items.len() < 3 {
                    return Err(ProxyError::bad_request());
                }
                let filters = &items[2..];
                if !filters.iter().all(Value::is_object) {
                    return Err(ProxyError::filter_not_object());
                }
                let subscription_id = items[1]
                    .as_str()
                    .ok_or_else(ProxyError::bad_request)?
                    .to_string();
                Ok(Self::Req {
                    subscription_id,
                    filters: filters.to_vec(),
                })
            }
            "CLOSE" => match items.get(1).and_then(Value::as_str) {
                Some(id) => Ok(Self::Close {
                    subscription_id: id.to_string(),
                }),
                None => Err(ProxyError::bad_request()),
            },
            "AUTH" => decode_event(items.get(1))
                .map(Self::Auth)
                .ok_or_else(ProxyError::invalid_event),
            other => Ok(Self::Unknown(other.to_string())),
        }
    }
}

fn decode_event(value: Option<&Value>) -> Option<Event> {
    let event: Event = serde_json::from_value(value?.clone()).ok()?;
    event.validate().ok()?;
    Some(event)
}

// ---------------------------------------------------------------------------
// Relay → bouncer
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a tagged array")]
    NotTagged,

    #[error("malformed {tag} frame")]
    Malformed { tag: &'static str },

    #[error("unrecognized frame {0}")]
    Unrecognized(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayFrame {
    /// `["EVENT", key, event]`. The event passes through untouched; only its
    /// `id` is required.
    Event {
        subscription_id: String,
        event_id: String,
        event: Value,
    },
    Eose { subscription_id: String },
    Auth { challenge: String },
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    Notice { message: String },
    Closed {
        subscription_id: String,
        message: String,
    },
}

impl RelayFrame {
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let items = value.as_array().ok_or(FrameError::NotTagged)?;
        let tag = items
            .first()
            .and_then(Value::as_str)
            .ok_or(FrameError::NotTagged)?;
        let string_at = |i: usize| items.get(i).and_then(Value::as_str).map(str::to_string);

        match tag {
            "EVENT" => {
                let malformed = FrameError::Malformed { tag: "EVENT" };
                let subscription_id = string_at(1).ok_or(malformed)?;
                let event = items
                    .get(2)
                    .filter(|e| e.is_object())
                    .cloned()
                    .ok_or(FrameError::Malformed { tag: "EVENT" })?;
                let event_id = event
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or(FrameError::Malformed { tag: "EVENT" })?;
                Ok(Self::Event {
                    subscription_id,
                    event_id,
                    event,
                })
            }
            "EOSE" => Ok(Self::Eose {
                subscription_id: string_at(1).ok_or(FrameError::Malformed { tag: "EOSE" })?,
            }),
            "AUTH" => Ok(Self::Auth {
                challenge: string_at(1).ok_or(FrameError::Malformed { tag: "AUTH" })?,
            }),
            "OK" => Ok(Self::Ok {
                event_id: string_at(1).ok_or(FrameError::Malformed { tag: "OK" })?,
                accepted: items.get(2).and_then(Value::as_bool).unwrap_or(false),
                message: string_at(3).unwrap_or_default(),
            }),
            "NOTICE" => Ok(Self::Notice {
                message: string_at(1).unwrap_or_default(),
            }),
            "CLOSED" => Ok(Self::Closed {
                subscription_id: string_at(1).ok_or(FrameError::Malformed { tag: "CLOSED" })?,
                message: string_at(2).unwrap_or_default(),
            }),
            other => Err(FrameError::Unrecognized(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound builders
// ---------------------------------------------------------------------------

/// Builders for every frame the bouncer sends, in either direction.
pub struct Outbound;

impl Outbound {
    pub fn notice(message: &str) -> Value {
        json!(["NOTICE", message])
    }

    pub fn ok(event_id: &str, accepted: bool, message: &str) -> Value {
        json!(["OK", event_id, accepted, message])
    }

    pub fn eose(subscription_id: &str) -> Value {
        json!(["EOSE", subscription_id])
    }

    /// A matched result, addressed to a client subscription.
    pub fn event(subscription_id: &str, event: &Value) -> Value {
        json!(["EVENT", subscription_id, event])
    }

    /// A client write, as forwarded to relays.
    pub fn publish(event: &Event) -> Value {
        json!(["EVENT", event])
    }

    pub fn req(subscription_id: &str, filters: &[Value]) -> Value {
        let mut frame = Vec::with_capacity(filters.len() + 2);
        frame.push(json!("REQ"));
        frame.push(json!(subscription_id));
        frame.extend(filters.iter().cloned());
        Value::Array(frame)
    }

    pub fn close(subscription_id: &str) -> Value {
        json!(["CLOSE", subscription_id])
    }

    pub fn auth_challenge(challenge: &str) -> Value {
        json!(["AUTH", challenge])
    }

    pub fn auth_response(event: &Event) -> Value {
        json!(["AUTH", event])
    }
}
