//! Upstream-facing subscription keys: `client_id:sub_id`.
//!
//! Client ids never contain the separator; subscription ids may. Decoding
//! therefore splits on the first separator only.

pub const SEPARATOR: char = ':';

pub fn encode(client_id: &str, subscription_id: &str) -> String {
    debug_assert!(!client_id.contains(SEPARATOR));
    format!("{client_id}{SEPARATOR}{subscription_id}")
}

/// Split a key back into `(client_id, subscription_id)`. `None` for keys this
/// process did not produce.
pub fn decode(key: &str) -> Option<(&str, &str)> {
    key.split_once(SEPARATOR)
}
