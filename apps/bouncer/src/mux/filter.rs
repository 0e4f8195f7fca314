//! The two filter fields the bouncer interprets itself: `limit` and `search`.
//! Everything else in a filter is passed through untouched.

use serde_json::Value;

/// What a filter's `limit` asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// No usable limit; wait for upstream EOSE.
    Unbounded,
    /// Less than one result requested; answer EOSE without asking upstream.
    Empty,
    /// End the initial backlog after this many unique events.
    Count(u64),
}

impl Limit {
    pub fn from_filter(filter: &Value) -> Self {
        match filter.get("limit").and_then(Value::as_f64) {
            Some(n) if n < 1.0 => Self::Empty,
            Some(n) => Self::Count(n.floor() as u64),
            None => Self::Unbounded,
        }
    }
}

/// Case-insensitive substring match against an event's `content`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    needle: String,
}

impl SearchFilter {
    pub fn from_filter(filter: &Value) -> Option<Self> {
        let needle = filter.get("search")?.as_str()?;
        if needle.is_empty() {
            return None;
        }
        Some(Self {
            needle: needle.to_lowercase(),
        })
    }

    pub fn matches(&self, event: &Value) -> bool {
        event
            .get("content")
            .and_then(Value::as_str)
            .is_some_and(|content| content.to_lowercase().contains(&self.needle))
    }
}
