//! Text events received from a stream.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Kind assigned to events without an `event:` line.
pub const DEFAULT_EVENT_KIND: &str = "message";

/// Kind assigned to events whose payload is a JSON object literal.
pub const SYSTEM_EVENT_KIND: &str = "system";

/// A single event received from an SSE stream or the ingest port.
///
/// Events are immutable once constructed. Use
/// [`parse_frame`](crate::shared::sse_parser::parse_frame) to build one from a
/// raw frame.
///
/// # Examples
///
/// ```rust
/// use pigeon::types::TextEvent;
///
/// let event = TextEvent::new("42", "tick", Some("hello".to_string()));
/// assert_eq!(event.id(), "42");
/// assert_eq!(event.kind(), "tick");
/// assert_eq!(event.payload(), Some("hello"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEvent {
    id: String,
    kind: String,
    payload: Option<String>,
    received_at: DateTime<Utc>,
}

impl TextEvent {
    /// Create an event stamped with the current time.
    pub fn new(id: impl Into<String>, kind: impl Into<String>, payload: Option<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload,
            received_at: Utc::now(),
        }
    }

    /// Opaque id from the `id:` line, empty when absent.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Event kind from the `event:` line.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Payload from the `data:` line.
    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// When the event was received.
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Decode the payload as JSON.
    ///
    /// Returns `None` when there is no payload or it does not decode into `T`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use pigeon::types::TextEvent;
    /// use serde_json::Value;
    ///
    /// let event = TextEvent::new("", "system", Some(r#"{"status":"connected"}"#.into()));
    /// let value: Value = event.decode().unwrap();
    /// assert_eq!(value["status"], "connected");
    /// ```
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        let payload = self.payload.as_deref()?;
        serde_json::from_str(payload).ok()
    }

    /// Case-insensitive substring match against the payload.
    ///
    /// An empty needle matches every event, including ones without payload.
    pub fn payload_contains(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return true;
        }
        let needle = needle.to_lowercase();
        self.payload
            .as_deref()
            .is_some_and(|payload| payload.to_lowercase().contains(&needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_search_is_case_insensitive() {
        let event = TextEvent::new("", DEFAULT_EVENT_KIND, Some("Hello World".into()));
        assert!(event.payload_contains("hello"));
        assert!(event.payload_contains("WORLD"));
        assert!(!event.payload_contains("bye"));
        assert!(event.payload_contains(""));
    }

    #[test]
    fn missing_payload_never_matches() {
        let event = TextEvent::new("", DEFAULT_EVENT_KIND, None);
        assert!(!event.payload_contains("x"));
        assert!(event.decode::<serde_json::Value>().is_none());
    }
}
