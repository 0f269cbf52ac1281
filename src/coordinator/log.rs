//! Per-target event history.

use crate::types::TextEvent;
use indexmap::IndexMap;

/// Append-only event lists keyed by target.
///
/// Targets keep the order they were first seen in, and events keep arrival
/// order. Nothing is ever reordered or edited; [`clear`](Self::clear) empties
/// one target's list without forgetting the target.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    streams: IndexMap<String, Vec<TextEvent>>,
}

impl EventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a target has an entry, possibly empty.
    pub fn ensure(&mut self, key: &str) {
        if !self.streams.contains_key(key) {
            self.streams.insert(key.to_string(), Vec::new());
        }
    }

    /// Append an event to a target's list.
    pub fn append(&mut self, key: &str, event: TextEvent) {
        match self.streams.get_mut(key) {
            Some(events) => events.push(event),
            None => {
                self.streams.insert(key.to_string(), vec![event]);
            },
        }
    }

    /// Empty a target's list.
    pub fn clear(&mut self, key: &str) {
        if let Some(events) = self.streams.get_mut(key) {
            events.clear();
        }
    }

    /// Events for a target, filtered.
    ///
    /// `search` is a case-insensitive substring match on the payload; events
    /// without a payload never match a non-empty search. `kind` must match
    /// exactly. Both filters are optional.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use pigeon::coordinator::EventLog;
    /// use pigeon::types::TextEvent;
    ///
    /// let mut log = EventLog::new();
    /// log.append("t", TextEvent::new("", "message", Some("Hello".into())));
    /// log.append("t", TextEvent::new("", "ping", Some("hello again".into())));
    ///
    /// assert_eq!(log.events_for("t", Some("HELLO"), None).len(), 2);
    /// assert_eq!(log.events_for("t", Some("hello"), Some("ping")).len(), 1);
    /// assert!(log.events_for("unknown", None, None).is_empty());
    /// ```
    pub fn events_for(&self, key: &str, search: Option<&str>, kind: Option<&str>) -> Vec<TextEvent> {
        let Some(events) = self.streams.get(key) else {
            return Vec::new();
        };
        let search = search.filter(|s| !s.is_empty());

        events
            .iter()
            .filter(|event| search.is_none_or(|needle| event.payload_contains(needle)))
            .filter(|event| kind.is_none_or(|kind| event.kind() == kind))
            .cloned()
            .collect()
    }

    /// Number of events stored for a target.
    pub fn len(&self, key: &str) -> usize {
        self.streams.get(key).map_or(0, Vec::len)
    }

    /// Whether no target has been seen.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Known targets, in first-seen order.
    pub fn targets(&self) -> Vec<String> {
        self.streams.keys().cloned().collect()
    }
}
