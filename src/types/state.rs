//! Connection state published by the coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinator-wide connection state.
///
/// Exactly one value is current at a time, and only the coordinator moves
/// between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected and not attempting to connect.
    Disconnected,

    /// A connection was requested and no event has arrived yet.
    Connecting,

    /// At least one event arrived on the current connection.
    Connected,

    /// Waiting for back-off before the given attempt.
    Reconnecting {
        /// One-based attempt counter.
        attempt: u32,
    },

    /// Reconnect budget exhausted; waits for a manual connect.
    Failed {
        /// Last error message.
        reason: String,
    },
}

impl ConnectionState {
    /// Whether events are currently flowing.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            Self::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Snapshot of the coordinator observed by the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    /// Key of the active target, if any.
    pub target: Option<String>,
    /// Current connection state.
    pub state: ConnectionState,
    /// Last upstream error message.
    pub last_error: Option<String>,
    /// Non-fatal warning, e.g. the ingest port could not be bound.
    pub warning: Option<String>,
}
