//! Named stream configurations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named stream the operator can connect to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamConnection {
    /// Stable identifier
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Stream URL
    pub url: String,
}

impl StreamConnection {
    /// Create a stream configuration with a fresh id.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            url: url.into(),
        }
    }
}
