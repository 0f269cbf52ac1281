//! Core data types for pigeon.
//!
//! This module contains the event, connection-state, target and stream
//! configuration types shared by the client, server and coordinator.

pub mod event;
pub mod state;
pub mod stream;
pub mod target;

// Re-export commonly used types
pub use event::{TextEvent, DEFAULT_EVENT_KIND, SYSTEM_EVENT_KIND};
pub use state::{ConnectionState, CoordinatorStatus};
pub use stream::StreamConnection;
pub use target::StreamTarget;
