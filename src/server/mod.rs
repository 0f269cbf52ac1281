//! Embedded HTTP server for the local ingest port.
//!
//! Other processes POST plain bodies to the ingest port, and browsers or other
//! SSE clients can subscribe to it as an event stream.

pub mod connection;
pub mod ingest;

pub use connection::{OutboundConnection, OutboundState};
pub use ingest::{
    Broadcaster, IngestConfig, IngestConfigBuilder, IngestHandler, IngestServer,
    CONNECTED_PAYLOAD,
};
