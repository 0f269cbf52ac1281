//! # pigeon
//!
//! Watch live Server-Sent Events feeds.
//!
//! A feed comes from a remote SSE endpoint or from a local ingest port that
//! other processes can `POST` plain bodies to. This crate provides:
//! - An SSE frame codec and a minimal HTTP/1.1 codec
//! - An upstream SSE client with `Last-Event-ID` resumption
//! - A local ingest server that accepts `POST`s and serves SSE subscribers
//! - A coordinator that owns one active target, keeps per-target event logs,
//!   and reconnects with exponential back-off
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pigeon::Coordinator;
//!
//! # async fn example() -> pigeon::Result<()> {
//! let coordinator = Coordinator::builder().spawn();
//! coordinator.connect("https://consoledump.io/api/sse?id=31b2fe").await?;
//!
//! let mut feed = coordinator.event_feed();
//! while let Ok(logged) = feed.recv().await {
//!     println!("[{}] {:?}", logged.event.kind(), logged.event.payload());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Local ingest
//!
//! Connecting to a `localhost` URL also starts the ingest server, so any
//! process can push events with a plain `POST`:
//!
//! ```text
//! curl -X POST -H 'X-Event-Type: deploy' -d 'build 42 shipped' http://localhost:8787/
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
// Allow certain clippy lints that are too pedantic for this codebase
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::result_large_err)]

pub mod client;
pub mod coordinator;
pub mod error;
pub mod server;
pub mod shared;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use client::{ClientConfig, ClientHandle, ClientMessage, Ended, EventStreamClient};
pub use coordinator::{
    Coordinator, CoordinatorBuilder, CoordinatorConfig, CoordinatorHandle, EventLog, LoggedEvent,
};
pub use error::{Error, Result, TransportError};
pub use server::{IngestConfig, IngestHandler, IngestServer, OutboundConnection};
pub use shared::{
    http_constants::DEFAULT_INGEST_PORT, parse_frame, render_frame, split_frames, FrameBuffer,
    HttpRequest, HttpResponse, ReconnectConfig,
};
pub use store::StreamStore;
pub use types::{ConnectionState, CoordinatorStatus, StreamConnection, StreamTarget, TextEvent};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
