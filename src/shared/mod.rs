//! Shared components used by both the upstream client and the ingest server.

pub mod http_constants;
pub mod http_message;
pub mod logging;
pub mod reconnect;
pub mod sse_parser;

// Re-export commonly used types
pub use http_message::{status_text, Headers, HttpRequest, HttpResponse, Parsed};
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use reconnect::{Backoff, ReconnectConfig, ReconnectTimer};
pub use sse_parser::{parse_frame, render_frame, split_frames, FrameBuffer};
