//! Constants for HTTP headers, content types and ports used by pigeon.

// Ports
/// Default port of the local ingest server
pub const DEFAULT_INGEST_PORT: u16 = 8787;

// Header Names
/// SSE Last-Event-ID header name for resumption
pub const LAST_EVENT_ID: &str = "Last-Event-ID";

/// HTTP Accept header name
pub const ACCEPT: &str = "Accept";

/// HTTP Content-Type header name
pub const CONTENT_TYPE: &str = "Content-Type";

/// HTTP Content-Length header name
pub const CONTENT_LENGTH: &str = "Content-Length";

/// HTTP Cache-Control header name
pub const CACHE_CONTROL: &str = "Cache-Control";

/// HTTP Connection header name
pub const CONNECTION: &str = "Connection";

/// Header that sets the kind of a POSTed event
pub const X_EVENT_TYPE: &str = "X-Event-Type";

/// CORS allowed origin header name
pub const ACCESS_CONTROL_ALLOW_ORIGIN: &str = "Access-Control-Allow-Origin";

/// CORS allowed methods header name
pub const ACCESS_CONTROL_ALLOW_METHODS: &str = "Access-Control-Allow-Methods";

/// CORS allowed headers header name
pub const ACCESS_CONTROL_ALLOW_HEADERS: &str = "Access-Control-Allow-Headers";

// Header Values
/// Server-Sent Events content type value
pub const TEXT_EVENT_STREAM: &str = "text/event-stream";

/// JSON content type value
pub const APPLICATION_JSON: &str = "application/json";

/// Cache-Control value for event streams
pub const NO_CACHE: &str = "no-cache";

/// Connection value for event streams
pub const KEEP_ALIVE: &str = "keep-alive";

/// CORS origin value
pub const CORS_ALLOW_ORIGIN: &str = "*";

/// CORS methods value
pub const CORS_ALLOW_METHODS: &str = "GET, POST, OPTIONS";

/// CORS headers value
pub const CORS_ALLOW_HEADERS: &str = "Content-Type, X-Event-Type";

/// HTTP version written on every response
pub const HTTP_VERSION: &str = "HTTP/1.1";
