//! Upstream SSE client.
//!
//! An [`EventStreamClient`] opens one long-lived `GET` against an event-stream
//! endpoint and forwards every parsed event to a [`MessageSink`]. It never
//! reconnects on its own: when the stream ends it reports why and stops, and
//! the owner decides what happens next.
//!
//! # Examples
//!
//! ```rust,no_run
//! use pigeon::client::{ClientConfig, ClientMessage, EventStreamClient};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> pigeon::Result<()> {
//! let url = "https://example.com/events".parse().unwrap();
//! let client = EventStreamClient::new(url, ClientConfig::default())?;
//!
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! let handle = client.connect(1, tx);
//!
//! while let Some(message) = rx.recv().await {
//!     match message {
//!         ClientMessage::Event { event, .. } => println!("{:?}", event.payload()),
//!         ClientMessage::Closed { ended, .. } => {
//!             println!("stream ended: {:?}", ended);
//!             break;
//!         },
//!     }
//! }
//! handle.disconnect();
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, TransportError};
use crate::shared::http_constants::{
    ACCEPT, CACHE_CONTROL, LAST_EVENT_ID, NO_CACHE, TEXT_EVENT_STREAM,
};
use crate::shared::sse_parser::{parse_frame, FrameBuffer};
use crate::types::TextEvent;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

/// Configuration for an upstream client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Extra request headers, sent in order
    pub headers: Vec<(String, String)>,
    /// Resume point sent as `Last-Event-ID` when non-empty
    pub last_event_id: Option<String>,
    /// Timeout for establishing the TCP/TLS connection
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            last_event_id: None,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Add a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the resume point.
    pub fn with_last_event_id(mut self, id: Option<String>) -> Self {
        self.last_event_id = id;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Why a client stopped.
#[derive(Debug)]
pub enum Ended {
    /// [`ClientHandle::disconnect`] was called.
    Cancelled,
    /// The transport failed, or the server ended the stream.
    Failed(TransportError),
}

/// Messages emitted by a running client.
///
/// Every message carries the `session` number the client was started with,
/// so a receiver can drop messages from clients it has already replaced.
#[derive(Debug)]
pub enum ClientMessage {
    /// One parsed event, in stream order.
    Event {
        /// Session that produced the event
        session: u64,
        /// The event
        event: TextEvent,
    },
    /// The client stopped. Always the last message.
    Closed {
        /// Session that stopped
        session: u64,
        /// Why it stopped
        ended: Ended,
    },
}

impl ClientMessage {
    /// Session that produced this message.
    pub fn session(&self) -> u64 {
        match self {
            Self::Event { session, .. } | Self::Closed { session, .. } => *session,
        }
    }
}

/// Destination for client messages.
pub trait MessageSink: Send + Sync + 'static {
    /// Deliver one message. Returns `false` once the receiver is gone, which
    /// stops the client.
    fn deliver(&self, message: ClientMessage) -> bool;
}

impl MessageSink for mpsc::UnboundedSender<ClientMessage> {
    fn deliver(&self, message: ClientMessage) -> bool {
        self.send(message).is_ok()
    }
}

/// Client for one event-stream endpoint.
#[derive(Debug, Clone)]
pub struct EventStreamClient {
    url: Url,
    config: ClientConfig,
    http: reqwest::Client,
}

impl EventStreamClient {
    /// Create a client. Nothing is sent until [`connect`](Self::connect).
    pub fn new(url: Url, config: ClientConfig) -> Result<Self> {
        // No read timeout: event streams stay open indefinitely
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(TransportError::from)?;
        Ok(Self { url, config, http })
    }

    /// Endpoint URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open the stream in a background task.
    pub fn connect<S: MessageSink>(&self, session: u64, sink: S) -> ClientHandle {
        let cancel = CancellationToken::new();
        let last_event_id = Arc::new(Mutex::new(self.config.last_event_id.clone()));

        let task = tokio::spawn(run_client(
            self.clone(),
            session,
            sink,
            last_event_id.clone(),
            cancel.clone(),
        ));

        ClientHandle {
            session,
            cancel,
            last_event_id,
            task,
        }
    }

    fn request(&self, last_event_id: Option<&str>) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .get(self.url.clone())
            .header(ACCEPT, TEXT_EVENT_STREAM)
            .header(CACHE_CONTROL, NO_CACHE);
        if let Some(id) = last_event_id.filter(|id| !id.is_empty()) {
            request = request.header(LAST_EVENT_ID, id);
        }
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }
}

/// Handle to a running client.
///
/// Dropping the handle disconnects the client.
#[derive(Debug)]
pub struct ClientHandle {
    session: u64,
    cancel: CancellationToken,
    last_event_id: Arc<Mutex<Option<String>>>,
    task: JoinHandle<()>,
}

impl ClientHandle {
    /// Session number given to [`EventStreamClient::connect`].
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Cancel the in-flight request. The client reports
    /// [`Ended::Cancelled`] unless it had already stopped.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    /// Id of the most recent event, or the configured resume point.
    pub fn last_event_id(&self) -> Option<String> {
        self.last_event_id.lock().clone()
    }

    /// Whether the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_client<S: MessageSink>(
    client: EventStreamClient,
    session: u64,
    sink: S,
    last_event_id: Arc<Mutex<Option<String>>>,
    cancel: CancellationToken,
) {
    info!(session, url = %client.url, "Connecting to event stream");

    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => Some(Ended::Cancelled),
        result = stream_events(&client, session, &sink, &last_event_id) => match result {
            Ok(()) => None,
            Err(e) => Some(Ended::Failed(e)),
        },
    };

    match outcome {
        Some(ended) => {
            debug!(session, "Event stream closed: {:?}", ended);
            sink.deliver(ClientMessage::Closed { session, ended });
        },
        None => debug!(session, "Receiver gone, client stopped"),
    }
}

/// Read the stream until it fails or the sink goes away.
///
/// `Ok` means the receiver is gone. A stream that ends cleanly is reported as
/// [`TransportError::StreamEnded`].
async fn stream_events<S: MessageSink>(
    client: &EventStreamClient,
    session: u64,
    sink: &S,
    last_event_id: &Mutex<Option<String>>,
) -> std::result::Result<(), TransportError> {
    let resume = last_event_id.lock().clone();
    let response = client.request(resume.as_deref()).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status(status.as_u16()));
    }
    info!(session, "Event stream open ({})", status);

    let dispatch = |frame: &str| {
        let event = parse_frame(frame);
        let id = event.id().to_string();
        let delivered = sink.deliver(ClientMessage::Event { session, event });
        *last_event_id.lock() = Some(id);
        delivered
    };

    let mut buffer = FrameBuffer::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for frame in buffer.feed(&chunk) {
            if !dispatch(&frame) {
                return Ok(());
            }
        }
    }

    if let Some(frame) = buffer.flush() {
        if !dispatch(&frame) {
            return Ok(());
        }
    }

    Err(TransportError::StreamEnded)
}
