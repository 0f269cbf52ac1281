//! Local ingest server.
//!
//! Listens on a local port and serves three kinds of request:
//!
//! - `OPTIONS`: CORS preflight, answered with `200` and the CORS headers.
//! - `POST`: a plain body handed to the [`IngestHandler`], whose response is
//!   written back before the connection closes.
//! - `GET` with `Accept: text/event-stream`: an event-stream subscription. The
//!   connection joins the broadcast set until the peer goes away.
//!
//! Everything else gets `404 Not Found`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use pigeon::server::{IngestConfig, IngestHandler, IngestServer};
//! use pigeon::shared::{HttpRequest, HttpResponse};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl IngestHandler for Echo {
//!     async fn on_request(&self, request: HttpRequest) -> HttpResponse {
//!         HttpResponse::ok(Some(request.body)).with_cors()
//!     }
//! }
//!
//! # async fn example() -> pigeon::Result<()> {
//! let server = IngestServer::start(IngestConfig::default(), Arc::new(Echo)).await?;
//! println!("listening on {}", server.local_addr());
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::server::connection::OutboundConnection;
use crate::shared::http_constants::DEFAULT_INGEST_PORT;
use crate::shared::http_message::{HttpRequest, HttpResponse, Parsed};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Payload sent to every new subscriber by the default handler.
pub const CONNECTED_PAYLOAD: &str = r#"{"status":"connected"}"#;

const READ_CHUNK: usize = 8 * 1024;

/// Configuration for the ingest server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Address to bind to
    pub bind_addr: IpAddr,
    /// Port to listen on, `0` for an ephemeral port
    pub port: u16,
    /// Largest request accepted before answering `400`
    pub max_request_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_INGEST_PORT,
            max_request_bytes: 1024 * 1024, // 1MB
        }
    }
}

impl IngestConfig {
    /// Create a builder with default configuration.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::new()
    }

    /// Address the listener binds.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug, Default)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    pub fn bind_addr(mut self, addr: IpAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the request size limit.
    pub fn max_request_bytes(mut self, limit: usize) -> Self {
        self.config.max_request_bytes = limit;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> IngestConfig {
        self.config
    }
}

/// Observer for ingest traffic.
///
/// Implementations must not own whatever owns the server; hand them a channel
/// sender instead.
#[async_trait]
pub trait IngestHandler: Send + Sync {
    /// Handle a `POST`. The returned response is written before the
    /// connection closes.
    async fn on_request(&self, request: HttpRequest) -> HttpResponse;

    /// A subscriber joined the broadcast set.
    ///
    /// The default greets it with [`CONNECTED_PAYLOAD`].
    async fn on_client_connected(&self, connection: &OutboundConnection) {
        connection.send_event(CONNECTED_PAYLOAD, None, None);
    }

    /// A subscriber left the broadcast set.
    async fn on_client_disconnected(&self, _id: Uuid) {}
}

/// The set of live event-stream subscribers.
///
/// Cheap to clone; clones share the same set. A relay handler can hold one
/// to rebroadcast what it receives.
#[derive(Debug, Clone, Default)]
pub struct Broadcaster {
    clients: Arc<DashMap<Uuid, OutboundConnection>>,
}

impl Broadcaster {
    /// Create an empty subscriber set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Send one event to every open subscriber.
    ///
    /// Returns how many subscribers it was handed to. A dead subscriber is
    /// skipped without affecting the rest.
    pub fn broadcast(&self, kind: Option<&str>, payload: &str, id: Option<&str>) -> usize {
        let mut delivered = 0;
        for entry in self.clients.iter() {
            let connection = entry.value();
            if connection.is_closed() {
                continue;
            }
            connection.send_event(payload, kind, id);
            delivered += 1;
        }
        debug!(delivered, "Broadcast event");
        delivered
    }

    /// Number of registered subscribers.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn register(&self, connection: OutboundConnection) {
        self.clients.insert(connection.id(), connection);
    }

    fn deregister(&self, id: &Uuid) {
        self.clients.remove(id);
    }
}

/// A running ingest server.
///
/// Dropping the server stops the listener; existing subscribers keep their
/// connections until the peer goes away.
pub struct IngestServer {
    local_addr: SocketAddr,
    broadcaster: Broadcaster,
    shutdown: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

struct Dispatch {
    handler: Arc<dyn IngestHandler>,
    broadcaster: Broadcaster,
    max_request_bytes: usize,
}

enum ReadOutcome {
    Request(HttpRequest),
    PeerClosed,
    TooLarge,
}

impl IngestServer {
    /// Bind the listener and start accepting connections.
    pub async fn start(config: IngestConfig, handler: Arc<dyn IngestHandler>) -> Result<Self> {
        Self::start_with_broadcaster(config, handler, Broadcaster::new()).await
    }

    /// Like [`start`](Self::start), registering subscribers in an existing
    /// set.
    pub async fn start_with_broadcaster(
        config: IngestConfig,
        handler: Arc<dyn IngestHandler>,
        broadcaster: Broadcaster,
    ) -> Result<Self> {
        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::bind(addr, e))?;
        let local_addr = listener.local_addr()?;
        info!("Ingest server listening on {}", local_addr);

        let shutdown = CancellationToken::new();
        let dispatch = Arc::new(Dispatch {
            handler,
            broadcaster: broadcaster.clone(),
            max_request_bytes: config.max_request_bytes,
        });
        let accept_task = tokio::spawn(accept_loop(listener, dispatch, shutdown.clone()));

        Ok(Self {
            local_addr,
            broadcaster,
            shutdown,
            accept_task: Some(accept_task),
        })
    }

    /// The bound address, with the real port when `0` was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send one event to every subscriber. Returns the delivery count.
    pub fn broadcast(&self, kind: Option<&str>, payload: &str, id: Option<&str>) -> usize {
        self.broadcaster.broadcast(kind, payload, id)
    }

    /// Number of registered subscribers.
    pub fn client_count(&self) -> usize {
        self.broadcaster.client_count()
    }

    /// The subscriber set.
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Stop accepting and release the port.
    ///
    /// Returns once the listener is closed, so the port can be bound again.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
            info!("Ingest server on {} stopped", self.local_addr);
        }
    }
}

impl Drop for IngestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for IngestServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestServer")
            .field("local_addr", &self.local_addr)
            .field("clients", &self.client_count())
            .field("running", &!self.shutdown.is_cancelled())
            .finish()
    }
}

async fn accept_loop(listener: TcpListener, dispatch: Arc<Dispatch>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted ingest connection from {}", peer);
                    tokio::spawn(handle_connection(stream, dispatch.clone()));
                },
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                },
            },
        }
    }
}

async fn handle_connection(stream: TcpStream, dispatch: Arc<Dispatch>) {
    let (mut reader, writer) = stream.into_split();
    let connection = OutboundConnection::spawn(writer);

    let request = match read_request(&mut reader, dispatch.max_request_bytes).await {
        Ok(ReadOutcome::Request(request)) => request,
        Ok(ReadOutcome::PeerClosed) => {
            debug!("Peer closed before completing a request");
            connection.close();
            return;
        },
        Ok(ReadOutcome::TooLarge) => {
            debug!(limit = dispatch.max_request_bytes, "Rejecting oversized request");
            connection.send_response(&HttpResponse::bad_request("Request too large").with_cors());
            return;
        },
        Err(e) => {
            debug!("Dropping unreadable request: {}", e);
            connection.close();
            return;
        },
    };

    debug!(method = %request.method, path = %request.path, "Ingest request");
    match request.method.as_str() {
        "OPTIONS" => connection.send_response(&HttpResponse::ok(None).with_cors()),
        "GET" if request.accepts_event_stream() => {
            subscribe(reader, connection, &dispatch).await;
        },
        "POST" => {
            let response = dispatch.handler.on_request(request).await;
            connection.send_response(&response);
        },
        _ => connection.send_response(&HttpResponse::not_found()),
    }
}

async fn subscribe<R>(mut reader: R, connection: OutboundConnection, dispatch: &Dispatch)
where
    R: AsyncRead + Unpin,
{
    let id = connection.id();
    connection.upgrade();
    dispatch.broadcaster.register(connection.clone());
    info!(connection = %id, "Subscriber connected");
    dispatch.handler.on_client_connected(&connection).await;

    // Subscribers never send anything meaningful; we only watch for EOF.
    let mut sink = [0u8; 512];
    loop {
        tokio::select! {
            () = connection.closed() => break,
            read = reader.read(&mut sink) => match read {
                Ok(0) | Err(_) => break,
                Ok(_) => {},
            },
        }
    }

    connection.close();
    dispatch.broadcaster.deregister(&id);
    info!(connection = %id, "Subscriber disconnected");
    dispatch.handler.on_client_disconnected(id).await;
}

async fn read_request<R>(reader: &mut R, limit: usize) -> Result<ReadOutcome>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(ReadOutcome::PeerClosed);
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.len() > limit {
            return Ok(ReadOutcome::TooLarge);
        }
        if let Parsed::Complete(request) = HttpRequest::parse(&buffer)? {
            return Ok(ReadOutcome::Request(request));
        }
    }
}
