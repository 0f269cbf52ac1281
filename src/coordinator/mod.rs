//! Connection coordinator.
//!
//! The coordinator owns the single active stream target. It starts and stops
//! the upstream client and, for local targets, the ingest server; keeps the
//! per-target event logs; and runs the reconnect state machine.
//!
//! It runs as an actor task. A [`CoordinatorHandle`] sends it commands, and
//! the network components it starts report back over one internal channel.
//! Every message from a client, ingest server or timer is tagged with the
//! session or generation that started it, so anything from a superseded
//! connection is dropped.
//!
//! # Examples
//!
//! ```rust,no_run
//! use pigeon::coordinator::Coordinator;
//!
//! # async fn example() -> pigeon::Result<()> {
//! let coordinator = Coordinator::builder().ingest_port(8787).spawn();
//! coordinator.connect("http://localhost:8787/").await?;
//!
//! let mut status = coordinator.subscribe();
//! while status.changed().await.is_ok() {
//!     println!("{}", status.borrow().state);
//! }
//! # Ok(())
//! # }
//! ```

pub mod log;

pub use log::EventLog;

use crate::client::{
    ClientConfig, ClientHandle, ClientMessage, Ended, EventStreamClient, MessageSink,
};
use crate::error::{Error, Result};
use crate::server::ingest::{IngestConfig, IngestHandler, IngestServer};
use crate::server::OutboundConnection;
use crate::shared::http_constants::X_EVENT_TYPE;
use crate::shared::http_message::{HttpRequest, HttpResponse};
use crate::shared::reconnect::{Backoff, ReconnectConfig, ReconnectTimer};
use crate::shared::sse_parser::parse_frame;
use crate::types::{ConnectionState, CoordinatorStatus, StreamTarget, TextEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

const EVENT_FEED_CAPACITY: usize = 1024;

/// Coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Ingest server settings, used for local targets
    pub ingest: IngestConfig,
    /// Back-off settings
    pub reconnect: ReconnectConfig,
    /// Extra headers sent with every upstream request
    pub client_headers: Vec<(String, String)>,
    /// Upstream connect timeout
    pub connect_timeout: Duration,
    /// Capacity of the command channel
    pub channel_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ingest: IngestConfig::default(),
            reconnect: ReconnectConfig::default(),
            client_headers: Vec::new(),
            connect_timeout: Duration::from_secs(30),
            channel_capacity: 64,
        }
    }
}

/// Builder for a coordinator.
#[derive(Debug, Default)]
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
}

impl CoordinatorBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ingest server configuration.
    pub fn ingest(mut self, ingest: IngestConfig) -> Self {
        self.config.ingest = ingest;
        self
    }

    /// Set the ingest port.
    pub fn ingest_port(mut self, port: u16) -> Self {
        self.config.ingest.port = port;
        self
    }

    /// Set the back-off configuration.
    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.config.reconnect = reconnect;
        self
    }

    /// Add a header sent with every upstream request.
    pub fn client_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.client_headers.push((name.into(), value.into()));
        self
    }

    /// Set the upstream connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the command channel capacity.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity.max(1);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> CoordinatorConfig {
        self.config
    }

    /// Spawn a coordinator with this configuration.
    pub fn spawn(self) -> CoordinatorHandle {
        Coordinator::spawn(self.config)
    }
}

/// An event as it was appended to a target's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggedEvent {
    /// Log key of the target
    pub target: String,
    /// The event
    pub event: TextEvent,
}

enum Command {
    Connect {
        url: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    EventsFor {
        url: String,
        search: Option<String>,
        kind: Option<String>,
        reply: oneshot::Sender<Vec<TextEvent>>,
    },
    Clear {
        url: String,
        reply: oneshot::Sender<()>,
    },
    Targets {
        reply: oneshot::Sender<Vec<String>>,
    },
    Broadcast {
        kind: Option<String>,
        payload: String,
        id: Option<String>,
        reply: oneshot::Sender<usize>,
    },
    IngestAddr {
        reply: oneshot::Sender<Option<SocketAddr>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug)]
enum Internal {
    Client(ClientMessage),
    Posted { generation: u64, event: TextEvent },
    TimerFired { generation: u64, timer: u64 },
}

/// Routes client messages into the coordinator's internal channel.
struct ClientBridge(mpsc::UnboundedSender<Internal>);

impl MessageSink for ClientBridge {
    fn deliver(&self, message: ClientMessage) -> bool {
        self.0.send(Internal::Client(message)).is_ok()
    }
}

/// Ingest handler that forwards POSTed bodies to the coordinator.
struct IngestBridge {
    generation: u64,
    internal: mpsc::UnboundedSender<Internal>,
}

impl IngestBridge {
    /// Turn a POST into an event.
    ///
    /// The body becomes the payload of a `data:` line, with the kind taken
    /// from `X-Event-Type` when present. Empty bodies yield nothing.
    fn event_from(request: &HttpRequest) -> Option<TextEvent> {
        if request.body.is_empty() {
            return None;
        }
        let frame = match request.headers.get(X_EVENT_TYPE) {
            Some(kind) if !kind.is_empty() => format!("event: {}\ndata: {}", kind, request.body),
            _ => format!("data: {}", request.body),
        };
        Some(parse_frame(&frame))
    }
}

#[async_trait]
impl IngestHandler for IngestBridge {
    async fn on_request(&self, request: HttpRequest) -> HttpResponse {
        if let Some(event) = Self::event_from(&request) {
            let _ = self.internal.send(Internal::Posted {
                generation: self.generation,
                event,
            });
        } else {
            debug!("Ignoring empty POST body");
        }
        HttpResponse::ok(None).with_cors()
    }

    async fn on_client_connected(&self, connection: &OutboundConnection) {
        debug!(connection = %connection.id(), "Ingest subscriber connected");
        connection.send_event(crate::server::CONNECTED_PAYLOAD, None, None);
    }

    async fn on_client_disconnected(&self, id: Uuid) {
        debug!(connection = %id, "Ingest subscriber disconnected");
    }
}

/// Handle to a running coordinator.
///
/// Cheap to clone. All methods fail with [`Error::Internal`] once the
/// coordinator has shut down.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<CoordinatorStatus>,
    events: broadcast::Sender<LoggedEvent>,
}

impl CoordinatorHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| Error::internal("coordinator stopped"))?;
        response
            .await
            .map_err(|_| Error::internal("coordinator stopped"))
    }

    /// Make `url` the active target.
    ///
    /// Fails with [`Error::InvalidUrl`] without touching the current
    /// connection when `url` is not an http(s) URL.
    pub async fn connect(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.request(|reply| Command::Connect { url, reply }).await?
    }

    /// Drop the active connection. No reconnect follows.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Logged events for a target, filtered by payload substring and kind.
    pub async fn events_for(
        &self,
        url: &str,
        search: Option<&str>,
        kind: Option<&str>,
    ) -> Result<Vec<TextEvent>> {
        let url = url.to_string();
        let search = search.map(str::to_string);
        let kind = kind.map(str::to_string);
        self.request(|reply| Command::EventsFor {
            url,
            search,
            kind,
            reply,
        })
        .await
    }

    /// Empty one target's log.
    pub async fn clear(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.request(|reply| Command::Clear { url, reply }).await
    }

    /// Targets with a log, in first-seen order.
    pub async fn targets(&self) -> Result<Vec<String>> {
        self.request(|reply| Command::Targets { reply }).await
    }

    /// Send an event to the ingest server's subscribers.
    ///
    /// Returns the delivery count, `0` when no ingest server is running.
    pub async fn broadcast(
        &self,
        kind: Option<&str>,
        payload: &str,
        id: Option<&str>,
    ) -> Result<usize> {
        let kind = kind.map(str::to_string);
        let payload = payload.to_string();
        let id = id.map(str::to_string);
        self.request(|reply| Command::Broadcast {
            kind,
            payload,
            id,
            reply,
        })
        .await
    }

    /// Address of the running ingest server, if any.
    pub async fn ingest_addr(&self) -> Result<Option<SocketAddr>> {
        self.request(|reply| Command::IngestAddr { reply }).await
    }

    /// Current status snapshot.
    pub fn status(&self) -> CoordinatorStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status.clone()
    }

    /// Receive every event as it is logged.
    pub fn event_feed(&self) -> broadcast::Receiver<LoggedEvent> {
        self.events.subscribe()
    }

    /// Stop everything and end the actor.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

/// The coordinator actor.
pub struct Coordinator {
    config: CoordinatorConfig,
    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    status: watch::Sender<CoordinatorStatus>,
    events: broadcast::Sender<LoggedEvent>,
    log: EventLog,
    target: Option<StreamTarget>,
    generation: u64,
    next_session: u64,
    client: Option<ClientHandle>,
    ingest: Option<IngestServer>,
    backoff: Backoff,
    timer: Option<ReconnectTimer>,
    resume_ids: HashMap<String, String>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("target", &self.target)
            .field("generation", &self.generation)
            .field("attempt", &self.backoff.attempt())
            .field("client", &self.client.is_some())
            .field("ingest", &self.ingest)
            .finish()
    }
}

impl Coordinator {
    /// Create a builder with default configuration.
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Start the actor and return a handle to it.
    pub fn spawn(config: CoordinatorConfig) -> CoordinatorHandle {
        let (command_tx, commands) = mpsc::channel(config.channel_capacity.max(1));
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(CoordinatorStatus::default());
        let (events, _) = broadcast::channel(EVENT_FEED_CAPACITY);

        let actor = Self {
            backoff: Backoff::new(config.reconnect.clone()),
            config,
            commands,
            internal_tx,
            internal_rx,
            status,
            events: events.clone(),
            log: EventLog::new(),
            target: None,
            generation: 0,
            next_session: 0,
            client: None,
            ingest: None,
            timer: None,
            resume_ids: HashMap::new(),
        };
        tokio::spawn(actor.run());

        CoordinatorHandle {
            commands: command_tx,
            status: status_rx,
            events,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        break;
                    },
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.teardown().await;
                        break;
                    },
                },
                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
            }
        }
        info!("Coordinator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { url, reply } => {
                let result = self.connect(&url).await;
                let _ = reply.send(result);
            },
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            },
            Command::EventsFor {
                url,
                search,
                kind,
                reply,
            } => {
                let events =
                    self.log
                        .events_for(&log_key(&url), search.as_deref(), kind.as_deref());
                let _ = reply.send(events);
            },
            Command::Clear { url, reply } => {
                self.log.clear(&log_key(&url));
                let _ = reply.send(());
            },
            Command::Targets { reply } => {
                let _ = reply.send(self.log.targets());
            },
            Command::Broadcast {
                kind,
                payload,
                id,
                reply,
            } => {
                let delivered = self.ingest.as_ref().map_or(0, |server| {
                    server.broadcast(kind.as_deref(), &payload, id.as_deref())
                });
                let _ = reply.send(delivered);
            },
            Command::IngestAddr { reply } => {
                let _ = reply.send(self.ingest.as_ref().map(IngestServer::local_addr));
            },
            // Handled by the run loop
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            },
        }
    }

    async fn connect(&mut self, url: &str) -> Result<()> {
        let target = StreamTarget::parse(url)?;
        info!(target = %target, "Connecting");

        self.cancel_timer();
        self.backoff.reset();
        self.stop_client();
        self.stop_ingest().await;
        self.generation += 1;

        self.log.ensure(target.key());
        self.target = Some(target.clone());
        self.status.send_modify(|status| {
            status.target = Some(target.key().to_string());
            status.state = ConnectionState::Connecting;
            status.last_error = None;
            status.warning = None;
        });

        if target.is_local() {
            let handler = Arc::new(IngestBridge {
                generation: self.generation,
                internal: self.internal_tx.clone(),
            });
            match IngestServer::start(self.config.ingest.clone(), handler).await {
                Ok(server) => self.ingest = Some(server),
                Err(e) => {
                    warn!("Local ingest unavailable: {}", e);
                    self.status
                        .send_modify(|status| status.warning = Some(e.to_string()));
                },
            }
        }

        if let Err(e) = self.start_client() {
            self.set_state(ConnectionState::Failed {
                reason: e.to_string(),
            });
            return Err(e);
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        info!("Disconnecting");
        self.cancel_timer();
        self.backoff.reset();
        self.stop_client();
        self.stop_ingest().await;
        self.generation += 1;
        self.set_state(ConnectionState::Disconnected);
    }

    async fn teardown(&mut self) {
        self.cancel_timer();
        self.stop_client();
        self.stop_ingest().await;
        self.generation += 1;
        self.set_state(ConnectionState::Disconnected);
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Client(message) => {
                let session = message.session();
                if self.client.as_ref().map(ClientHandle::session) != Some(session) {
                    trace!(session, "Dropping message from a replaced client");
                    return;
                }
                match message {
                    ClientMessage::Event { event, .. } => self.on_event(event),
                    ClientMessage::Closed { ended, .. } => {
                        if let Some(handle) = self.client.take() {
                            self.remember_resume_id(&handle);
                        }
                        match ended {
                            Ended::Cancelled => self.set_state(ConnectionState::Disconnected),
                            Ended::Failed(e) => self.on_failure(e.to_string()),
                        }
                    },
                }
            },
            Internal::Posted { generation, event } => {
                if generation != self.generation {
                    trace!(generation, "Dropping POST for a replaced target");
                    return;
                }
                self.on_event(event);
            },
            Internal::TimerFired { generation, timer } => {
                let current = self.timer.as_ref().map(ReconnectTimer::id) == Some(timer);
                if generation != self.generation || !current {
                    trace!(timer, "Ignoring stale reconnect timer");
                    return;
                }
                self.timer = None;
                if let Err(e) = self.start_client() {
                    self.on_failure(e.to_string());
                }
            },
        }
    }

    fn on_event(&mut self, event: TextEvent) {
        let Some(target) = &self.target else {
            return;
        };
        let key = target.key().to_string();
        debug!(target = %key, kind = event.kind(), "Event received");

        let _ = self.events.send(LoggedEvent {
            target: key.clone(),
            event: event.clone(),
        });
        self.log.append(&key, event);
        self.backoff.reset();
        self.set_state(ConnectionState::Connected);
    }

    fn on_failure(&mut self, reason: String) {
        warn!("Upstream error: {}", reason);
        self.status
            .send_modify(|status| status.last_error = Some(reason.clone()));

        match self.backoff.next_attempt() {
            Some((attempt, delay)) => {
                self.set_state(ConnectionState::Reconnecting { attempt });
                info!(attempt, ?delay, "Scheduling reconnect");

                let internal = self.internal_tx.clone();
                let generation = self.generation;
                self.timer = Some(ReconnectTimer::start(delay, move |timer| {
                    let _ = internal.send(Internal::TimerFired { generation, timer });
                }));
            },
            None => {
                warn!(
                    "{}",
                    Error::MaxAttemptsExceeded(self.backoff.config().max_attempts)
                );
                self.timer = None;
                self.set_state(ConnectionState::Failed { reason });
            },
        }
    }

    fn start_client(&mut self) -> Result<()> {
        let Some(target) = &self.target else {
            return Ok(());
        };
        let config = ClientConfig {
            headers: self.config.client_headers.clone(),
            last_event_id: self.resume_ids.get(target.key()).cloned(),
            connect_timeout: self.config.connect_timeout,
        };
        let client = EventStreamClient::new(target.url().clone(), config)?;

        self.next_session += 1;
        let handle = client.connect(self.next_session, ClientBridge(self.internal_tx.clone()));
        debug!(session = handle.session(), "Upstream client started");
        self.client = Some(handle);
        Ok(())
    }

    fn stop_client(&mut self) {
        if let Some(handle) = self.client.take() {
            handle.disconnect();
            self.remember_resume_id(&handle);
        }
    }

    fn remember_resume_id(&mut self, handle: &ClientHandle) {
        if let (Some(target), Some(id)) = (&self.target, handle.last_event_id()) {
            self.resume_ids.insert(target.key().to_string(), id);
        }
    }

    async fn stop_ingest(&mut self) {
        if let Some(mut server) = self.ingest.take() {
            server.stop().await;
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.send_if_modified(|status| {
            if status.state == state {
                return false;
            }
            debug!(from = %status.state, to = %state, "State change");
            status.state = state;
            true
        });
    }
}

/// Log key for a caller-supplied URL: the normalized target key when the
/// URL parses, the raw string otherwise.
fn log_key(url: &str) -> String {
    StreamTarget::parse(url).map_or_else(|_| url.to_string(), |target| target.key().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(body: &str, kind: Option<&str>) -> HttpRequest {
        let mut headers = crate::shared::Headers::new();
        if let Some(kind) = kind {
            headers.set(X_EVENT_TYPE, kind);
        }
        HttpRequest {
            method: "POST".to_string(),
            path: "/".to_string(),
            headers,
            body: body.to_string(),
        }
    }

    fn quiet_config() -> CoordinatorConfig {
        Coordinator::builder()
            .ingest_port(0)
            .reconnect(ReconnectConfig {
                base_delay: Duration::from_secs(3600),
                max_delay: Duration::from_secs(3600),
                max_attempts: 10,
            })
            .build()
    }

    #[test]
    fn test_post_body_becomes_event() {
        let event = IngestBridge::event_from(&request("hello", None)).unwrap();
        assert_eq!(event.kind(), "message");
        assert_eq!(event.payload(), Some("hello"));

        let event = IngestBridge::event_from(&request("{\"a\":1}", None)).unwrap();
        assert_eq!(event.kind(), "system");

        let event = IngestBridge::event_from(&request("deploy done", Some("deploy"))).unwrap();
        assert_eq!(event.kind(), "deploy");

        assert!(IngestBridge::event_from(&request("", None)).is_none());
    }

    #[test]
    fn test_builder() {
        let config = Coordinator::builder()
            .ingest_port(9999)
            .client_header("Authorization", "Bearer x")
            .channel_capacity(0)
            .build();
        assert_eq!(config.ingest.port, 9999);
        assert_eq!(config.client_headers.len(), 1);
        assert_eq!(config.channel_capacity, 1);
    }

    #[tokio::test]
    async fn test_invalid_url_leaves_state_alone() {
        let coordinator = Coordinator::spawn(quiet_config());
        let err = coordinator.connect("not a url").await.unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
        assert_eq!(coordinator.status(), CoordinatorStatus::default());
        assert!(coordinator.targets().await.unwrap().is_empty());
        coordinator.shutdown().await.unwrap();
    }

    fn test_actor() -> (Coordinator, watch::Receiver<CoordinatorStatus>) {
        let (_, commands) = mpsc::channel(1);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(CoordinatorStatus::default());
        let (events, _) = broadcast::channel(8);
        let config = quiet_config();
        let actor = Coordinator {
            backoff: Backoff::new(config.reconnect.clone()),
            config,
            commands,
            internal_tx,
            internal_rx,
            status,
            events,
            log: EventLog::new(),
            target: None,
            generation: 0,
            next_session: 0,
            client: None,
            ingest: None,
            timer: None,
            resume_ids: HashMap::new(),
        };
        (actor, status_rx)
    }

    fn current_session(actor: &Coordinator) -> u64 {
        actor.client.as_ref().map(ClientHandle::session).unwrap()
    }

    fn fail(actor: &mut Coordinator, session: u64) {
        actor.handle_internal(Internal::Client(ClientMessage::Closed {
            session,
            ended: Ended::Failed(crate::error::TransportError::StreamEnded),
        }));
    }

    // Remote targets that are never reached; the clients' own errors stay
    // queued in the internal channel, which these tests never drain.
    const UNREACHABLE_A: &str = "http://192.0.2.1:9/";
    const UNREACHABLE_B: &str = "http://192.0.2.2:9/";

    #[tokio::test]
    async fn test_cancelled_client_means_disconnected() {
        let (mut actor, status_rx) = test_actor();
        actor.connect(UNREACHABLE_A).await.unwrap();
        let session = current_session(&actor);

        actor.handle_internal(Internal::Client(ClientMessage::Closed {
            session,
            ended: Ended::Cancelled,
        }));
        assert_eq!(status_rx.borrow().state, ConnectionState::Disconnected);
        assert!(actor.timer.is_none());
        assert_eq!(actor.backoff.attempt(), 0);

        // A stale failure must not arm a timer
        fail(&mut actor, session);
        assert!(actor.timer.is_none());
        assert_eq!(status_rx.borrow().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_failure_after_last_attempt_is_final() {
        let (mut actor, status_rx) = test_actor();
        actor.connect(UNREACHABLE_A).await.unwrap();

        for failure in 1..=10 {
            let session = current_session(&actor);
            fail(&mut actor, session);
            assert_eq!(
                status_rx.borrow().state,
                ConnectionState::Reconnecting { attempt: failure }
            );
            let timer = actor.timer.as_ref().map(ReconnectTimer::id).unwrap();
            actor.handle_internal(Internal::TimerFired {
                generation: actor.generation,
                timer,
            });
            assert!(actor.timer.is_none());
        }

        let session = current_session(&actor);

        fail(&mut actor, session);
        let status = status_rx.borrow().clone();
        assert_eq!(
            status.state,
            ConnectionState::Failed {
                reason: "Event stream ended".to_string()
            }
        );
        assert_eq!(status.last_error.as_deref(), Some("Event stream ended"));
        assert!(actor.timer.is_none());
        assert!(actor.client.is_none());
    }

    #[tokio::test]
    async fn test_new_target_invalidates_pending_timer() {
        let (mut actor, status_rx) = test_actor();
        actor.connect(UNREACHABLE_A).await.unwrap();
        let session = current_session(&actor);
        fail(&mut actor, session);

        let old_generation = actor.generation;
        let old_timer = actor.timer.as_ref().map(ReconnectTimer::id).unwrap();

        actor.connect(UNREACHABLE_B).await.unwrap();
        assert!(actor.timer.is_none());
        assert_eq!(actor.backoff.attempt(), 0);
        let session = current_session(&actor);

        // The old timer firing late must not start a client for A
        actor.handle_internal(Internal::TimerFired {
            generation: old_generation,
            timer: old_timer,
        });
        assert_eq!(current_session(&actor), session);
        assert_eq!(
            actor.target.as_ref().map(|t| t.key().to_string()),
            Some(UNREACHABLE_B.to_string())
        );
        assert_eq!(status_rx.borrow().state, ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_stale_post_is_dropped() {
        let (mut actor, _status_rx) = test_actor();
        actor.connect(UNREACHABLE_A).await.unwrap();
        let old_generation = actor.generation;
        actor.connect(UNREACHABLE_B).await.unwrap();

        let event = IngestBridge::event_from(&request("late", None)).unwrap();
        actor.handle_internal(Internal::Posted {
            generation: old_generation,
            event: event.clone(),
        });
        assert_eq!(actor.log.len(UNREACHABLE_A), 0);
        assert_eq!(actor.log.len(UNREACHABLE_B), 0);

        actor.handle_internal(Internal::Posted {
            generation: actor.generation,
            event,
        });
        assert_eq!(actor.log.len(UNREACHABLE_B), 1);
    }

    #[tokio::test]
    async fn test_queries_accept_unnormalized_url() {
        let (mut actor, _status_rx) = test_actor();
        let typed = "http://EXAMPLE.invalid:9";
        actor.connect(typed).await.unwrap();
        assert_eq!(actor.log.targets(), vec!["http://example.invalid:9/".to_string()]);

        let event = IngestBridge::event_from(&request("hello", None)).unwrap();
        actor.handle_internal(Internal::Posted {
            generation: actor.generation,
            event,
        });

        let (reply, rx) = oneshot::channel();
        actor
            .handle_command(Command::EventsFor {
                url: typed.to_string(),
                search: None,
                kind: None,
                reply,
            })
            .await;
        let events = rx.await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload(), Some("hello"));

        let (reply, rx) = oneshot::channel();
        actor
            .handle_command(Command::Clear {
                url: typed.to_string(),
                reply,
            })
            .await;
        rx.await.unwrap();
        assert_eq!(actor.log.len("http://example.invalid:9/"), 0);
    }

    #[test]
    fn test_log_key_falls_back_to_raw_string() {
        assert_eq!(log_key("HTTP://Host.Example"), "http://host.example/");
        assert_eq!(log_key("not a url"), "not a url");
    }
}
