//! Outbound side of one accepted ingest connection.
//!
//! A dedicated writer task owns the write half of the socket. Everything else
//! talks to it through a bounded command channel, so callers never hold a
//! lock across I/O and a slow peer cannot stall a broadcast. A peer that
//! falls a full queue behind is closed.

use crate::shared::http_constants::{
    ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONNECTION, CONTENT_TYPE, CORS_ALLOW_ORIGIN,
    HTTP_VERSION, KEEP_ALIVE, NO_CACHE, TEXT_EVENT_STREAM,
};
use crate::shared::http_message::HttpResponse;
use crate::shared::sse_parser::render_frame;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Writes queued per connection before it is considered stuck.
const WRITE_QUEUE_CAPACITY: usize = 1024;

/// Lifecycle of an outbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundState {
    /// Accepted, writer not running yet.
    Pending,
    /// Writer running; writes are accepted.
    Ready,
    /// Terminal. Writes are dropped.
    Closed,
}

#[derive(Debug)]
enum WriteCommand {
    Data(Bytes),
    DataThenClose(Bytes),
}

#[derive(Debug)]
struct Shared {
    id: Uuid,
    state: Mutex<OutboundState>,
    transcript: Mutex<String>,
    is_event_stream: AtomicBool,
    closed: CancellationToken,
}

impl Shared {
    fn mark_ready(&self) {
        let mut state = self.state.lock();
        if *state == OutboundState::Pending {
            *state = OutboundState::Ready;
        }
    }

    fn mark_closed(&self) -> bool {
        let mut state = self.state.lock();
        let was_open = *state != OutboundState::Closed;
        *state = OutboundState::Closed;
        drop(state);
        self.closed.cancel();
        was_open
    }

    fn is_closed(&self) -> bool {
        *self.state.lock() == OutboundState::Closed
    }
}

/// One accepted connection, possibly upgraded to an event stream.
///
/// Cloning yields another handle to the same connection.
#[derive(Debug, Clone)]
pub struct OutboundConnection {
    shared: Arc<Shared>,
    commands: mpsc::Sender<WriteCommand>,
}

impl OutboundConnection {
    /// Take ownership of a write half and start its writer task.
    pub fn spawn<W>(writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::spawn_with_capacity(writer, WRITE_QUEUE_CAPACITY)
    }

    fn spawn_with_capacity<W>(writer: W, capacity: usize) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (commands, receiver) = mpsc::channel(capacity);
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            state: Mutex::new(OutboundState::Pending),
            transcript: Mutex::new(String::new()),
            is_event_stream: AtomicBool::new(false),
            closed: CancellationToken::new(),
        });

        tokio::spawn(run_writer(writer, receiver, shared.clone()));

        Self { shared, commands }
    }

    /// Connection identifier.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OutboundState {
        *self.shared.state.lock()
    }

    /// Whether the writer is running and the connection is open.
    pub fn is_ready(&self) -> bool {
        self.state() == OutboundState::Ready
    }

    /// Whether the connection has closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Whether [`upgrade`](Self::upgrade) has been called.
    pub fn is_event_stream(&self) -> bool {
        self.shared.is_event_stream.load(Ordering::Acquire)
    }

    /// Every event frame sent so far.
    pub fn transcript(&self) -> String {
        self.shared.transcript.lock().clone()
    }

    /// Send the event-stream response preamble.
    ///
    /// Only the first call writes anything.
    pub fn upgrade(&self) {
        if self.is_closed() || self.shared.is_event_stream.swap(true, Ordering::AcqRel) {
            return;
        }
        self.enqueue(WriteCommand::Data(Bytes::from(event_stream_preamble())));
    }

    /// Render and send one event frame. Does nothing once closed.
    pub fn send_event(&self, payload: &str, kind: Option<&str>, id: Option<&str>) {
        if self.is_closed() {
            return;
        }
        let frame = render_frame(kind, payload, id);
        self.shared.transcript.lock().push_str(&frame);
        self.enqueue(WriteCommand::Data(Bytes::from(frame)));
    }

    /// Send a complete plain response with the given status.
    ///
    /// The connection closes once the write completes, unless it is an
    /// event stream.
    pub fn send_plain(&self, body: impl Into<String>, status: u16) {
        let response = HttpResponse {
            body: Some(body.into()),
            ..HttpResponse::new(status)
        };
        self.send_response(&response);
    }

    /// Send a prepared response, closing afterwards like
    /// [`send_plain`](Self::send_plain).
    pub fn send_response(&self, response: &HttpResponse) {
        if self.is_closed() {
            return;
        }
        let bytes = Bytes::from(response.to_bytes());
        if self.is_event_stream() {
            self.enqueue(WriteCommand::Data(bytes));
        } else {
            self.enqueue(WriteCommand::DataThenClose(bytes));
        }
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        if self.shared.mark_closed() {
            debug!(connection = %self.id(), "Outbound connection closed");
        }
    }

    /// Resolves once the connection has closed, for any reason.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    fn enqueue(&self, command: WriteCommand) {
        match self.commands.try_send(command) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection = %self.id(), "Write queue full, closing connection");
                self.close();
            },
            // Writer already gone
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.mark_closed();
            },
        }
    }
}

fn event_stream_preamble() -> String {
    format!(
        "{HTTP_VERSION} 200 OK\r\n\
         {CACHE_CONTROL}: {NO_CACHE}\r\n\
         {ACCESS_CONTROL_ALLOW_ORIGIN}: {CORS_ALLOW_ORIGIN}\r\n\
         {CONTENT_TYPE}: {TEXT_EVENT_STREAM}\r\n\
         {CONNECTION}: {KEEP_ALIVE}\r\n\r\n"
    )
}

async fn run_writer<W>(
    mut writer: W,
    mut commands: mpsc::Receiver<WriteCommand>,
    shared: Arc<Shared>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    shared.mark_ready();

    loop {
        tokio::select! {
            biased;
            command = commands.recv() => {
                let (bytes, close_after) = match command {
                    Some(WriteCommand::Data(bytes)) => (bytes, false),
                    Some(WriteCommand::DataThenClose(bytes)) => (bytes, true),
                    None => break,
                };
                let written = tokio::select! {
                    biased;
                    result = write_chunk(&mut writer, &bytes) => result,
                    () = shared.closed.cancelled() => break,
                };
                if let Err(e) = written {
                    debug!(connection = %shared.id, "Write failed: {}", e);
                    break;
                }
                trace!(connection = %shared.id, bytes = bytes.len(), "Wrote chunk");
                if close_after {
                    break;
                }
            }
            () = shared.closed.cancelled() => break,
        }
    }

    let _ = writer.shutdown().await;
    shared.mark_closed();
}

async fn write_chunk<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    async fn read_all(mut reader: tokio::io::DuplexStream) -> String {
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), reader.read_to_end(&mut out))
            .await
            .expect("read timed out")
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_upgrade_then_events() {
        let (client, server) = duplex(4096);
        let connection = OutboundConnection::spawn(server);

        connection.upgrade();
        connection.upgrade();
        connection.send_event("hello", None, None);
        connection.send_event("{\"a\":1}", Some("tick"), Some("7"));
        connection.close();

        let wire = read_all(client).await;
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\nCache-Control: no-cache\r\n"));
        assert_eq!(wire.matches("HTTP/1.1").count(), 1);
        assert!(wire.contains("Content-Type: text/event-stream\r\n"));
        assert!(wire.ends_with("data: hello\n\nid: 7\nevent: tick\ndata: {\"a\":1}\n\n"));

        assert_eq!(
            connection.transcript(),
            "data: hello\n\nid: 7\nevent: tick\ndata: {\"a\":1}\n\n"
        );
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_send_plain_closes_plain_connection() {
        let (client, server) = duplex(4096);
        let connection = OutboundConnection::spawn(server);

        connection.send_plain("nope", 404);
        let wire = read_all(client).await;
        assert_eq!(wire, "HTTP/1.1 404 Not Found\r\nContent-Length: 4\r\n\r\nnope");

        connection.closed().await;
        assert_eq!(connection.state(), OutboundState::Closed);
    }

    #[tokio::test]
    async fn test_closed_connection_ignores_writes() {
        let (client, server) = duplex(4096);
        let connection = OutboundConnection::spawn(server);

        connection.close();
        connection.close();
        connection.send_event("late", None, None);

        assert_eq!(read_all(client).await, "");
        assert_eq!(connection.transcript(), "");
    }

    #[tokio::test]
    async fn test_peer_gone_marks_closed() {
        let (client, server) = duplex(64);
        let connection = OutboundConnection::spawn(server);
        drop(client);

        connection.send_event("into the void", None, None);
        tokio::time::timeout(Duration::from_secs(2), connection.closed())
            .await
            .unwrap();
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_stalled_reader_is_closed_when_queue_fills() {
        // Peer stays open but never reads
        let (_client, server) = duplex(16);
        let connection = OutboundConnection::spawn_with_capacity(server, 4);

        connection.upgrade();
        for n in 0..10 {
            connection.send_event(&format!("event {n}"), None, None);
        }
        assert!(connection.is_closed());

        tokio::time::timeout(Duration::from_secs(2), connection.closed())
            .await
            .unwrap();
        connection.send_event("after close", None, None);
        assert!(!connection.transcript().contains("after close"));
    }
}
