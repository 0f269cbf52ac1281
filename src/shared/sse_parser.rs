//! Server-Sent Events (SSE) frame codec.
//!
//! Frames are blocks of `id:`/`event:`/`data:` lines terminated by a blank
//! line. This module parses single frames into [`TextEvent`]s, splits a text
//! stream into frames, and renders outbound frames.
//!
//! The parser is intentionally minimal: only the exact `"id: "`, `"event: "`
//! and `"data: "` prefixes are recognized and multi-line data is not folded.

use crate::types::{TextEvent, DEFAULT_EVENT_KIND, SYSTEM_EVENT_KIND};
use tracing::warn;

/// Separator between two frames.
pub const FRAME_TERMINATOR: &str = "\n\n";

/// Default cap on unterminated text held by a [`FrameBuffer`].
pub const MAX_BUFFERED_BYTES: usize = 1024 * 1024;

const ID_PREFIX: &str = "id: ";
const EVENT_PREFIX: &str = "event: ";
const DATA_PREFIX: &str = "data: ";

/// Parse one raw frame into an event.
///
/// There is no error path: malformed input yields an event with an empty id,
/// the default kind, and whatever payload could be recovered.
///
/// # Examples
///
/// ```rust
/// use pigeon::shared::sse_parser::parse_frame;
///
/// let event = parse_frame("id: 7\nevent: tick\ndata: hello");
/// assert_eq!(event.id(), "7");
/// assert_eq!(event.kind(), "tick");
/// assert_eq!(event.payload(), Some("hello"));
///
/// // JSON object payloads are always system events
/// let event = parse_frame("event: tick\ndata: {\"status\":\"connected\"}");
/// assert_eq!(event.kind(), "system");
/// ```
pub fn parse_frame(chunk: &str) -> TextEvent {
    let mut id: Option<&str> = None;
    let mut kind: Option<&str> = None;
    let mut payload: Option<&str> = None;

    for line in chunk.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(value) = line.strip_prefix(ID_PREFIX) {
            id.get_or_insert(value);
        } else if let Some(value) = line.strip_prefix(EVENT_PREFIX) {
            kind.get_or_insert(value);
        } else if let Some(value) = line.strip_prefix(DATA_PREFIX) {
            payload = Some(value);
        }
    }

    let kind = match payload {
        Some(data) if looks_like_json_object(data) => SYSTEM_EVENT_KIND,
        _ => kind.unwrap_or(DEFAULT_EVENT_KIND),
    };

    TextEvent::new(id.unwrap_or_default(), kind, payload.map(str::to_string))
}

/// Cheap structural check for a JSON object literal.
///
/// This does not validate the JSON; a truncated object still counts.
pub fn looks_like_json_object(payload: &str) -> bool {
    let trimmed = payload.trim();
    trimmed.starts_with('{') && trimmed.ends_with('}')
}

/// Split stream text into candidate frames.
///
/// Empty segments and comment segments (starting with `:`) are dropped.
///
/// # Examples
///
/// ```rust
/// use pigeon::shared::sse_parser::split_frames;
///
/// let frames = split_frames("a\n\n:keepalive\n\nb\n\n");
/// assert_eq!(frames, vec!["a", "b"]);
/// ```
pub fn split_frames(text: &str) -> Vec<&str> {
    text.split(FRAME_TERMINATOR)
        .filter(|segment| is_usable_frame(segment))
        .collect()
}

fn is_usable_frame(segment: &str) -> bool {
    !segment.is_empty() && !segment.starts_with(':')
}

/// Render an outbound frame.
///
/// The `id` and `event` lines are omitted when absent.
///
/// # Examples
///
/// ```rust
/// use pigeon::shared::sse_parser::render_frame;
///
/// assert_eq!(render_frame(None, "hi", None), "data: hi\n\n");
/// assert_eq!(
///     render_frame(Some("tick"), "hi", Some("1")),
///     "id: 1\nevent: tick\ndata: hi\n\n"
/// );
/// ```
pub fn render_frame(kind: Option<&str>, payload: &str, id: Option<&str>) -> String {
    let mut frame = String::with_capacity(payload.len() + 32);
    if let Some(id) = id {
        frame.push_str(ID_PREFIX);
        frame.push_str(id);
        frame.push('\n');
    }
    if let Some(kind) = kind {
        frame.push_str(EVENT_PREFIX);
        frame.push_str(kind);
        frame.push('\n');
    }
    frame.push_str(DATA_PREFIX);
    frame.push_str(payload);
    frame.push_str(FRAME_TERMINATOR);
    frame
}

/// Incremental frame splitter for network reads.
///
/// Network reads rarely line up with frame boundaries, so partial frames and
/// partial UTF-8 sequences are carried over to the next [`feed`](Self::feed).
/// A partial frame that outgrows the limit is dropped, along with the rest of
/// that frame as it arrives.
#[derive(Debug)]
pub struct FrameBuffer {
    pending_bytes: Vec<u8>,
    text: String,
    limit: usize,
    discarding: bool,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_BUFFERED_BYTES)
    }
}

impl FrameBuffer {
    /// Create an empty buffer with the default limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer holding at most `limit` bytes of unterminated
    /// text.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            pending_bytes: Vec::new(),
            text: String::new(),
            limit,
            discarding: false,
        }
    }

    /// Feed raw bytes and take every complete frame.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use pigeon::shared::sse_parser::FrameBuffer;
    ///
    /// let mut buffer = FrameBuffer::new();
    /// assert!(buffer.feed(b"data: par").is_empty());
    /// assert_eq!(buffer.feed(b"tial\n\n"), vec!["data: partial".to_string()]);
    /// ```
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending_bytes.extend_from_slice(bytes);
        self.decode_pending();

        let mut frames = Vec::new();
        while let Some(end) = self.text.find(FRAME_TERMINATOR) {
            let segment: String = self.text.drain(..end + FRAME_TERMINATOR.len()).collect();
            // Tail of an oversized frame
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            let segment = &segment[..end];
            if is_usable_frame(segment) {
                frames.push(segment.to_string());
            }
        }

        if self.text.len() + self.pending_bytes.len() > self.limit {
            if !self.discarding {
                warn!(limit = self.limit, "Dropping oversized partial frame");
            }
            self.discarding = true;
            // A trailing newline may be the first half of the terminator
            let keep_newline = self.text.ends_with('\n');
            self.text.clear();
            if keep_newline {
                self.text.push('\n');
            }
        }
        frames
    }

    /// Take whatever is left once the stream has ended.
    pub fn flush(&mut self) -> Option<String> {
        if std::mem::take(&mut self.discarding) {
            self.pending_bytes.clear();
            self.text.clear();
            return None;
        }
        if !self.pending_bytes.is_empty() {
            let rest = std::mem::take(&mut self.pending_bytes);
            self.text.push_str(&String::from_utf8_lossy(&rest));
        }
        let rest = std::mem::take(&mut self.text);
        let rest = rest.trim_end_matches('\n');
        is_usable_frame(rest).then(|| rest.to_string())
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.pending_bytes.is_empty() && self.text.is_empty()
    }

    fn decode_pending(&mut self) {
        match std::str::from_utf8(&self.pending_bytes) {
            Ok(text) => {
                self.text.push_str(text);
                self.pending_bytes.clear();
            },
            Err(e) => {
                let valid = e.valid_up_to();
                self.text
                    .push_str(&String::from_utf8_lossy(&self.pending_bytes[..valid]));
                match e.error_len() {
                    // Incomplete sequence at the end: keep it for the next read.
                    None => {
                        self.pending_bytes.drain(..valid);
                    },
                    // Invalid bytes: replace and keep going.
                    Some(bad) => {
                        self.text.push(char::REPLACEMENT_CHARACTER);
                        self.pending_bytes.drain(..valid + bad);
                        self.decode_pending();
                    },
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn parses_all_fields() {
        let event = parse_frame("id: X\nevent: Y\ndata: Z");
        assert_eq!(event.id(), "X");
        assert_eq!(event.kind(), "Y");
        assert_eq!(event.payload(), Some("Z"));
    }

    #[test]
    fn json_object_payload_is_system() {
        let event = parse_frame("data: {\"a\":1}");
        assert_eq!(event.kind(), "system");

        let event = parse_frame("event: custom\ndata: {\"a\":1}");
        assert_eq!(event.kind(), "system");

        // Arrays are not objects
        let event = parse_frame("data: [1,2]");
        assert_eq!(event.kind(), "message");
    }

    #[test]
    fn first_id_and_event_win_last_data_wins() {
        let event = parse_frame("id: 1\nid: 2\nevent: a\nevent: b\ndata: one\ndata: two");
        assert_eq!(event.id(), "1");
        assert_eq!(event.kind(), "a");
        assert_eq!(event.payload(), Some("two"));
    }

    #[test]
    fn malformed_input_uses_defaults() {
        let event = parse_frame("garbage\nid:nospace\ndata:also-no-space");
        assert_eq!(event.id(), "");
        assert_eq!(event.kind(), "message");
        assert_eq!(event.payload(), None);
    }

    #[test]
    fn crlf_lines_are_accepted() {
        let event = parse_frame("id: 9\r\ndata: windows\r");
        assert_eq!(event.id(), "9");
        assert_eq!(event.payload(), Some("windows"));
    }

    #[test]
    fn split_drops_comments_and_empty_segments() {
        assert_eq!(split_frames("a\n\n:keepalive\n\nb\n\n"), vec!["a", "b"]);
        assert!(split_frames("\n\n\n\n").is_empty());
        assert!(split_frames(": only a comment\n\n").is_empty());
    }

    #[test]
    fn buffer_reassembles_split_frames() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.feed(b"id: 1\nda").is_empty());
        assert!(buffer.feed(b"ta: x\n").is_empty());
        let frames = buffer.feed(b"\n: ping\n\ndata: y\n\n");
        assert_eq!(frames, vec!["id: 1\ndata: x", "data: y"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn buffer_carries_split_utf8() {
        let bytes = "data: héllo\n\n".as_bytes();
        // Split inside the two-byte 'é'
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut buffer = FrameBuffer::new();
        assert!(buffer.feed(&bytes[..split]).is_empty());
        assert_eq!(buffer.feed(&bytes[split..]), vec!["data: héllo"]);
    }

    #[test]
    fn buffer_replaces_invalid_bytes() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.feed(b"data: a\xFFb\n\n");
        assert_eq!(frames, vec!["data: a\u{FFFD}b"]);
    }

    #[test]
    fn oversized_partial_frame_is_dropped() {
        let mut buffer = FrameBuffer::with_limit(16);
        assert!(buffer.feed(b"data: 0123456789abcdefghijklmn").is_empty());
        assert!(buffer.is_empty());

        // The rest of the dropped frame is skipped, the next one survives
        let frames = buffer.feed(b"opqrstuvwxyz\n\ndata: ok\n\n");
        assert_eq!(frames, vec!["data: ok"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn terminator_split_at_the_cap_is_found() {
        let mut buffer = FrameBuffer::with_limit(8);
        assert!(buffer.feed(b"data: too long\n").is_empty());
        assert_eq!(buffer.feed(b"\ndata: y\n\n"), vec!["data: y"]);
    }

    #[test]
    fn flush_after_drop_returns_nothing() {
        let mut buffer = FrameBuffer::with_limit(8);
        assert!(buffer.feed(b"data: too long").is_empty());
        assert_eq!(buffer.flush(), None);
        assert_eq!(buffer.feed(b"data: y\n\n"), vec!["data: y"]);
    }

    #[test]
    fn flush_returns_unterminated_frame() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.feed(b"data: tail\n").is_empty());
        assert_eq!(buffer.flush(), Some("data: tail".to_string()));
        assert_eq!(buffer.flush(), None);
    }

    proptest! {
        #[test]
        fn render_then_parse_preserves_fields(
            id in "[a-zA-Z0-9-]{1,16}",
            kind in "[a-z_]{1,12}",
            payload in "[^\n\r{]{0,64}",
        ) {
            let rendered = render_frame(Some(&kind), &payload, Some(&id));
            let frames = split_frames(&rendered);
            prop_assert_eq!(frames.len(), 1);
            let event = parse_frame(frames[0]);
            prop_assert_eq!(event.id(), id.as_str());
            prop_assert_eq!(event.kind(), kind.as_str());
            prop_assert_eq!(event.payload(), Some(payload.as_str()));
        }

        #[test]
        fn buffer_matches_split_for_any_chunking(
            payloads in prop::collection::vec("[a-z ]{1,20}", 1..8),
            cut in 1usize..16,
        ) {
            let stream: String = payloads.iter().map(|p| render_frame(None, p, None)).collect();
            let mut buffer = FrameBuffer::new();
            let mut frames = Vec::new();
            for piece in stream.as_bytes().chunks(cut) {
                frames.extend(buffer.feed(piece));
            }
            let expected: Vec<String> = split_frames(&stream).into_iter().map(String::from).collect();
            prop_assert_eq!(frames, expected);
        }
    }
}
