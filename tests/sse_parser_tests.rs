use pigeon::shared::sse_parser::{parse_frame, render_frame, split_frames, FrameBuffer};
use pretty_assertions::assert_eq;
use rstest::rstest;

#[test]
fn test_full_frame() {
    let event = parse_frame("id: X\nevent: Y\ndata: Z");
    assert_eq!(event.id(), "X");
    assert_eq!(event.kind(), "Y");
    assert_eq!(event.payload(), Some("Z"));
}

#[rstest]
#[case("data: {\"status\":\"connected\"}", "system")]
#[case("event: tick\ndata:   {\"n\": 1}  ", "system")]
#[case("event: tick\ndata: {broken", "tick")]
#[case("data: plain text", "message")]
#[case("event: custom", "custom")]
fn test_kind_resolution(#[case] frame: &str, #[case] kind: &str) {
    assert_eq!(parse_frame(frame).kind(), kind);
}

#[test]
fn test_missing_data_line() {
    let event = parse_frame("id: 3\nevent: ping");
    assert_eq!(event.payload(), None);
    assert_eq!(event.id(), "3");
}

#[test]
fn test_prefixes_are_case_sensitive() {
    let event = parse_frame("ID: 1\nEvent: x\nDATA: y");
    assert_eq!(event.id(), "");
    assert_eq!(event.kind(), "message");
    assert_eq!(event.payload(), None);
}

#[test]
fn test_split_skips_comments() {
    let frames = split_frames(": keep-alive\n\nid: 1\ndata: a\n\n:another\n\ndata: b\n\n");
    assert_eq!(frames, vec!["id: 1\ndata: a", "data: b"]);
}

#[test]
fn test_render_omits_absent_fields() {
    assert_eq!(render_frame(None, "x", None), "data: x\n\n");
    assert_eq!(render_frame(Some("k"), "x", None), "event: k\ndata: x\n\n");
    assert_eq!(render_frame(None, "x", Some("9")), "id: 9\ndata: x\n\n");
}

#[test]
fn test_rendered_stream_reparses() {
    let stream: String = [
        render_frame(Some("a"), "one", Some("1")),
        render_frame(None, "two", None),
        render_frame(Some("b"), "{\"three\":3}", Some("3")),
    ]
    .concat();

    let events: Vec<_> = split_frames(&stream).into_iter().map(parse_frame).collect();
    let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["a", "message", "system"]);
    assert_eq!(events[2].id(), "3");
}

#[test]
fn test_frame_buffer_byte_at_a_time() {
    let stream = "id: 1\ndata: héllo wörld\n\n: ping\n\nevent: e\ndata: ✓\n\n";
    let mut buffer = FrameBuffer::new();
    let mut frames = Vec::new();
    for byte in stream.as_bytes() {
        frames.extend(buffer.feed(std::slice::from_ref(byte)));
    }
    assert_eq!(frames, vec!["id: 1\ndata: héllo wörld", "event: e\ndata: ✓"]);
    assert!(buffer.is_empty());
    assert_eq!(buffer.flush(), None);
}
