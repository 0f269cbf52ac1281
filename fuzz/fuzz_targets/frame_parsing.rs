#![no_main]

use libfuzzer_sys::fuzz_target;
use pigeon::shared::sse_parser::{parse_frame, split_frames, FrameBuffer};

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);

    let whole: Vec<String> = split_frames(&text).into_iter().map(String::from).collect();
    for frame in &whole {
        let event = parse_frame(frame);
        assert!(!event.kind().is_empty());
    }

    // Feeding in arbitrary chunks must agree with splitting the whole text
    if let Ok(text) = std::str::from_utf8(data) {
        let split = data.first().map_or(1, |b| usize::from(*b).max(1));
        let mut buffer = FrameBuffer::new();
        let mut fed = Vec::new();
        for chunk in text.as_bytes().chunks(split) {
            fed.extend(buffer.feed(chunk));
        }
        let complete = text.matches("\n\n").count();
        assert!(fed.len() <= complete);
        assert_eq!(fed, whole.iter().take(fed.len()).cloned().collect::<Vec<_>>());
    }
});
