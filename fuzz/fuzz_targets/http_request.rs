#![no_main]

use libfuzzer_sys::fuzz_target;
use pigeon::shared::{HttpRequest, Parsed};

fuzz_target!(|data: &[u8]| {
    if let Ok(Parsed::Complete(request)) = HttpRequest::parse(data) {
        let _ = request.accepts_event_stream();
        assert!(!request.method.is_empty());
    }
});
