//! Frame codec benchmarks
//!
//! Measures the per-event cost of the SSE parser and the incremental
//! splitter that sit on the hot path of every upstream read.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pigeon::shared::sse_parser::{parse_frame, render_frame, split_frames, FrameBuffer};
use pigeon::shared::HttpRequest;
use std::hint::black_box;

fn sample_stream(events: usize) -> String {
    (0..events)
        .map(|i| {
            if i % 3 == 0 {
                render_frame(None, &format!("{{\"seq\":{i},\"ok\":true}}"), Some(&i.to_string()))
            } else {
                render_frame(Some("log"), &format!("line {i} of the build output"), None)
            }
        })
        .collect()
}

/// Benchmark single-frame parsing
fn bench_parse_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_frame");

    let cases = [
        ("plain", "data: hello world"),
        ("full", "id: 42\nevent: deploy\ndata: build 42 shipped"),
        ("json", "event: tick\ndata: {\"status\":\"connected\",\"clients\":3}"),
    ];

    for (name, frame) in cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), frame, |b, frame| {
            b.iter(|| black_box(parse_frame(black_box(frame))))
        });
    }

    group.finish();
}

/// Benchmark whole-buffer splitting against incremental feeding
fn bench_stream_splitting(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_splitting");

    for events in [10, 100, 1000] {
        let stream = sample_stream(events);
        group.throughput(Throughput::Bytes(stream.len() as u64));

        group.bench_with_input(BenchmarkId::new("split_frames", events), &stream, |b, s| {
            b.iter(|| black_box(split_frames(black_box(s)).len()))
        });

        // Network-sized reads that rarely line up with frame boundaries
        group.bench_with_input(BenchmarkId::new("frame_buffer", events), &stream, |b, s| {
            b.iter(|| {
                let mut buffer = FrameBuffer::new();
                let mut count = 0;
                for chunk in s.as_bytes().chunks(1460) {
                    count += buffer.feed(chunk).len();
                }
                black_box(count)
            })
        });
    }

    group.finish();
}

/// Benchmark ingest request parsing
fn bench_http_request(c: &mut Criterion) {
    let request = b"POST / HTTP/1.1\r\nHost: localhost:8787\r\nContent-Type: text/plain\r\nX-Event-Type: deploy\r\nContent-Length: 16\r\n\r\nbuild 42 shipped";

    c.bench_function("http_request_parse", |b| {
        b.iter(|| black_box(HttpRequest::parse(black_box(request))))
    });
}

criterion_group!(
    benches,
    bench_parse_frame,
    bench_stream_splitting,
    bench_http_request
);
criterion_main!(benches);
