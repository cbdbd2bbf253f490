use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use http::header::{HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use netengine::http::{encode_request, encode_response, ResponseDecoder};
use netengine::ws::frame::encode_frame_with;
use netengine::ws::{FrameDecoder, OpCode, Role};

fn request_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("host", HeaderValue::from_static("example.com"));
    headers.insert("accept", HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"));
    headers.insert("accept-encoding", HeaderValue::from_static("gzip, deflate, br"));
    headers.insert("user-agent", HeaderValue::from_static("netengine-bench/0.1"));
    headers
}

fn benchmark_http(c: &mut Criterion) {
    let headers = request_headers();
    c.bench_function("encode_request_get", |b| {
        b.iter(|| encode_request(&Method::GET, black_box("/search?q=rust"), &headers, b"").unwrap())
    });

    let mut group = c.benchmark_group("decode_response");
    for size in [0usize, 1024, 64 * 1024] {
        let body = vec![b'x'; size];
        let wire = encode_response(StatusCode::OK, &HeaderMap::new(), &body, false);
        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_with_input(BenchmarkId::new("content_length", size), &wire, |b, wire| {
            b.iter(|| {
                let mut decoder = ResponseDecoder::new(&Method::GET);
                assert!(decoder.feed(black_box(wire)).unwrap());
                decoder.into_parts().unwrap()
            })
        });
    }
    group.finish();
}

fn benchmark_ws(c: &mut Criterion) {
    let mut group = c.benchmark_group("ws_frame");
    for size in [125usize, 65535, 1 << 20] {
        let payload = vec![0xa5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encode_masked", size), &payload, |b, payload| {
            b.iter(|| {
                encode_frame_with(true, OpCode::Binary, black_box(payload), Some([1, 2, 3, 4]))
                    .unwrap()
            })
        });

        let wire = encode_frame_with(true, OpCode::Binary, &payload, Some([1, 2, 3, 4])).unwrap();
        let decoder = FrameDecoder::new(Role::Server, 1 << 24);
        group.bench_with_input(BenchmarkId::new("decode_masked", size), &wire, |b, wire| {
            b.iter(|| {
                let mut buf = BytesMut::from(&wire[..]);
                decoder.decode(&mut buf).unwrap().unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_http, benchmark_ws);
criterion_main!(benches);
