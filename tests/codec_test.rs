//! Wire codec properties: decoding must not depend on how input is split.

use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use http::{Method, StatusCode};
use netengine::http::{
    decode_response, encode_request, encode_response, RequestDecoder, ResponseDecoder,
};
use netengine::ws::{Frame, FrameDecoder, OpCode, Role};
use netengine::ws::frame::encode_frame_with;
use proptest::prelude::*;

fn chunked_wire(body: &[u8], chunk: usize) -> Vec<u8> {
    let mut wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    for part in body.chunks(chunk.max(1)) {
        wire.extend_from_slice(format!("{:x}\r\n", part.len()).as_bytes());
        wire.extend_from_slice(part);
        wire.extend_from_slice(b"\r\n");
    }
    wire.extend_from_slice(b"0\r\n\r\n");
    wire
}

/// Feed `wire` in pieces cut at `cuts`; returns status and body.
fn decode_split(wire: &[u8], cuts: &[usize]) -> (StatusCode, Bytes) {
    let mut decoder = ResponseDecoder::new(&Method::GET);
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (wire.len() + 1)).collect();
    points.push(0);
    points.push(wire.len());
    points.sort_unstable();
    points.dedup();

    let mut done = false;
    for pair in points.windows(2) {
        assert!(!done, "decoder finished before input ended");
        done = decode_response(&mut decoder, &wire[pair[0]..pair[1]]).unwrap();
    }
    assert!(done);
    let (head, body) = decoder.into_parts().unwrap();
    (head.status, body)
}

fn decode_bytewise(wire: &[u8]) -> (StatusCode, Bytes) {
    let mut decoder = ResponseDecoder::new(&Method::GET);
    let mut done = false;
    for b in wire {
        done = decoder.feed(std::slice::from_ref(b)).unwrap();
    }
    assert!(done);
    let (head, body) = decoder.into_parts().unwrap();
    (head.status, body)
}

#[test]
fn test_hello_response_bytewise() {
    let wire = encode_response(StatusCode::OK, &HeaderMap::new(), b"hello", false);
    let (status, body) = decode_bytewise(&wire);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"hello");
}

#[test]
fn test_chunked_bytewise_matches_whole() {
    let wire = chunked_wire(b"the quick brown fox", 4);
    assert_eq!(decode_bytewise(&wire), decode_split(&wire, &[]));
}

#[test]
fn test_head_response_has_no_body() {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    let wire = encode_response(StatusCode::OK, &headers, b"ignored", true);

    let mut decoder = ResponseDecoder::new(&Method::HEAD);
    assert!(decoder.feed(&wire).unwrap());
    let (head, body) = decoder.into_parts().unwrap();
    assert_eq!(head.headers["content-length"], "7");
    assert!(body.is_empty());
}

#[test]
fn test_request_round_trip() {
    let mut headers = HeaderMap::new();
    headers.insert("host", HeaderValue::from_static("example.com"));
    let wire = encode_request(&Method::PUT, "/items/7?x=1", &headers, b"payload").unwrap();

    let mut decoder = RequestDecoder::new();
    assert!(decoder.feed(&wire).unwrap());
    let (head, body, rest) = decoder.into_parts().unwrap();
    assert_eq!(head.method, Method::PUT);
    assert_eq!(head.target, "/items/7?x=1");
    assert_eq!(head.headers["content-length"], "7");
    assert_eq!(&body[..], b"payload");
    assert!(rest.is_empty());
}

proptest! {
    #[test]
    fn prop_content_length_split_invariant(
        body in proptest::collection::vec(any::<u8>(), 0..2048),
        cuts in proptest::collection::vec(any::<usize>(), 0..16),
    ) {
        let wire = encode_response(StatusCode::OK, &HeaderMap::new(), &body, false);
        let (status, decoded) = decode_split(&wire, &cuts);
        prop_assert_eq!(status, StatusCode::OK);
        prop_assert_eq!(&decoded[..], &body[..]);
    }

    #[test]
    fn prop_chunked_split_invariant(
        body in proptest::collection::vec(any::<u8>(), 0..2048),
        chunk in 1usize..300,
        cuts in proptest::collection::vec(any::<usize>(), 0..16),
    ) {
        let wire = chunked_wire(&body, chunk);
        let (_, whole) = decode_split(&wire, &[]);
        let (_, split) = decode_split(&wire, &cuts);
        prop_assert_eq!(&whole[..], &body[..]);
        prop_assert_eq!(whole, split);
    }

    #[test]
    fn prop_pipelined_requests_split_invariant(
        bodies in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 1..5),
        step in 1usize..64,
    ) {
        let mut wire = Vec::new();
        for body in &bodies {
            let request = encode_request(&Method::POST, "/", &HeaderMap::new(), body).unwrap();
            wire.extend_from_slice(&request);
        }

        let mut decoded = Vec::new();
        let mut decoder = RequestDecoder::new();
        for piece in wire.chunks(step) {
            let mut complete = decoder.feed(piece).unwrap();
            while complete {
                let (_, body, rest) = decoder.into_parts().unwrap();
                decoded.push(body.to_vec());
                decoder = RequestDecoder::with_buffer(rest);
                complete = decoder.advance().unwrap();
            }
        }
        prop_assert!(!decoder.has_partial());
        prop_assert_eq!(decoded, bodies);
    }

    #[test]
    fn prop_ws_frame_split_invariant(
        payload in proptest::collection::vec(any::<u8>(), 0..70_000),
        masked in any::<bool>(),
        step in 1usize..4096,
    ) {
        let mask = masked.then_some([0x37, 0xfa, 0x21, 0x3d]);
        let wire = encode_frame_with(true, OpCode::Binary, &payload, mask).unwrap();
        let role = if masked { Role::Server } else { Role::Client };
        let decoder = FrameDecoder::new(role, 1 << 20);

        let mut buf = BytesMut::new();
        let mut frame: Option<Frame> = None;
        for piece in wire.chunks(step) {
            prop_assert!(frame.is_none());
            buf.extend_from_slice(piece);
            frame = decoder.decode(&mut buf).unwrap();
        }
        let frame = frame.unwrap();
        prop_assert!(buf.is_empty());
        prop_assert_eq!(frame.opcode, OpCode::Binary);
        prop_assert_eq!(&frame.payload[..], &payload[..]);
    }
}
