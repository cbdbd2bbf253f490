//! HTTP/1.1 message framing.
//!
//! Encoding is a pure function of its inputs. Decoding is incremental: bytes
//! are fed as they arrive, in chunks of any size, and the decoder reports
//! when a whole message has been framed. Heads are parsed with `httparse`;
//! bodies are delimited by `Content-Length`, the chunked transfer coding or
//! connection close, per RFC 9112 section 6.3.

use crate::base::neterror::NetError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode, Version};
use std::fmt::Write as _;

/// Largest head (start line + headers) either decoder accepts.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;
const MAX_HEADERS: usize = 128;
const MAX_CHUNK_SIZE_LINE: usize = 4096;

/// How a message body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Request,
    Response,
}

impl Side {
    fn invalid(self, msg: impl Into<String>) -> NetError {
        match self {
            Side::Request => NetError::InvalidHttpRequest(msg.into()),
            Side::Response => NetError::InvalidHttpResponse(msg.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn method_expects_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn put_headers(out: &mut BytesMut, headers: &HeaderMap) {
    for (name, value) in headers {
        out.put_slice(name.as_str().as_bytes());
        out.put_slice(b": ");
        out.put_slice(value.as_bytes());
        out.put_slice(b"\r\n");
    }
}

fn put_content_length(out: &mut BytesMut, len: usize) {
    let mut line = String::with_capacity(24);
    let _ = write!(line, "content-length: {len}\r\n");
    out.put_slice(line.as_bytes());
}

fn put_chunked(out: &mut BytesMut, body: &[u8]) {
    if !body.is_empty() {
        let mut size = String::with_capacity(10);
        let _ = write!(size, "{:x}\r\n", body.len());
        out.put_slice(size.as_bytes());
        out.put_slice(body);
        out.put_slice(b"\r\n");
    }
    out.put_slice(b"0\r\n\r\n");
}

/// Serialize a request.
///
/// `Content-Length` is added when the caller set neither it nor
/// `Transfer-Encoding` and the request carries (or by method expects) a
/// body. A `Transfer-Encoding: chunked` header makes `body` go out as a
/// single chunk.
pub fn encode_request(
    method: &Method,
    target: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Bytes, NetError> {
    if target.is_empty() || target.bytes().any(|b| b <= b' ' || b == 0x7f) {
        return Err(NetError::InvalidHttpRequest(format!(
            "invalid request target {target:?}"
        )));
    }

    let chunked = match transfer_chunked(headers, Side::Request)? {
        Some(true) => true,
        Some(false) => {
            return Err(NetError::InvalidHttpRequest(
                "request transfer coding must end in chunked".into(),
            ))
        }
        None => false,
    };
    let declared = content_length(headers, Side::Request)?;
    if let Some(len) = declared {
        if !chunked && len != body.len() as u64 {
            return Err(NetError::InvalidHttpRequest(format!(
                "content-length {len} does not match body of {} bytes",
                body.len()
            )));
        }
    }

    let mut out = BytesMut::with_capacity(256 + body.len());
    out.put_slice(method.as_str().as_bytes());
    out.put_u8(b' ');
    out.put_slice(target.as_bytes());
    out.put_slice(b" HTTP/1.1\r\n");
    put_headers(&mut out, headers);
    if !chunked && declared.is_none() && (!body.is_empty() || method_expects_body(method)) {
        put_content_length(&mut out, body.len());
    }
    out.put_slice(b"\r\n");

    if chunked {
        put_chunked(&mut out, body);
    } else {
        out.put_slice(body);
    }
    Ok(out.freeze())
}

fn status_allows_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// Serialize a response. With `head_only` the body is measured but not sent.
pub fn encode_response(
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
    head_only: bool,
) -> Bytes {
    let chunked = matches!(transfer_chunked(headers, Side::Response), Ok(Some(true)));
    let allows_body = status_allows_body(status);

    let mut out = BytesMut::with_capacity(128 + body.len());
    let mut line = String::with_capacity(40);
    let _ = write!(
        line,
        "HTTP/1.1 {} {}\r\n",
        status.as_str(),
        status.canonical_reason().unwrap_or("")
    );
    out.put_slice(line.as_bytes());
    put_headers(&mut out, headers);
    if allows_body && !chunked && !headers.contains_key(header::CONTENT_LENGTH) {
        put_content_length(&mut out, body.len());
    }
    out.put_slice(b"\r\n");

    if allows_body && !head_only {
        if chunked {
            put_chunked(&mut out, body);
        } else {
            out.put_slice(body);
        }
    }
    out.freeze()
}

// ---------------------------------------------------------------------------
// Header semantics
// ---------------------------------------------------------------------------

fn connection_has(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Persistent-connection rule of RFC 9112 section 9.3.
pub fn wants_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    if connection_has(headers, "close") {
        false
    } else if version == Version::HTTP_10 {
        connection_has(headers, "keep-alive")
    } else {
        true
    }
}

/// `None` when absent. All values (repeated headers or comma lists) must agree.
fn content_length(headers: &HeaderMap, side: Side) -> Result<Option<u64>, NetError> {
    let mut found: Option<u64> = None;
    for value in headers.get_all(header::CONTENT_LENGTH) {
        let text = value
            .to_str()
            .map_err(|_| side.invalid("non-ascii content-length"))?;
        for part in text.split(',') {
            let part = part.trim();
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(side.invalid(format!("invalid content-length {part:?}")));
            }
            let n: u64 = part
                .parse()
                .map_err(|_| side.invalid("content-length overflow"))?;
            match found {
                Some(prev) if prev != n => {
                    return Err(match side {
                        Side::Response => NetError::ResponseHeadersMultipleContentLength,
                        Side::Request => side.invalid("conflicting content-length"),
                    })
                }
                _ => found = Some(n),
            }
        }
    }
    Ok(found)
}

/// `None` when absent, otherwise whether the final coding is `chunked`.
fn transfer_chunked(headers: &HeaderMap, side: Side) -> Result<Option<bool>, NetError> {
    let mut codings = Vec::new();
    for value in headers.get_all(header::TRANSFER_ENCODING) {
        let text = value
            .to_str()
            .map_err(|_| side.invalid("non-ascii transfer-encoding"))?;
        codings.extend(
            text.split(',')
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty()),
        );
    }
    let Some((last, rest)) = codings.split_last() else {
        return Ok(None);
    };
    if rest.iter().any(|c| c == "chunked") {
        return Err(side.invalid("chunked must be the final transfer coding"));
    }
    Ok(Some(last == "chunked"))
}

fn to_header_map(raw: &[httparse::Header<'_>], side: Side) -> Result<HeaderMap, NetError> {
    let mut map = HeaderMap::with_capacity(raw.len());
    for h in raw {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|_| side.invalid(format!("invalid header name {:?}", h.name)))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|_| side.invalid(format!("invalid value for header {}", h.name)))?;
        map.append(name, value);
    }
    Ok(map)
}

fn to_version(minor: Option<u8>) -> Version {
    match minor {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    }
}

// ---------------------------------------------------------------------------
// Body framing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data,
    DataEnd,
    Trailer,
    Done,
}

#[derive(Debug)]
struct BodyDecoder {
    framing: Framing,
    remaining: u64,
    chunk: ChunkState,
    body: BytesMut,
    limit: Option<usize>,
    done: bool,
}

impl BodyDecoder {
    fn new(framing: Framing, limit: Option<usize>) -> Self {
        let (remaining, done) = match framing {
            Framing::Empty => (0, true),
            Framing::Length(n) => (n, n == 0),
            Framing::Chunked | Framing::UntilClose => (0, false),
        };
        Self {
            framing,
            remaining,
            chunk: ChunkState::Size,
            body: BytesMut::new(),
            limit,
            done,
        }
    }

    fn push(&mut self, data: &[u8]) -> Result<(), NetError> {
        if let Some(limit) = self.limit {
            if self.body.len() + data.len() > limit {
                return Err(NetError::MsgTooBig);
            }
        }
        self.body.extend_from_slice(data);
        Ok(())
    }

    /// Move framed body bytes out of `buf`. Returns true once complete.
    fn decode(&mut self, buf: &mut BytesMut) -> Result<bool, NetError> {
        if self.done {
            return Ok(true);
        }
        match self.framing {
            Framing::Empty => self.done = true,
            Framing::Length(_) => {
                let take = self.remaining.min(buf.len() as u64) as usize;
                let data = buf.split_to(take);
                self.push(&data)?;
                self.remaining -= take as u64;
                self.done = self.remaining == 0;
            }
            Framing::UntilClose => {
                let data = buf.split();
                self.push(&data)?;
            }
            Framing::Chunked => self.decode_chunked(buf)?,
        }
        Ok(self.done)
    }

    fn decode_chunked(&mut self, buf: &mut BytesMut) -> Result<(), NetError> {
        loop {
            match self.chunk {
                ChunkState::Size => {
                    let Some(line) = take_line(buf, MAX_CHUNK_SIZE_LINE)? else {
                        return Ok(());
                    };
                    let size = parse_chunk_size(&line)?;
                    if size == 0 {
                        self.chunk = ChunkState::Trailer;
                    } else {
                        self.remaining = size;
                        self.chunk = ChunkState::Data;
                    }
                }
                ChunkState::Data => {
                    if buf.is_empty() {
                        return Ok(());
                    }
                    let take = self.remaining.min(buf.len() as u64) as usize;
                    let data = buf.split_to(take);
                    self.push(&data)?;
                    self.remaining -= take as u64;
                    if self.remaining == 0 {
                        self.chunk = ChunkState::DataEnd;
                    }
                }
                ChunkState::DataEnd => {
                    if buf.len() < 2 {
                        return Ok(());
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(NetError::InvalidChunkedEncoding);
                    }
                    buf.advance(2);
                    self.chunk = ChunkState::Size;
                }
                ChunkState::Trailer => {
                    // Trailer fields are read and dropped.
                    let Some(line) = take_line(buf, MAX_HEADER_BYTES)? else {
                        return Ok(());
                    };
                    if line.is_empty() {
                        self.chunk = ChunkState::Done;
                        self.done = true;
                        return Ok(());
                    }
                }
                ChunkState::Done => return Ok(()),
            }
        }
    }

    fn finish_eof(&mut self) -> Result<(), NetError> {
        if self.done {
            return Ok(());
        }
        match self.framing {
            Framing::Empty => Ok(()),
            Framing::UntilClose => {
                self.done = true;
                Ok(())
            }
            Framing::Length(_) => Err(NetError::ContentLengthMismatch),
            Framing::Chunked => Err(NetError::IncompleteChunkedEncoding),
        }
    }
}

/// Split off one CRLF-terminated line, terminator dropped. `None` if incomplete.
fn take_line(buf: &mut BytesMut, max: usize) -> Result<Option<BytesMut>, NetError> {
    match buf.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => {
            let line = buf.split_to(pos);
            buf.advance(2);
            Ok(Some(line))
        }
        None if buf.len() > max => Err(NetError::InvalidChunkedEncoding),
        None => Ok(None),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, NetError> {
    let size = match line.iter().position(|&b| b == b';') {
        Some(ext) => &line[..ext],
        None => line,
    };
    let size = std::str::from_utf8(size)
        .map_err(|_| NetError::InvalidChunkedEncoding)?
        .trim_matches(|c| c == ' ' || c == '\t');
    if size.is_empty() || size.len() > 16 || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(NetError::InvalidChunkedEncoding);
    }
    u64::from_str_radix(size, 16).map_err(|_| NetError::InvalidChunkedEncoding)
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub reason: String,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn keep_alive(&self) -> bool {
        wants_keep_alive(self.version, &self.headers)
    }
}

/// Body framing for a response to `method`.
pub fn response_framing(method: &Method, head: &ResponseHead) -> Result<Framing, NetError> {
    if *method == Method::HEAD || !status_allows_body(head.status) {
        return Ok(Framing::Empty);
    }
    // Transfer-Encoding overrides Content-Length.
    match transfer_chunked(&head.headers, Side::Response)? {
        Some(true) => return Ok(Framing::Chunked),
        Some(false) => return Ok(Framing::UntilClose),
        None => {}
    }
    Ok(match content_length(&head.headers, Side::Response)? {
        Some(0) => Framing::Empty,
        Some(n) => Framing::Length(n),
        None => Framing::UntilClose,
    })
}

/// Incremental response decoder for one exchange.
///
/// Interim `1xx` responses are consumed and skipped, except `101`, which
/// completes the message with no body and leaves the upgraded stream's
/// first bytes in [`take_remaining`](Self::take_remaining).
#[derive(Debug)]
pub struct ResponseDecoder {
    method: Method,
    buf: BytesMut,
    head: Option<ResponseHead>,
    body: Option<BodyDecoder>,
    max_header_bytes: usize,
    skipped_interim: usize,
}

impl ResponseDecoder {
    pub fn new(method: &Method) -> Self {
        Self {
            method: method.clone(),
            buf: BytesMut::new(),
            head: None,
            body: None,
            max_header_bytes: MAX_HEADER_BYTES,
            skipped_interim: 0,
        }
    }

    pub fn with_max_header_bytes(mut self, max: usize) -> Self {
        self.max_header_bytes = max;
        self
    }

    /// Append `data` and decode as far as possible. Returns true once the
    /// whole message has been framed.
    pub fn feed(&mut self, data: &[u8]) -> Result<bool, NetError> {
        self.buf.extend_from_slice(data);
        self.advance()
    }

    fn advance(&mut self) -> Result<bool, NetError> {
        while self.head.is_none() {
            let Some(head) = self.parse_head()? else {
                return Ok(false);
            };
            if head.status.is_informational() && head.status != StatusCode::SWITCHING_PROTOCOLS {
                tracing::trace!(status = %head.status, "skipping interim response");
                self.skipped_interim += 1;
                continue;
            }
            let framing = response_framing(&self.method, &head)?;
            tracing::trace!(status = %head.status, ?framing, "response head decoded");
            self.body = Some(BodyDecoder::new(framing, None));
            self.head = Some(head);
        }

        match self.body.as_mut() {
            Some(body) => body.decode(&mut self.buf),
            None => Ok(false),
        }
    }

    fn parse_head(&mut self) -> Result<Option<ResponseHead>, NetError> {
        let (len, head) = {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut res = httparse::Response::new(&mut headers);
            let len = match res.parse(&self.buf) {
                Ok(httparse::Status::Complete(len)) => len,
                Ok(httparse::Status::Partial) => {
                    if self.buf.len() > self.max_header_bytes {
                        return Err(NetError::ResponseHeadersTooBig);
                    }
                    return Ok(None);
                }
                Err(httparse::Error::TooManyHeaders) => return Err(NetError::ResponseHeadersTooBig),
                Err(e) => return Err(NetError::InvalidHttpResponse(e.to_string())),
            };
            if len > self.max_header_bytes {
                return Err(NetError::ResponseHeadersTooBig);
            }

            let code = res.code.unwrap_or(0);
            let status = StatusCode::from_u16(code)
                .map_err(|_| NetError::InvalidHttpResponse(format!("invalid status {code}")))?;
            let head = ResponseHead {
                status,
                version: to_version(res.version),
                reason: res.reason.unwrap_or("").to_string(),
                headers: to_header_map(res.headers, Side::Response)?,
            };
            (len, head)
        };
        self.buf.advance(len);
        Ok(Some(head))
    }

    /// The peer closed the stream. Completes an until-close body, or
    /// reports how the message was cut short.
    pub fn finish_eof(&mut self) -> Result<(), NetError> {
        match self.body.as_mut() {
            Some(body) => body.finish_eof(),
            None if self.buf.is_empty() && self.skipped_interim == 0 => {
                Err(NetError::EmptyResponse)
            }
            None => Err(NetError::InvalidHttpResponse(
                "connection closed inside response head".into(),
            )),
        }
    }

    pub fn head(&self) -> Option<&ResponseHead> {
        self.head.as_ref()
    }

    /// Body bytes decoded so far.
    pub fn body(&self) -> &[u8] {
        self.body.as_ref().map(|b| &b.body[..]).unwrap_or(&[])
    }

    pub fn framing(&self) -> Option<Framing> {
        self.body.as_ref().map(|b| b.framing)
    }

    pub fn is_complete(&self) -> bool {
        self.body.as_ref().is_some_and(|b| b.done)
    }

    /// Whether the connection may carry another exchange after this one.
    pub fn is_reusable(&self) -> bool {
        let Some(head) = &self.head else {
            return false;
        };
        self.is_complete()
            && head.keep_alive()
            && head.status != StatusCode::SWITCHING_PROTOCOLS
            && self.framing() != Some(Framing::UntilClose)
            && self.buf.is_empty()
    }

    /// Bytes received past the end of the message.
    pub fn take_remaining(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Head and full body of a completed message.
    pub fn into_parts(self) -> Result<(ResponseHead, Bytes), NetError> {
        match (self.head, self.body) {
            (Some(head), Some(body)) if body.done => Ok((head, body.body.freeze())),
            _ => Err(NetError::InvalidHttpResponse("response incomplete".into())),
        }
    }
}

/// Feed `bytes` into `state`; returns whether the response is complete.
pub fn decode_response(state: &mut ResponseDecoder, bytes: &[u8]) -> Result<bool, NetError> {
    state.feed(bytes)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request line and headers.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn keep_alive(&self) -> bool {
        wants_keep_alive(self.version, &self.headers)
    }

    pub fn expects_continue(&self) -> bool {
        self.headers
            .get(header::EXPECT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    }
}

fn request_framing(head: &RequestHead) -> Result<Framing, NetError> {
    match transfer_chunked(&head.headers, Side::Request)? {
        Some(true) => return Ok(Framing::Chunked),
        Some(false) => {
            return Err(NetError::InvalidHttpRequest(
                "request transfer coding must end in chunked".into(),
            ))
        }
        None => {}
    }
    Ok(match content_length(&head.headers, Side::Request)? {
        Some(0) | None => Framing::Empty,
        Some(n) => Framing::Length(n),
    })
}

/// Incremental request decoder for the server side.
#[derive(Debug)]
pub struct RequestDecoder {
    buf: BytesMut,
    head: Option<RequestHead>,
    body: Option<BodyDecoder>,
    max_header_bytes: usize,
    max_body_bytes: Option<usize>,
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self::with_buffer(BytesMut::new())
    }

    /// Start from bytes left over by a previous message (pipelining).
    pub fn with_buffer(buf: BytesMut) -> Self {
        Self {
            buf,
            head: None,
            body: None,
            max_header_bytes: MAX_HEADER_BYTES,
            max_body_bytes: None,
        }
    }

    pub fn with_limits(mut self, max_header_bytes: usize, max_body_bytes: Option<usize>) -> Self {
        self.max_header_bytes = max_header_bytes;
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn feed(&mut self, data: &[u8]) -> Result<bool, NetError> {
        self.buf.extend_from_slice(data);
        self.advance()
    }

    /// Decode whatever is already buffered.
    pub fn advance(&mut self) -> Result<bool, NetError> {
        if self.head.is_none() {
            // Tolerate stray CRLFs between pipelined requests.
            while self.buf.starts_with(b"\r\n") {
                self.buf.advance(2);
            }
            let Some(head) = self.parse_head()? else {
                return Ok(false);
            };
            let framing = request_framing(&head)?;
            if let (Framing::Length(n), Some(limit)) = (framing, self.max_body_bytes) {
                if n > limit as u64 {
                    // Keep the head so the failure can name the request.
                    self.head = Some(head);
                    return Err(NetError::MsgTooBig);
                }
            }
            self.body = Some(BodyDecoder::new(framing, self.max_body_bytes));
            self.head = Some(head);
        }
        match self.body.as_mut() {
            Some(body) => body.decode(&mut self.buf),
            None => Ok(false),
        }
    }

    fn parse_head(&mut self) -> Result<Option<RequestHead>, NetError> {
        let (len, head) = {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut req = httparse::Request::new(&mut headers);
            let len = match req.parse(&self.buf) {
                Ok(httparse::Status::Complete(len)) => len,
                Ok(httparse::Status::Partial) => {
                    if self.buf.len() > self.max_header_bytes {
                        return Err(NetError::ResponseHeadersTooBig);
                    }
                    return Ok(None);
                }
                Err(httparse::Error::TooManyHeaders) => return Err(NetError::ResponseHeadersTooBig),
                Err(e) => return Err(NetError::InvalidHttpRequest(e.to_string())),
            };
            if len > self.max_header_bytes {
                return Err(NetError::ResponseHeadersTooBig);
            }

            let method = Method::from_bytes(req.method.unwrap_or("").as_bytes())
                .map_err(|_| NetError::InvalidHttpRequest("invalid method".into()))?;
            let head = RequestHead {
                method,
                target: req.path.unwrap_or("/").to_string(),
                version: to_version(req.version),
                headers: to_header_map(req.headers, Side::Request)?,
            };
            (len, head)
        };
        self.buf.advance(len);
        Ok(Some(head))
    }

    /// True if some bytes of a request have been received.
    pub fn has_partial(&self) -> bool {
        self.head.is_some() || !self.buf.is_empty()
    }

    pub fn head(&self) -> Option<&RequestHead> {
        self.head.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.body.as_ref().is_some_and(|b| b.done)
    }

    /// Split into head, body and any bytes of the next pipelined request.
    pub fn into_parts(self) -> Result<(RequestHead, Bytes, BytesMut), NetError> {
        match (self.head, self.body) {
            (Some(head), Some(body)) if body.done => Ok((head, body.body.freeze(), self.buf)),
            _ => Err(NetError::InvalidHttpRequest("request incomplete".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_encode_get() {
        let wire = encode_request(&Method::GET, "/", &headers(&[("host", "a.test")]), b"").unwrap();
        assert_eq!(&wire[..], b"GET / HTTP/1.1\r\nhost: a.test\r\n\r\n");
    }

    #[test]
    fn test_encode_post_adds_length() {
        let wire = encode_request(&Method::POST, "/p", &HeaderMap::new(), b"abc").unwrap();
        assert_eq!(&wire[..], b"POST /p HTTP/1.1\r\ncontent-length: 3\r\n\r\nabc");

        let empty = encode_request(&Method::PUT, "/p", &HeaderMap::new(), b"").unwrap();
        assert!(empty.ends_with(b"content-length: 0\r\n\r\n"));
    }

    #[test]
    fn test_encode_chunked_request() {
        let h = headers(&[("transfer-encoding", "chunked")]);
        let wire = encode_request(&Method::POST, "/", &h, b"hello").unwrap();
        assert!(wire.ends_with(b"\r\n\r\n5\r\nhello\r\n0\r\n\r\n"));
    }

    #[test]
    fn test_encode_rejects_bad_target_and_length() {
        assert!(encode_request(&Method::GET, "/a b", &HeaderMap::new(), b"").is_err());
        let h = headers(&[("content-length", "10")]);
        assert!(matches!(
            encode_request(&Method::POST, "/", &h, b"short"),
            Err(NetError::InvalidHttpRequest(_))
        ));
    }

    #[test]
    fn test_decode_content_length() {
        let mut dec = ResponseDecoder::new(&Method::GET);
        let done = dec
            .feed(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
            .unwrap();
        assert!(done);
        assert!(dec.is_reusable());
        let (head, body) = dec.into_parts().unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(&body[..], b"hello");
    }

    #[test]
    fn test_decode_partial_then_complete() {
        let mut dec = ResponseDecoder::new(&Method::GET);
        assert!(!dec.feed(b"HTTP/1.1 200 OK\r\nContent-Le").unwrap());
        assert!(dec.head().is_none());
        assert!(!dec.feed(b"ngth: 4\r\n\r\nab").unwrap());
        assert_eq!(dec.head().unwrap().status, 200);
        assert_eq!(dec.body(), b"ab");
        assert!(dec.feed(b"cd").unwrap());
        assert_eq!(dec.body(), b"abcd");
    }

    #[test]
    fn test_decode_chunked_with_extension_and_trailer() {
        let mut dec = ResponseDecoder::new(&Method::GET);
        let wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                     4;name=val\r\nWiki\r\n5\r\npedia\r\n0\r\nExpires: never\r\n\r\n";
        assert!(dec.feed(wire).unwrap());
        assert_eq!(dec.body(), b"Wikipedia");
        assert!(dec.is_reusable());
    }

    #[test]
    fn test_decode_chunked_byte_at_a_time() {
        let wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\na\r\n0123456789\r\n0\r\n\r\n";
        let mut dec = ResponseDecoder::new(&Method::GET);
        let mut done = false;
        for b in wire.iter() {
            assert!(!done, "completed before the last byte");
            done = dec.feed(std::slice::from_ref(b)).unwrap();
        }
        assert!(done);
        assert_eq!(dec.body(), b"abc0123456789");
    }

    #[test]
    fn test_chunked_beats_content_length() {
        let mut dec = ResponseDecoder::new(&Method::GET);
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\n0\r\n\r\n";
        assert!(dec.feed(wire).unwrap());
        assert_eq!(dec.body(), b"ok");
    }

    #[test]
    fn test_bad_chunk_size() {
        let mut dec = ResponseDecoder::new(&Method::GET);
        let err = dec
            .feed(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n")
            .unwrap_err();
        assert_eq!(err, NetError::InvalidChunkedEncoding);
        assert_eq!(err.kind(), crate::base::ErrorKind::Protocol);
    }

    #[test]
    fn test_missing_chunk_crlf() {
        let mut dec = ResponseDecoder::new(&Method::GET);
        let err = dec
            .feed(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nokXX")
            .unwrap_err();
        assert_eq!(err, NetError::InvalidChunkedEncoding);
    }

    #[test]
    fn test_conflicting_content_length() {
        let mut dec = ResponseDecoder::new(&Method::GET);
        let err = dec
            .feed(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\n")
            .unwrap_err();
        assert_eq!(err, NetError::ResponseHeadersMultipleContentLength);

        // Repeated but equal values are accepted.
        let mut dec = ResponseDecoder::new(&Method::GET);
        assert!(dec
            .feed(b"HTTP/1.1 200 OK\r\nContent-Length: 2, 2\r\n\r\nhi")
            .unwrap());
    }

    #[test]
    fn test_garbage_is_protocol_error() {
        let mut dec = ResponseDecoder::new(&Method::GET);
        let err = dec.feed(b"SMTP ready\r\n\r\n").unwrap_err();
        assert!(matches!(err, NetError::InvalidHttpResponse(_)));
    }

    #[test]
    fn test_bodiless_responses() {
        let mut dec = ResponseDecoder::new(&Method::HEAD);
        assert!(dec.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n").unwrap());
        assert!(dec.body().is_empty());

        for status in ["204 No Content", "304 Not Modified"] {
            let mut dec = ResponseDecoder::new(&Method::GET);
            let wire = format!("HTTP/1.1 {status}\r\nContent-Length: 10\r\n\r\n");
            assert!(dec.feed(wire.as_bytes()).unwrap());
            assert!(dec.body().is_empty());
        }
    }

    #[test]
    fn test_interim_skipped() {
        let mut dec = ResponseDecoder::new(&Method::POST);
        let wire = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nok";
        assert!(dec.feed(wire).unwrap());
        assert_eq!(dec.head().unwrap().status, StatusCode::CREATED);
    }

    #[test]
    fn test_switching_protocols_keeps_leftover() {
        let mut dec = ResponseDecoder::new(&Method::GET);
        let wire = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n\x81\x02hi";
        assert!(dec.feed(wire).unwrap());
        assert!(!dec.is_reusable());
        assert_eq!(&dec.take_remaining()[..], b"\x81\x02hi");
    }

    #[test]
    fn test_until_close() {
        let mut dec = ResponseDecoder::new(&Method::GET);
        assert!(!dec.feed(b"HTTP/1.0 200 OK\r\n\r\npart one ").unwrap());
        assert!(!dec.feed(b"part two").unwrap());
        dec.finish_eof().unwrap();
        assert!(dec.is_complete());
        assert!(!dec.is_reusable());
        assert_eq!(dec.body(), b"part one part two");
    }

    #[test]
    fn test_eof_errors() {
        let mut dec = ResponseDecoder::new(&Method::GET);
        assert_eq!(dec.finish_eof().unwrap_err(), NetError::EmptyResponse);

        let mut dec = ResponseDecoder::new(&Method::GET);
        dec.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc").unwrap();
        assert_eq!(dec.finish_eof().unwrap_err(), NetError::ContentLengthMismatch);

        let mut dec = ResponseDecoder::new(&Method::GET);
        dec.feed(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nab").unwrap();
        assert_eq!(dec.finish_eof().unwrap_err(), NetError::IncompleteChunkedEncoding);
    }

    #[test]
    fn test_header_limit() {
        let mut dec = ResponseDecoder::new(&Method::GET).with_max_header_bytes(64);
        let mut wire = b"HTTP/1.1 200 OK\r\nX-Long: ".to_vec();
        wire.extend(std::iter::repeat(b'a').take(100));
        assert_eq!(dec.feed(&wire).unwrap_err(), NetError::ResponseHeadersTooBig);
    }

    #[test]
    fn test_connection_close_not_reusable() {
        let mut dec = ResponseDecoder::new(&Method::GET);
        dec.feed(b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n")
            .unwrap();
        assert!(dec.is_complete());
        assert!(!dec.is_reusable());
    }

    #[test]
    fn test_keep_alive_rules() {
        assert!(wants_keep_alive(Version::HTTP_11, &HeaderMap::new()));
        assert!(!wants_keep_alive(Version::HTTP_10, &HeaderMap::new()));
        assert!(wants_keep_alive(
            Version::HTTP_10,
            &headers(&[("connection", "Keep-Alive")])
        ));
        assert!(!wants_keep_alive(
            Version::HTTP_11,
            &headers(&[("connection", "upgrade, close")])
        ));
    }

    #[test]
    fn test_encode_response_omits_body_for_head() {
        let wire = encode_response(StatusCode::OK, &HeaderMap::new(), b"hello", true);
        assert_eq!(&wire[..], b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\n");

        let wire = encode_response(StatusCode::NO_CONTENT, &HeaderMap::new(), b"", false);
        assert_eq!(&wire[..], b"HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[test]
    fn test_request_decoder_pipelined() {
        let mut dec = RequestDecoder::new();
        let wire = b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET /b HTTP/1.1\r\n\r\n";
        assert!(dec.feed(wire).unwrap());
        let (head, body, rest) = dec.into_parts().unwrap();
        assert_eq!(head.method, Method::POST);
        assert_eq!(head.target, "/a");
        assert_eq!(&body[..], b"abc");

        let mut next = RequestDecoder::with_buffer(rest);
        assert!(next.advance().unwrap());
        assert_eq!(next.head().unwrap().target, "/b");
    }

    #[test]
    fn test_request_body_limit() {
        let mut dec = RequestDecoder::new().with_limits(MAX_HEADER_BYTES, Some(4));
        let err = dec
            .feed(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n")
            .unwrap_err();
        assert_eq!(err, NetError::MsgTooBig);
    }

    #[test]
    fn test_request_rejects_non_chunked_coding() {
        let mut dec = RequestDecoder::new();
        let err = dec
            .feed(b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n")
            .unwrap_err();
        assert!(matches!(err, NetError::InvalidHttpRequest(_)));
    }
}
