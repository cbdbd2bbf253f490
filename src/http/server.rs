//! HTTP/1.1 server side.
//!
//! One task per accepted connection. Each task runs server exchanges in a
//! keep-alive loop: read a request (pipelined bytes included), hand it to
//! the [`Handler`], write the response, repeat until either side asks to
//! close, the idle timer fires or the server shuts down. Requests that ask
//! for a WebSocket upgrade leave the loop and become a [`WebSocket`] session.

use crate::base::events::{Observers, RequestInfo};
use crate::base::loadstate::{Direction, ExchangeState};
use crate::base::neterror::NetError;
use crate::http::codec::{self, RequestDecoder, RequestHead};
use crate::http::exchange::{next_exchange_id, Exchange};
use crate::socket::client::SocketType;
use crate::socket::stream::BoxedSocket;
use crate::ws::connection::{SessionInit, WebSocket, WebSocketConfig};
use crate::ws::frame::Role;
use crate::ws::handshake;
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode, Version};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

const READ_BUF_SIZE: usize = 8 * 1024;

/// Server tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// How long an idle keep-alive connection waits for the next request.
    pub keep_alive_timeout: Duration,
    /// Time allowed to receive one request once its first byte arrived.
    pub request_timeout: Duration,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
    /// How long shutdown waits for in-flight connections before aborting them.
    pub shutdown_grace: Duration,
    pub websocket: WebSocketConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            keep_alive_timeout: Duration::from_secs(75),
            request_timeout: Duration::from_secs(30),
            max_header_bytes: codec::MAX_HEADER_BYTES,
            max_body_bytes: 16 << 20,
            shutdown_grace: Duration::from_secs(10),
            websocket: WebSocketConfig::default(),
        }
    }
}

/// A request as the handler sees it, body fully read.
#[derive(Debug, Clone)]
pub struct ServerRequest {
    head: RequestHead,
    body: Bytes,
    peer_addr: SocketAddr,
}

impl ServerRequest {
    pub fn new(head: RequestHead, body: Bytes, peer_addr: SocketAddr) -> Self {
        Self {
            head,
            body,
            peer_addr,
        }
    }

    pub fn method(&self) -> &Method {
        &self.head.method
    }

    /// Request target as sent, e.g. `/search?q=1`.
    pub fn target(&self) -> &str {
        &self.head.target
    }

    pub fn path(&self) -> &str {
        self.head.target.split('?').next().unwrap_or("/")
    }

    pub fn query(&self) -> Option<&str> {
        self.head.target.split_once('?').map(|(_, q)| q)
    }

    pub fn version(&self) -> Version {
        self.head.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|_| NetError::InvalidUtf8)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

/// A response built by a handler.
#[derive(Debug, Clone)]
pub struct ServerResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl ServerResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// `200 OK` with a plain-text body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::text(StatusCode::OK, body)
    }

    pub fn text(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self::new(status)
            .with_header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            )
            .with_body(body)
    }

    #[cfg(feature = "json")]
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Self, NetError> {
        let body = serde_json::to_vec(value).map_err(|_| NetError::JsonParseError)?;
        Ok(Self::new(status)
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(body))
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Application callback for server exchanges.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: ServerRequest) -> BoxFuture<'_, ServerResponse>;

    /// Whether to accept a WebSocket upgrade for this request. Refused
    /// upgrades are handled as ordinary requests.
    fn accepts_websocket(&self, _head: &RequestHead) -> bool {
        false
    }

    /// Drive an accepted session. Runs on the connection's own task.
    fn websocket(&self, _ws: WebSocket, _request: RequestHead) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Adapts an async closure into a [`Handler`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Build a [`Handler`] from `async fn(ServerRequest) -> ServerResponse`.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(ServerRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServerResponse> + Send + 'static,
{
    HandlerFn { f }
}

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(ServerRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServerResponse> + Send + 'static,
{
    fn handle(&self, request: ServerRequest) -> BoxFuture<'_, ServerResponse> {
        Box::pin((self.f)(request))
    }
}

struct ConnContext {
    handler: Arc<dyn Handler>,
    config: ServerConfig,
    observers: Observers,
}

/// Accepts connections and runs server exchanges on them.
pub struct HttpServer {
    listener: TcpListener,
    config: ServerConfig,
    observers: Observers,
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("config", &self.config)
            .finish()
    }
}

impl HttpServer {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, NetError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::warn!(error = %e, "bind failed");
            NetError::from_io(&e)
        })?;
        Ok(Self {
            listener,
            config: ServerConfig::default(),
            observers: Observers::default(),
        })
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        self.listener.local_addr().map_err(|e| NetError::from_io(&e))
    }

    /// Serve until the task is dropped.
    pub async fn serve<H: Handler>(self, handler: H) -> Result<(), NetError> {
        self.serve_with_shutdown(handler, std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then stop accepting, let open
    /// connections finish their current exchange, and return.
    pub async fn serve_with_shutdown<H, F>(self, handler: H, shutdown: F) -> Result<(), NetError>
    where
        H: Handler,
        F: Future<Output = ()>,
    {
        let local = self.local_addr()?;
        tracing::info!(%local, "server listening");

        let ctx = Arc::new(ConnContext {
            handler: Arc::new(handler),
            config: self.config,
            observers: self.observers,
        });
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::trace!(%peer, "accepted connection");
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            ctx.clone(),
                            stop_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        // Usually fd exhaustion; back off instead of spinning.
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        tracing::info!(%local, open = connections.len(), "server shutting down");
        drop(self.listener);
        let _ = stop_tx.send(true);

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(ctx.config.shutdown_grace, drain).await.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                "aborting connections after grace period"
            );
            connections.abort_all();
        }
        Ok(())
    }
}

/// Bind `addr` and serve `handler` until the task is dropped.
pub async fn serve<H: Handler>(addr: impl ToSocketAddrs, handler: H) -> Result<(), NetError> {
    HttpServer::bind(addr).await?.serve(handler).await
}

enum ReadOutcome {
    Request,
    /// The connection ended cleanly between requests.
    Closed,
}

async fn read_request(
    stream: &mut TcpStream,
    decoder: &mut RequestDecoder,
    config: &ServerConfig,
    stop: &mut watch::Receiver<bool>,
) -> Result<ReadOutcome, NetError> {
    if decoder.advance()? {
        return Ok(ReadOutcome::Request);
    }

    let mut tmp = [0u8; READ_BUF_SIZE];
    if !decoder.has_partial() {
        if *stop.borrow() {
            return Ok(ReadOutcome::Closed);
        }
        let first = tokio::select! {
            _ = stop.changed() => return Ok(ReadOutcome::Closed),
            r = tokio::time::timeout(config.keep_alive_timeout, stream.read(&mut tmp)) => r,
        };
        let n = match first {
            Err(_) => {
                tracing::trace!("keep-alive timeout");
                return Ok(ReadOutcome::Closed);
            }
            Ok(Err(e)) => {
                tracing::trace!(error = %e, "read failed between requests");
                return Ok(ReadOutcome::Closed);
            }
            Ok(Ok(0)) => return Ok(ReadOutcome::Closed),
            Ok(Ok(n)) => n,
        };
        if decoder.feed(&tmp[..n])? {
            return Ok(ReadOutcome::Request);
        }
    }

    let deadline = Instant::now() + config.request_timeout;
    let mut continue_sent = false;
    loop {
        if !continue_sent && decoder.head().is_some_and(|h| h.expects_continue()) {
            stream
                .write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
                .await
                .map_err(|e| NetError::from_io(&e))?;
            continue_sent = true;
        }
        let n = match tokio::time::timeout_at(deadline, stream.read(&mut tmp)).await {
            Err(_) => return Err(NetError::TimedOut),
            Ok(r) => r.map_err(|e| NetError::from_io(&e))?,
        };
        if n == 0 {
            return Err(NetError::ConnectionClosed);
        }
        if decoder.feed(&tmp[..n])? {
            return Ok(ReadOutcome::Request);
        }
    }
}

fn error_status(error: &NetError) -> Option<StatusCode> {
    match error {
        NetError::ConnectionClosed
        | NetError::ConnectionReset
        | NetError::ConnectionAborted => None,
        NetError::TimedOut => Some(StatusCode::REQUEST_TIMEOUT),
        NetError::MsgTooBig => Some(StatusCode::PAYLOAD_TOO_LARGE),
        NetError::ResponseHeadersTooBig => Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
        _ => Some(StatusCode::BAD_REQUEST),
    }
}

async fn write_error(stream: &mut TcpStream, status: StatusCode) {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    let reason = status.canonical_reason().unwrap_or("error");
    let wire = codec::encode_response(status, &headers, reason.as_bytes(), false);
    let _ = stream.write_all(&wire).await;
    let _ = stream.shutdown().await;
}

/// Report a request that failed before it could be handed to the handler.
///
/// Observers get the method and target when the head parsed; otherwise the
/// request line is unknown and is reported as `GET` with an empty target.
fn report_unparsed(observers: &Observers, head: Option<&RequestHead>, error: &NetError) {
    let id = next_exchange_id();
    let mut exchange = Exchange::server(id);
    exchange.fail(error);
    let (method, target) = match head {
        Some(head) => (head.method.clone(), head.target.clone()),
        None => (Method::GET, String::new()),
    };
    let events = observers.track(RequestInfo::new(id, Direction::Server, method, target));
    events.error(error);
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ConnContext>,
    mut stop: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);
    let config = &ctx.config;
    let mut pending = BytesMut::new();

    loop {
        let mut decoder = RequestDecoder::with_buffer(std::mem::take(&mut pending))
            .with_limits(config.max_header_bytes, Some(config.max_body_bytes));

        match read_request(&mut stream, &mut decoder, config, &mut stop).await {
            Ok(ReadOutcome::Request) => {}
            Ok(ReadOutcome::Closed) => return,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "bad request");
                report_unparsed(&ctx.observers, decoder.head(), &e);
                if let Some(status) = error_status(&e) {
                    write_error(&mut stream, status).await;
                }
                return;
            }
        }

        let (head, body, rest) = match decoder.into_parts() {
            Ok(parts) => parts,
            Err(e) => {
                report_unparsed(&ctx.observers, None, &e);
                write_error(&mut stream, StatusCode::BAD_REQUEST).await;
                return;
            }
        };
        pending = rest;

        let id = next_exchange_id();
        let mut exchange = Exchange::server(id);
        exchange.advance(ExchangeState::ReceivingBody);
        let events = ctx.observers.track(RequestInfo::new(
            id,
            Direction::Server,
            head.method.clone(),
            head.target.clone(),
        ));

        if handshake::is_upgrade_request(&head) && ctx.handler.accepts_websocket(&head) {
            let headers = match handshake::accept_request(&head) {
                Ok(headers) => headers,
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "rejected websocket upgrade");
                    exchange.fail(&e);
                    events.error(&e);
                    write_error(&mut stream, StatusCode::BAD_REQUEST).await;
                    return;
                }
            };
            exchange.advance(ExchangeState::SendingHeaders);
            let wire =
                codec::encode_response(StatusCode::SWITCHING_PROTOCOLS, &headers, b"", false);
            if let Err(e) = stream.write_all(&wire).await {
                let err = NetError::from_io(&e);
                exchange.fail(&err);
                events.error(&err);
                return;
            }
            exchange.advance(ExchangeState::Open);

            let init = SessionInit {
                exchange_id: id,
                events: Some(events),
                url: None,
                protocol: None,
            };
            let ws = WebSocket::with_init(
                BoxedSocket::new(SocketType::Tcp(stream)),
                pending.freeze(),
                Role::Server,
                config.websocket.clone(),
                init,
            );
            ctx.handler.websocket(ws, head).await;
            return;
        }

        let head_only = head.method == Method::HEAD;
        let keep_alive = head.keep_alive() && !*stop.borrow();
        let request = ServerRequest::new(head, body, peer);
        let mut response = ctx.handler.handle(request).await;

        let keep_alive = keep_alive && codec::wants_keep_alive(Version::HTTP_11, &response.headers);
        if !keep_alive {
            response
                .headers
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
        }

        exchange.advance(ExchangeState::SendingHeaders);
        let wire = codec::encode_response(
            response.status,
            &response.headers,
            &response.body,
            head_only,
        );
        if !response.body.is_empty() && !head_only {
            exchange.advance(ExchangeState::SendingBody);
        }
        if let Err(e) = stream.write_all(&wire).await {
            let err = NetError::from_io(&e);
            exchange.fail(&err);
            events.error(&err);
            return;
        }
        exchange.advance(ExchangeState::Complete);
        events.complete(response.status);

        if !keep_alive {
            let _ = stream.shutdown().await;
            return;
        }
    }
}
