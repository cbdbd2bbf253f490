//! An open WebSocket session.
//!
//! The session owns the upgraded stream, split into a read half and a write
//! half behind separate locks so one task can wait on [`WebSocket::recv`]
//! while others send. Pings are answered and a peer's close is echoed
//! without caller involvement.

use super::frame::{encode_frame_with, Frame, FrameDecoder, OpCode, Role};
use super::message::{CloseCode, CloseFrame, Message, Reassembler};
use crate::base::context::IoResultExt;
use crate::base::events::ExchangeEvents;
use crate::base::loadstate::{Direction, ExchangeState};
use crate::base::neterror::NetError;
use crate::client::Client;
use crate::http::exchange::Exchange;
use crate::socket::stream::BoxedSocket;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use url::Url;

/// Limits and timers for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Largest single frame payload accepted (default: 16 MiB).
    pub max_frame_size: usize,
    /// Largest reassembled message accepted (default: 64 MiB).
    pub max_message_size: usize,
    /// How long [`WebSocket::close`] waits for the peer's close frame.
    pub close_timeout: Duration,
    /// Answer pings automatically.
    pub auto_pong: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 16 << 20,
            max_message_size: 64 << 20,
            close_timeout: Duration::from_secs(5),
            auto_pong: true,
        }
    }
}

/// What the upgrade path knows about a session when it hands it over.
pub(crate) struct SessionInit {
    pub exchange_id: u64,
    pub events: Option<ExchangeEvents>,
    pub url: Option<Url>,
    pub protocol: Option<String>,
}

struct Reader {
    half: ReadHalf<BoxedSocket>,
    buf: BytesMut,
    decoder: FrameDecoder,
    assembler: Reassembler,
}

struct Shared {
    exchange: Exchange,
    close_sent: bool,
    close_received: bool,
    peer_close: Option<CloseFrame>,
    events: Option<ExchangeEvents>,
}

impl Shared {
    fn finish_closed(&mut self) {
        if self.exchange.state() == ExchangeState::Open {
            self.exchange.advance(ExchangeState::Closing);
        }
        self.exchange.advance(ExchangeState::Closed);
        if let Some(events) = self.events.take() {
            events.complete(StatusCode::SWITCHING_PROTOCOLS);
        }
    }

    fn finish_failed(&mut self, error: &NetError) {
        self.exchange.fail(error);
        if let Some(events) = self.events.take() {
            events.error(error);
        }
    }
}

struct Inner {
    role: Role,
    url: Option<Url>,
    protocol: Option<String>,
    config: WebSocketConfig,
    writer: Mutex<WriteHalf<BoxedSocket>>,
    reader: Mutex<Reader>,
    shared: std::sync::Mutex<Shared>,
}

/// WebSocket connection.
///
/// Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct WebSocket {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("role", &self.inner.role)
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish()
    }
}

impl WebSocket {
    /// Wrap a stream whose upgrade handshake already succeeded. `leftover`
    /// holds bytes read past the handshake response.
    pub fn from_upgraded(
        socket: BoxedSocket,
        leftover: Bytes,
        role: Role,
        config: WebSocketConfig,
    ) -> Self {
        let init = SessionInit {
            exchange_id: crate::http::exchange::next_exchange_id(),
            events: None,
            url: None,
            protocol: None,
        };
        Self::with_init(socket, leftover, role, config, init)
    }

    pub(crate) fn with_init(
        socket: BoxedSocket,
        leftover: Bytes,
        role: Role,
        config: WebSocketConfig,
        init: SessionInit,
    ) -> Self {
        let (read, write) = tokio::io::split(socket);
        let direction = match role {
            Role::Client => Direction::Client,
            Role::Server => Direction::Server,
        };
        tracing::debug!(id = init.exchange_id, ?role, "websocket session open");
        Self {
            inner: Arc::new(Inner {
                role,
                url: init.url,
                protocol: init.protocol,
                writer: Mutex::new(write),
                reader: Mutex::new(Reader {
                    half: read,
                    buf: BytesMut::from(&leftover[..]),
                    decoder: FrameDecoder::new(role, config.max_frame_size),
                    assembler: Reassembler::new(config.max_message_size),
                }),
                shared: std::sync::Mutex::new(Shared {
                    exchange: Exchange::websocket(init.exchange_id, direction),
                    close_sent: false,
                    close_received: false,
                    peer_close: None,
                    events: init.events,
                }),
                config,
            }),
        }
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.inner.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the URL this WebSocket is connected to (client sessions only).
    pub fn url(&self) -> Option<&Url> {
        self.inner.url.as_ref()
    }

    /// Subprotocol agreed during the handshake.
    pub fn protocol(&self) -> Option<&str> {
        self.inner.protocol.as_deref()
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn state(&self) -> ExchangeState {
        self.shared().exchange.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ExchangeState::Open
    }

    /// The close frame the peer sent, once one arrived.
    pub fn peer_close(&self) -> Option<CloseFrame> {
        self.shared().peer_close.clone()
    }

    /// Send a message. Sending `Close` starts the closing handshake without
    /// waiting for the reply; use [`close`](Self::close) to wait.
    pub async fn send(&self, msg: Message) -> Result<(), NetError> {
        if let Message::Close(Some(frame)) = &msg {
            if !frame.code.is_sendable() {
                return Err(NetError::WsProtocolError(format!(
                    "close code {} may not be sent",
                    frame.code.0
                )));
            }
        }
        self.send_frame(msg.into_frame()).await
    }

    /// Send a text message.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), NetError> {
        self.send(Message::Text(text.into())).await
    }

    /// Send binary data.
    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), NetError> {
        self.send(Message::Binary(data.into())).await
    }

    /// Ping the peer.
    pub async fn ping(&self, data: impl Into<Bytes>) -> Result<(), NetError> {
        self.send(Message::Ping(data.into())).await
    }

    /// Send one raw frame, e.g. a fragment of a larger message. Client
    /// sessions mask it with a fresh key.
    pub async fn send_frame(&self, frame: Frame) -> Result<(), NetError> {
        {
            let mut shared = self.shared();
            if shared.close_sent || shared.exchange.state().is_terminal() {
                return Err(NetError::ConnectionClosed);
            }
            if frame.opcode == OpCode::Close {
                shared.close_sent = true;
                if shared.exchange.state() == ExchangeState::Open {
                    shared.exchange.advance(ExchangeState::Closing);
                }
            }
        }
        self.write_frame(&frame).await
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), NetError> {
        let mask = (self.inner.role == Role::Client).then(rand::random::<[u8; 4]>);
        let wire = encode_frame_with(frame.fin, frame.opcode, &frame.payload, mask)?;
        let mut writer = self.inner.writer.lock().await;
        writer.write_all(&wire).await.exchange_context()?;
        writer.flush().await.exchange_context()
    }

    /// Receive the next message.
    ///
    /// Returns `None` once the closing handshake is complete. A peer that
    /// drops the stream without a close frame is an error.
    pub async fn recv(&self) -> Result<Option<Message>, NetError> {
        let mut reader = self.inner.reader.lock().await;
        let Reader {
            half,
            buf,
            decoder,
            assembler,
        } = &mut *reader;

        loop {
            {
                let shared = self.shared();
                if shared.close_received || shared.exchange.state().is_terminal() {
                    return Ok(None);
                }
            }

            let frame = match decoder.decode(buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    let n = match half.read_buf(buf).await {
                        Ok(n) => n,
                        Err(e) => return Err(self.abort(NetError::from_io(&e))),
                    };
                    if n == 0 {
                        return self.on_eof();
                    }
                    continue;
                }
                Err(e) => return Err(self.fail_protocol(e).await),
            };

            match assembler.push(frame) {
                Ok(Some(msg)) => {
                    self.on_message(&msg).await?;
                    return Ok(Some(msg));
                }
                Ok(None) => continue,
                Err(e) => return Err(self.fail_protocol(e).await),
            }
        }
    }

    /// Incoming messages as a lazy stream. Ends after the closing handshake
    /// or after the first error.
    pub fn incoming(&self) -> impl Stream<Item = Result<Message, NetError>> + Send + 'static {
        futures::stream::unfold(Some(self.clone()), |ws| async move {
            let ws = ws?;
            match ws.recv().await {
                Ok(Some(msg)) => Some((Ok(msg), Some(ws))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    async fn on_message(&self, msg: &Message) -> Result<(), NetError> {
        match msg {
            Message::Ping(payload) if self.inner.config.auto_pong => {
                if !self.shared().close_sent {
                    self.write_frame(&Frame::new(OpCode::Pong, payload.clone())).await?;
                }
            }
            Message::Close(frame) => {
                let echo = {
                    let mut shared = self.shared();
                    shared.close_received = true;
                    shared.peer_close = frame.clone();
                    let echo = !shared.close_sent;
                    shared.close_sent = true;
                    echo
                };
                tracing::debug!(
                    code = ?frame.as_ref().map(|f| f.code.0),
                    echo,
                    "peer closed websocket"
                );
                if echo {
                    // Echo the status code only, as RFC 6455 5.5.1 suggests.
                    let payload = frame
                        .as_ref()
                        .map(|f| CloseFrame::new(f.code, "").to_payload())
                        .unwrap_or_default();
                    let _ = self.write_frame(&Frame::new(OpCode::Close, payload)).await;
                }
                if self.inner.role == Role::Server || echo {
                    let _ = self.inner.writer.lock().await.shutdown().await;
                }
                self.shared().finish_closed();
            }
            _ => {}
        }
        Ok(())
    }

    fn on_eof(&self) -> Result<Option<Message>, NetError> {
        let mut shared = self.shared();
        if shared.close_sent {
            // We started the close and the peer dropped the stream instead of answering.
            shared.finish_closed();
            return Ok(None);
        }
        let err = NetError::ConnectionClosed;
        tracing::debug!("websocket stream ended without a close frame");
        shared.finish_failed(&err);
        Err(err)
    }

    fn abort(&self, error: NetError) -> NetError {
        self.shared().finish_failed(&error);
        error
    }

    /// Tell the peer why we are giving up, then fail the session.
    async fn fail_protocol(&self, error: NetError) -> NetError {
        let send_close = {
            let mut shared = self.shared();
            let send = !shared.close_sent;
            shared.close_sent = true;
            send
        };
        if send_close {
            let frame = CloseFrame::new(CloseCode::for_error(&error), "");
            let _ = self.write_frame(&Frame::new(OpCode::Close, frame.to_payload())).await;
        }
        tracing::debug!(%error, "websocket protocol violation");
        self.abort(error)
    }

    /// Run the closing handshake: send a close frame (unless one was already
    /// sent), wait up to the configured timeout for the peer's, then shut
    /// the stream down.
    pub async fn close(&self, frame: Option<CloseFrame>) -> Result<(), NetError> {
        let already_sent = self.shared().close_sent;
        if !already_sent {
            self.send(Message::Close(frame)).await?;
        }

        let drain = async {
            loop {
                match self.recv().await {
                    Ok(Some(Message::Close(_))) | Ok(None) => return Ok(()),
                    Ok(Some(_)) => continue,
                    Err(e) => return Err(e),
                }
            }
        };
        let result = tokio::time::timeout(self.inner.config.close_timeout, drain).await;
        let _ = self.inner.writer.lock().await.shutdown().await;
        self.shared().finish_closed();

        match result {
            Ok(r) => r,
            Err(_) => {
                tracing::debug!("peer did not answer close in time");
                Err(NetError::TimedOut)
            }
        }
    }
}

/// WebSocket connection builder.
#[derive(Debug, Clone)]
pub struct WebSocketBuilder {
    client: Client,
    url: Url,
    headers: HeaderMap,
    subprotocols: Vec<String>,
}

impl WebSocketBuilder {
    pub(crate) fn new(client: Client, url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|_| NetError::InvalidUrl)?;

        // Validate scheme
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(NetError::InvalidUrl);
        }

        Ok(Self {
            client,
            url,
            headers: HeaderMap::new(),
            subprotocols: Vec::new(),
        })
    }

    /// Add a header to the WebSocket handshake.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::try_from(name),
            http::header::HeaderValue::try_from(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Add a subprotocol.
    pub fn subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.subprotocols.push(protocol.into());
        self
    }

    pub fn get_url(&self) -> &Url {
        &self.url
    }

    pub fn get_headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Check if secure (wss://).
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }

    /// Connect to the server.
    pub async fn connect(self) -> Result<WebSocket, NetError> {
        self.client
            .open_websocket(self.url, self.headers, self.subprotocols)
            .await
    }
}
