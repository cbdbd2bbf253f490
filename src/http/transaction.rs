//! One HTTP/1.1 request/response exchange over an established stream.
//!
//! Roughly `net::HttpNetworkTransaction`: a state loop that writes the
//! request and reads the response, driven by [`Exchange`] states. The
//! transaction never owns the connection; the caller decides from the
//! outcome whether the stream goes back to the pool.

use crate::base::context::IoResultExt;
use crate::base::loadstate::{ExchangeState, LoadState};
use crate::base::neterror::NetError;
use crate::http::codec::{self, ResponseDecoder, ResponseHead};
use crate::http::exchange::Exchange;
use crate::http::request::HttpRequest;
use bytes::Bytes;
use http::{Method, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

const READ_BUF_SIZE: usize = 16 * 1024;

/// What a finished transaction leaves behind.
#[derive(Debug)]
pub struct TransactionOutcome {
    pub head: ResponseHead,
    pub body: Bytes,
    /// The stream is positioned at a message boundary and may be reused.
    pub reusable: bool,
    /// Bytes read past the response (the start of an upgraded stream).
    pub leftover: Bytes,
}

pub struct HttpNetworkTransaction {
    exchange: Exchange,
    method: Method,
    wire: Bytes,
    head_len: usize,
    decoder: Option<ResponseDecoder>,
    max_header_bytes: usize,
    bytes_received: usize,
}

impl HttpNetworkTransaction {
    /// Serialize `request` up front, so a malformed request fails before a
    /// connection is taken from the pool.
    pub fn new(
        exchange_id: u64,
        request: &HttpRequest,
        deadline: Option<Instant>,
    ) -> Result<Self, NetError> {
        let headers = request.wire_headers()?;
        let wire = codec::encode_request(
            &request.method,
            &request.target(),
            &headers,
            request.body.as_bytes(),
        )?;
        let head_len = wire
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|p| p + 4)
            .unwrap_or(wire.len());

        Ok(Self {
            exchange: Exchange::client(exchange_id, deadline),
            method: request.method.clone(),
            wire,
            head_len,
            decoder: None,
            max_header_bytes: codec::MAX_HEADER_BYTES,
            bytes_received: 0,
        })
    }

    pub fn set_max_header_bytes(&mut self, max: usize) {
        self.max_header_bytes = max;
    }

    /// Get the current load state (for progress reporting).
    pub fn get_load_state(&self) -> LoadState {
        self.exchange.load_state()
    }

    pub fn state(&self) -> ExchangeState {
        self.exchange.state()
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    /// Whether any response byte arrived. A reused connection that fails
    /// before this point most likely went stale and the request may be replayed.
    pub fn response_started(&self) -> bool {
        self.bytes_received > 0
    }

    /// Record a failure that happened outside the loop (dialing, pool wait).
    pub fn fail(&mut self, error: &NetError) {
        self.exchange.fail(error);
    }

    /// Run the exchange on `stream`. Past `deadline` the exchange fails with
    /// [`NetError::TimedOut`] and the stream must be discarded.
    pub async fn start<S>(&mut self, stream: &mut S) -> Result<TransactionOutcome, NetError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = match self.exchange.deadline() {
            Some(deadline) => match tokio::time::timeout_at(deadline, self.do_loop(stream)).await {
                Ok(result) => result,
                Err(_) => Err(NetError::TimedOut),
            },
            None => self.do_loop(stream).await,
        };
        if let Err(e) = &result {
            self.exchange.fail(e);
        }
        result
    }

    async fn do_loop<S>(&mut self, stream: &mut S) -> Result<TransactionOutcome, NetError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            match self.exchange.state() {
                ExchangeState::Connecting => {
                    self.exchange.advance(ExchangeState::SendingHeaders);
                }
                ExchangeState::SendingHeaders => {
                    stream
                        .write_all(&self.wire[..self.head_len])
                        .await
                        .exchange_context()?;
                    let next = if self.head_len < self.wire.len() {
                        ExchangeState::SendingBody
                    } else {
                        ExchangeState::AwaitingResponse
                    };
                    self.exchange.advance(next);
                }
                ExchangeState::SendingBody => {
                    stream
                        .write_all(&self.wire[self.head_len..])
                        .await
                        .exchange_context()?;
                    self.exchange.advance(ExchangeState::AwaitingResponse);
                }
                ExchangeState::AwaitingResponse => {
                    stream.flush().await.exchange_context()?;
                    let decoder = ResponseDecoder::new(&self.method)
                        .with_max_header_bytes(self.max_header_bytes);
                    self.decoder = Some(decoder);
                    self.read_more(stream, &mut buf).await?;
                    self.exchange.advance(ExchangeState::ReceivingHeaders);
                }
                ExchangeState::ReceivingHeaders => {
                    let head = self.decoder.as_ref().and_then(|d| d.head());
                    match head {
                        Some(head) if head.status == StatusCode::SWITCHING_PROTOCOLS => {
                            self.exchange.advance(ExchangeState::Open);
                            return self.finish();
                        }
                        Some(_) => {
                            self.exchange.advance(ExchangeState::ReceivingBody);
                        }
                        None => self.read_more(stream, &mut buf).await?,
                    }
                }
                ExchangeState::ReceivingBody => {
                    if self.decoder.as_ref().is_some_and(|d| d.is_complete()) {
                        self.exchange.advance(ExchangeState::Complete);
                        return self.finish();
                    }
                    self.read_more(stream, &mut buf).await?;
                }
                state => {
                    return Err(NetError::InvalidHttpResponse(format!(
                        "transaction cannot run from {state:?}"
                    )))
                }
            }
        }
    }

    /// One read into the decoder. EOF either completes an until-close body
    /// or surfaces as the framing error that describes the truncation.
    async fn read_more<S>(&mut self, stream: &mut S, buf: &mut [u8]) -> Result<(), NetError>
    where
        S: AsyncRead + Unpin,
    {
        let decoder = self.decoder.as_mut().ok_or(NetError::EmptyResponse)?;
        let n = stream.read(buf).await.exchange_context()?;
        if n == 0 {
            return decoder.finish_eof();
        }
        self.bytes_received += n;
        decoder.feed(&buf[..n])?;
        Ok(())
    }

    fn finish(&mut self) -> Result<TransactionOutcome, NetError> {
        let mut decoder = self.decoder.take().ok_or(NetError::EmptyResponse)?;
        let reusable = decoder.is_reusable();
        let leftover = decoder.take_remaining();
        let (head, body) = decoder.into_parts()?;
        tracing::debug!(
            id = self.exchange.id(),
            status = head.status.as_u16(),
            body_len = body.len(),
            reusable,
            "response received"
        );
        Ok(TransactionOutcome {
            head,
            body,
            reusable,
            leftover,
        })
    }
}
