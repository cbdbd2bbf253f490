use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Coarse classification of a [`NetError`].
///
/// Callers branch on the kind rather than on individual variants when
/// deciding whether to retry, back off, or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// DNS lookup failed or timed out. Not retried by the engine.
    Resolution,
    /// No connection became available within the acquire timeout.
    PoolExhausted,
    /// Malformed wire data. The connection is destroyed.
    Protocol,
    /// A deadline elapsed. The connection is destroyed.
    Timeout,
    /// Dial or secure handshake failure. The connection never entered the pool.
    Connect,
    /// The redirect cap was exceeded.
    TooManyRedirects,
    /// The peer closed or reset the stream mid-exchange.
    Closed,
    /// The exchange was cancelled locally.
    Aborted,
    /// Invalid input supplied by the caller.
    Usage,
}

#[derive(Debug, Error, Clone)]
pub enum NetError {
    // Generic
    #[error("Operation aborted")]
    Aborted,
    #[error("Operation timed out")]
    TimedOut,

    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Connection to {host}:{port} failed: {source}")]
    ConnectionFailedTo {
        host: String,
        port: u16,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Name not resolved for {domain}: {source}")]
    NameNotResolvedFor {
        domain: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("Name resolution for {domain} timed out")]
    NameResolutionTimedOut { domain: String },
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("SSL handshake with {host} failed: {reason}")]
    SslHandshakeFailed { host: String, reason: String },
    #[error("No connection available for {endpoint}")]
    PoolExhausted { endpoint: String },
    #[error("Socket pool is closed")]
    PoolClosed,
    #[error("Message too big")]
    MsgTooBig,
    #[error("WebSocket protocol error: {0}")]
    WsProtocolError(String),
    #[error("WebSocket upgrade failed: {0}")]
    WsUpgrade(String),
    #[error("Socket closed by remote")]
    SocketRemoteClosed,
    #[error("Data received unexpectedly on idle socket")]
    DataReceivedUnexpectedly,

    // HTTP Errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Disallowed URL scheme")]
    DisallowedUrlScheme,
    #[error("Unknown URL scheme")]
    UnknownUrlScheme,
    #[error("Invalid redirect")]
    InvalidRedirect,
    #[error("Too many redirects")]
    TooManyRedirects,
    #[error("Content-Length mismatch")]
    ContentLengthMismatch,
    #[error("Invalid chunked encoding")]
    InvalidChunkedEncoding,
    #[error("Incomplete chunked encoding")]
    IncompleteChunkedEncoding,
    #[error("Empty response")]
    EmptyResponse,
    #[error("Response headers too big")]
    ResponseHeadersTooBig,
    #[error("Response headers multiple Content-Length")]
    ResponseHeadersMultipleContentLength,
    #[error("Invalid HTTP response: {0}")]
    InvalidHttpResponse(String),
    #[error("Invalid HTTP request: {0}")]
    InvalidHttpRequest(String),
    #[error("Invalid header")]
    InvalidHeader,
    #[error("HTTP body error")]
    HttpBodyError,
    #[error("Invalid UTF-8 in body")]
    InvalidUtf8,
    #[error("JSON parse error")]
    JsonParseError,

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl PartialEq for NetError {
    fn eq(&self, other: &Self) -> bool {
        self.as_i32() == other.as_i32()
    }
}

impl Eq for NetError {}

impl NetError {
    /// Wrap a dial failure with the target it was dialing.
    pub fn connection_failed_to(host: &str, port: u16, source: io::Error) -> Self {
        NetError::ConnectionFailedTo {
            host: host.to_string(),
            port,
            source: Arc::new(source),
        }
    }

    /// Wrap a DNS failure with the domain being looked up.
    pub fn dns_failed(domain: &str, source: io::Error) -> Self {
        NetError::NameNotResolvedFor {
            domain: domain.to_string(),
            source: Arc::new(source),
        }
    }

    /// Map an I/O error raised while an exchange was reading or writing.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset => NetError::ConnectionReset,
            io::ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
            io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => NetError::ConnectionClosed,
            io::ErrorKind::TimedOut => NetError::TimedOut,
            _ => NetError::ConnectionFailed,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NetError::NameNotResolved
            | NetError::NameNotResolvedFor { .. }
            | NetError::NameResolutionTimedOut { .. } => ErrorKind::Resolution,

            NetError::PoolExhausted { .. } => ErrorKind::PoolExhausted,

            NetError::TimedOut => ErrorKind::Timeout,

            NetError::ConnectionRefused
            | NetError::ConnectionFailed
            | NetError::ConnectionFailedTo { .. }
            | NetError::ConnectionTimedOut
            | NetError::SslProtocolError
            | NetError::SslHandshakeFailed { .. }
            | NetError::WsUpgrade(_) => ErrorKind::Connect,

            NetError::TooManyRedirects => ErrorKind::TooManyRedirects,

            NetError::ConnectionClosed
            | NetError::ConnectionReset
            | NetError::ConnectionAborted
            | NetError::SocketRemoteClosed
            | NetError::EmptyResponse => ErrorKind::Closed,

            NetError::Aborted | NetError::PoolClosed => ErrorKind::Aborted,

            NetError::MsgTooBig
            | NetError::WsProtocolError(_)
            | NetError::DataReceivedUnexpectedly
            | NetError::InvalidRedirect
            | NetError::ContentLengthMismatch
            | NetError::InvalidChunkedEncoding
            | NetError::IncompleteChunkedEncoding
            | NetError::ResponseHeadersTooBig
            | NetError::ResponseHeadersMultipleContentLength
            | NetError::InvalidHttpResponse(_)
            | NetError::InvalidHttpRequest(_)
            | NetError::HttpBodyError
            | NetError::InvalidUtf8
            | NetError::JsonParseError
            | NetError::Unknown(_) => ErrorKind::Protocol,

            NetError::InvalidUrl
            | NetError::DisallowedUrlScheme
            | NetError::UnknownUrlScheme
            | NetError::InvalidHeader => ErrorKind::Usage,
        }
    }

    /// Whether a connection that observed this error may go back to the idle set.
    ///
    /// Only failures that happen before any byte touches the stream qualify.
    pub fn leaves_connection_reusable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Usage)
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::Aborted => -3,
            NetError::TimedOut => -7,

            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed => -104,
            NetError::NameNotResolved => -105,
            NetError::SslProtocolError => -107,
            NetError::ConnectionTimedOut => -118,
            NetError::PoolExhausted { .. } => -133,
            NetError::MsgTooBig => -142,
            NetError::WsProtocolError(_) => -145,
            NetError::WsUpgrade(_) => -173,

            NetError::InvalidUrl => -300,
            NetError::DisallowedUrlScheme => -301,
            NetError::UnknownUrlScheme => -302,
            NetError::InvalidRedirect => -303,
            NetError::TooManyRedirects => -310,
            NetError::InvalidChunkedEncoding => -321,
            NetError::EmptyResponse => -324,
            NetError::ResponseHeadersTooBig => -325,
            NetError::ResponseHeadersMultipleContentLength => -346,
            NetError::ContentLengthMismatch => -354,
            NetError::IncompleteChunkedEncoding => -355,
            NetError::InvalidHttpResponse(_) => -370,

            // Engine-specific codes live well outside Chromium's ranges.
            NetError::ConnectionFailedTo { .. } => -10000,
            NetError::NameNotResolvedFor { .. } => -10001,
            NetError::NameResolutionTimedOut { .. } => -10002,
            NetError::SslHandshakeFailed { .. } => -10003,
            NetError::PoolClosed => -10004,
            NetError::SocketRemoteClosed => -10005,
            NetError::DataReceivedUnexpectedly => -10006,
            NetError::InvalidHttpRequest(_) => -10007,
            NetError::InvalidHeader => -10008,
            NetError::HttpBodyError => -10009,
            NetError::InvalidUtf8 => -10010,
            NetError::JsonParseError => -10011,
            NetError::Unknown(code) => *code,
        }
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -3 => NetError::Aborted,
            -7 => NetError::TimedOut,
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,
            -107 => NetError::SslProtocolError,
            -118 => NetError::ConnectionTimedOut,
            -142 => NetError::MsgTooBig,
            -300 => NetError::InvalidUrl,
            -301 => NetError::DisallowedUrlScheme,
            -302 => NetError::UnknownUrlScheme,
            -303 => NetError::InvalidRedirect,
            -310 => NetError::TooManyRedirects,
            -321 => NetError::InvalidChunkedEncoding,
            -324 => NetError::EmptyResponse,
            -325 => NetError::ResponseHeadersTooBig,
            -346 => NetError::ResponseHeadersMultipleContentLength,
            -354 => NetError::ContentLengthMismatch,
            -355 => NetError::IncompleteChunkedEncoding,
            -10004 => NetError::PoolClosed,
            -10005 => NetError::SocketRemoteClosed,
            -10006 => NetError::DataReceivedUnexpectedly,
            -10008 => NetError::InvalidHeader,
            -10009 => NetError::HttpBodyError,
            -10010 => NetError::InvalidUtf8,
            -10011 => NetError::JsonParseError,
            _ => NetError::Unknown(code),
        }
    }
}
