//! WebSocket message types and reassembly of fragmented frames.

use super::frame::{Frame, OpCode};
use crate::base::neterror::NetError;
use bytes::{BufMut, Bytes, BytesMut};

/// WebSocket message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message (UTF-8)
    Text(String),
    /// Binary message
    Binary(Bytes),
    /// Ping frame
    Ping(Bytes),
    /// Pong frame
    Pong(Bytes),
    /// Close frame with optional code and reason
    Close(Option<CloseFrame>),
}

/// Close frame data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close code (RFC 6455)
    pub code: CloseCode,
    /// Close reason (optional UTF-8 string)
    pub reason: String,
}

impl CloseFrame {
    /// Create a new close frame.
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Wire payload: big-endian code followed by the reason.
    pub fn to_payload(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(2 + self.reason.len());
        out.put_u16(self.code.0);
        out.put_slice(self.reason.as_bytes());
        out.freeze()
    }

    /// Parse a close payload. Empty means "no status".
    pub fn parse(payload: &[u8]) -> Result<Option<Self>, NetError> {
        match payload.len() {
            0 => Ok(None),
            1 => Err(NetError::WsProtocolError("one-byte close payload".into())),
            _ => {
                let code = CloseCode(u16::from_be_bytes([payload[0], payload[1]]));
                if !code.is_sendable() {
                    return Err(NetError::WsProtocolError(format!(
                        "invalid close code {}",
                        code.0
                    )));
                }
                let reason = std::str::from_utf8(&payload[2..]).map_err(|_| NetError::InvalidUtf8)?;
                Ok(Some(CloseFrame::new(code, reason)))
            }
        }
    }
}

/// WebSocket close codes (RFC 6455).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Normal closure
    pub const NORMAL: Self = Self(1000);
    /// Server going down
    pub const GOING_AWAY: Self = Self(1001);
    /// Protocol error
    pub const PROTOCOL_ERROR: Self = Self(1002);
    /// Unsupported data type
    pub const UNSUPPORTED: Self = Self(1003);
    /// No status received
    pub const NO_STATUS: Self = Self(1005);
    /// Abnormal closure
    pub const ABNORMAL: Self = Self(1006);
    /// Invalid payload data
    pub const INVALID_PAYLOAD: Self = Self(1007);
    /// Policy violation
    pub const POLICY_VIOLATION: Self = Self(1008);
    /// Message too big
    pub const MESSAGE_TOO_BIG: Self = Self(1009);
    /// Extension required
    pub const EXTENSION_REQUIRED: Self = Self(1010);
    /// Internal server error
    pub const INTERNAL_ERROR: Self = Self(1011);
    /// TLS handshake failure
    pub const TLS_HANDSHAKE: Self = Self(1015);

    /// Whether the code may appear on the wire (section 7.4).
    pub fn is_sendable(self) -> bool {
        matches!(self.0, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }

    /// Close code matching a local failure.
    pub fn for_error(error: &NetError) -> Self {
        match error {
            NetError::MsgTooBig => Self::MESSAGE_TOO_BIG,
            NetError::InvalidUtf8 => Self::INVALID_PAYLOAD,
            _ => Self::PROTOCOL_ERROR,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.0
    }
}

impl Message {
    /// Check if this is a text message.
    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Check if this is a binary message.
    pub fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// Check if this is a close message.
    pub fn is_close(&self) -> bool {
        matches!(self, Message::Close(_))
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Message::Ping(_) | Message::Pong(_) | Message::Close(_))
    }

    /// Try to get as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as binary data.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Message::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Convert to bytes (text as UTF-8, binary as-is).
    pub fn into_data(self) -> Bytes {
        match self {
            Message::Text(s) => Bytes::from(s),
            Message::Binary(b) | Message::Ping(b) | Message::Pong(b) => b,
            Message::Close(frame) => frame.map(|f| f.to_payload()).unwrap_or_default(),
        }
    }

    /// Opcode and payload of the single frame carrying this message.
    pub fn into_frame(self) -> Frame {
        let opcode = match &self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
            Message::Ping(_) => OpCode::Ping,
            Message::Pong(_) => OpCode::Pong,
            Message::Close(_) => OpCode::Close,
        };
        Frame::new(opcode, self.into_data())
    }
}

/// Joins data frames into messages.
///
/// Control frames may arrive between the fragments of a data message; they
/// are handed back immediately and leave the partial message untouched.
#[derive(Debug)]
pub struct Reassembler {
    max_message_size: usize,
    partial: Option<(OpCode, BytesMut)>,
}

impl Reassembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            partial: None,
        }
    }

    pub fn in_progress(&self) -> bool {
        self.partial.is_some()
    }

    /// Feed one frame; returns a message once one is complete.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, NetError> {
        match frame.opcode {
            OpCode::Ping => Ok(Some(Message::Ping(frame.payload))),
            OpCode::Pong => Ok(Some(Message::Pong(frame.payload))),
            OpCode::Close => Ok(Some(Message::Close(CloseFrame::parse(&frame.payload)?))),
            OpCode::Text | OpCode::Binary => {
                if self.partial.is_some() {
                    return Err(NetError::WsProtocolError(
                        "new data frame before previous message finished".into(),
                    ));
                }
                if frame.payload.len() > self.max_message_size {
                    return Err(NetError::MsgTooBig);
                }
                if frame.fin {
                    return finish(frame.opcode, frame.payload).map(Some);
                }
                self.partial = Some((frame.opcode, BytesMut::from(&frame.payload[..])));
                Ok(None)
            }
            OpCode::Continuation => {
                let Some((opcode, mut data)) = self.partial.take() else {
                    return Err(NetError::WsProtocolError(
                        "continuation frame without a message in progress".into(),
                    ));
                };
                if data.len() + frame.payload.len() > self.max_message_size {
                    return Err(NetError::MsgTooBig);
                }
                data.extend_from_slice(&frame.payload);
                if frame.fin {
                    finish(opcode, data.freeze()).map(Some)
                } else {
                    self.partial = Some((opcode, data));
                    Ok(None)
                }
            }
        }
    }
}

fn finish(opcode: OpCode, data: Bytes) -> Result<Message, NetError> {
    match opcode {
        OpCode::Text => String::from_utf8(data.to_vec())
            .map(Message::Text)
            .map_err(|_| NetError::InvalidUtf8),
        _ => Ok(Message::Binary(data)),
    }
}
