//! RFC 6455 base framing.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Masking-key, if MASK set to 1     |    Payload Data ...   |
//! +---------------------------------------+-----------------------+
//! ```

use crate::base::neterror::NetError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_u8(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// Which end of the connection we are. Clients mask what they send;
/// servers require masked input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// One decoded frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            payload: payload.into(),
        }
    }

    /// A non-final fragment (or, with `fin`, the last one).
    pub fn fragment(opcode: OpCode, payload: impl Into<Bytes>, fin: bool) -> Self {
        Self {
            fin,
            opcode,
            payload: payload.into(),
        }
    }
}

fn protocol_error(msg: &str) -> NetError {
    NetError::WsProtocolError(msg.to_string())
}

/// XOR `data` with the 4-byte masking key.
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, b) in data.iter_mut().enumerate() {
        *b ^= mask[i & 3];
    }
}

/// Encode a single final frame; `masked` draws a fresh random key.
pub fn encode_frame(opcode: OpCode, payload: &[u8], masked: bool) -> Result<Bytes, NetError> {
    let mask = masked.then(rand::random::<[u8; 4]>);
    encode_frame_with(true, opcode, payload, mask)
}

/// Encode a frame with explicit FIN bit and masking key.
pub fn encode_frame_with(
    fin: bool,
    opcode: OpCode,
    payload: &[u8],
    mask: Option<[u8; 4]>,
) -> Result<Bytes, NetError> {
    if opcode.is_control() && (payload.len() > MAX_CONTROL_PAYLOAD || !fin) {
        return Err(protocol_error("control frames must be final and at most 125 bytes"));
    }

    let len = payload.len();
    let mut out = BytesMut::with_capacity(len + 14);
    out.put_u8(if fin { 0x80 } else { 0 } | opcode.as_u8());

    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    if len < 126 {
        out.put_u8(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        out.put_u8(mask_bit | 126);
        out.put_u16(len as u16);
    } else {
        out.put_u8(mask_bit | 127);
        out.put_u64(len as u64);
    }

    match mask {
        Some(key) => {
            out.put_slice(&key);
            let start = out.len();
            out.put_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.put_slice(payload),
    }
    Ok(out.freeze())
}

/// Incremental frame decoder.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    role: Role,
    max_payload: usize,
}

impl FrameDecoder {
    pub fn new(role: Role, max_payload: usize) -> Self {
        Self { role, max_payload }
    }

    /// Take one frame off the front of `buf`. `Ok(None)` means more bytes
    /// are needed; nothing is consumed in that case.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, NetError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let b0 = buf[0];
        let b1 = buf[1];

        let fin = b0 & 0x80 != 0;
        if b0 & 0x70 != 0 {
            return Err(protocol_error("reserved bits set without a negotiated extension"));
        }
        let opcode =
            OpCode::from_u8(b0 & 0x0F).ok_or_else(|| protocol_error("reserved opcode"))?;

        let masked = b1 & 0x80 != 0;
        match (self.role, masked) {
            (Role::Server, false) => return Err(protocol_error("client frame is not masked")),
            (Role::Client, true) => return Err(protocol_error("server frame is masked")),
            _ => {}
        }

        let (header_len, len) = match b1 & 0x7F {
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (4, u16::from_be_bytes([buf[2], buf[3]]) as u64)
            }
            127 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len & (1 << 63) != 0 {
                    return Err(protocol_error("64-bit payload length has the high bit set"));
                }
                (10, len)
            }
            n => (2, n as u64),
        };

        if opcode.is_control() {
            if !fin {
                return Err(protocol_error("fragmented control frame"));
            }
            if len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(protocol_error("control frame payload over 125 bytes"));
            }
        }
        if len > self.max_payload as u64 {
            return Err(NetError::MsgTooBig);
        }

        let len = len as usize;
        let mask_len = if masked { 4 } else { 0 };
        if buf.len() < header_len + mask_len + len {
            return Ok(None);
        }

        buf.advance(header_len);
        let mask = if masked {
            let key = [buf[0], buf[1], buf[2], buf[3]];
            buf.advance(4);
            Some(key)
        } else {
            None
        };
        let mut payload = buf.split_to(len);
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame {
            fin,
            opcode,
            payload: payload.freeze(),
        }))
    }
}
