//! WebSocket support (RFC 6455).
//!
//! Mirrors Chromium's `net/websockets/` split:
//! - [`frame`]: base framing, masking and the incremental frame decoder
//! - [`message`]: messages, close frames and fragment reassembly
//! - [`handshake`]: the HTTP/1.1 upgrade on both sides
//! - [`connection`]: an open session over an upgraded stream
//!
//! # Example
//! ```ignore
//! use netengine::client::Client;
//! use netengine::ws::Message;
//!
//! let client = Client::new();
//! let ws = client.connect_websocket("ws://127.0.0.1:8080/chat").await?;
//! ws.send(Message::Text("Hello".into())).await?;
//! let msg = ws.recv().await?;
//! ws.close(None).await?;
//! ```

pub mod connection;
pub mod frame;
pub mod handshake;
pub mod message;

pub use connection::{WebSocket, WebSocketBuilder, WebSocketConfig};
pub use frame::{encode_frame, Frame, FrameDecoder, OpCode, Role};
pub use message::{CloseCode, CloseFrame, Message};
