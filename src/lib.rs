//! # netengine
//!
//! An asynchronous HTTP/1.1 and WebSocket connection engine, built on tokio.
//!
//! `netengine` runs many concurrent HTTP and WebSocket exchanges over a
//! bounded pool of reusable transport connections, with a TTL-bounded DNS
//! cache in front of the resolver, per-request deadlines, and lifecycle
//! observers. The same codec drives a keep-alive HTTP server.
//!
//! ## Features
//!
//! - **Connection Pooling**: per-endpoint limit (6 by default), LIFO idle reuse,
//!   prioritized waiters
//! - **Host Cache**: single-flight lookups, TTL floor, explicit ownership
//! - **HTTP/1.1**: Content-Length, chunked and read-until-close bodies, redirects, keep-alive
//! - **WebSocket**: RFC 6455 framing, fragmentation, ping/pong and the close handshake
//! - **Server**: keep-alive, pipelining, WebSocket upgrades, graceful shutdown
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use netengine::Client;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::new();
//!     let response = client.get("http://example.com/").send().await.unwrap();
//!     println!("Status: {}", response.status());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error types, exchange states and observers
//! - [`dns`] - Resolvers and the host cache
//! - [`socket`] - Endpoints, dialing, TLS and the connection pool
//! - [`http`] - HTTP/1.1 codec, client transactions and the server
//! - [`ws`] - WebSocket framing, handshake and sessions
//! - [`client`] - The [`Client`] entry point

pub mod base;
pub mod client;
pub mod dns;
pub mod http;
pub mod socket;
pub mod ws;

// Re-exports for convenience
pub use base::{ErrorKind, NetError, Observer};
pub use client::{Client, ClientBuilder, RequestBuilder};
pub use crate::http::{Handler, HttpResponse, HttpServer};
pub use ws::{Message, WebSocket};
