//! Socket and connection management.
//!
//! Provides connection pooling and socket handling mirroring Chromium's `net/socket/`:
//! - [`endpoint`]: pool partition keys (scheme, host, port)
//! - [`pool`]: bounded connection pool with LIFO reuse and fair waiting
//! - [`connectjob`]: DNS → TCP → TLS connection flow
//! - [`tls`]: TLS configuration with BoringSSL

pub mod client;
pub mod connectjob;
pub mod endpoint;
pub mod pool;
pub mod stream;
pub mod tls;

pub use connectjob::{ConnectJob, Connector};
pub use endpoint::{Endpoint, Scheme};
pub use pool::{ClientSocketPool, PoolConfig, PoolStats, PooledConnection, RequestPriority};
pub use stream::{BoxedSocket, StreamSocket};
