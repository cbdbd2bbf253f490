use crate::base::neterror::NetError;
use crate::dns::HostCache;
use crate::socket::client::SocketType;
use crate::socket::endpoint::Endpoint;
use crate::socket::stream::BoxedSocket;
#[cfg(feature = "boring-tls")]
use crate::socket::tls::TlsConnector;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::net::TcpStream;

/// Dials new transport connections for the pool.
///
/// The pool calls this while holding a reserved slot, so implementations
/// must not touch the pool themselves.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<BoxedSocket, NetError>>;
}

/// Manages the connection process: DNS -> TCP -> SSL.
/// Roughly equivalent to net::ConnectJob.
#[derive(Clone)]
pub struct ConnectJob {
    host_cache: HostCache,
    #[cfg(feature = "boring-tls")]
    tls: Option<TlsConnector>,
    connect_timeout: Duration,
}

impl ConnectJob {
    pub fn new(host_cache: HostCache, connect_timeout: Duration) -> Self {
        Self {
            host_cache,
            #[cfg(feature = "boring-tls")]
            tls: None,
            connect_timeout,
        }
    }

    #[cfg(feature = "boring-tls")]
    pub fn with_tls(mut self, tls: TlsConnector) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn host_cache(&self) -> &HostCache {
        &self.host_cache
    }

    /// Resolve, then try each address in order until one accepts.
    async fn connect_tcp(&self, endpoint: &Endpoint) -> Result<TcpStream, NetError> {
        let resolved = self.host_cache.resolve(endpoint.bare_host()).await?;
        let host = endpoint.bare_host();
        let port = endpoint.port();

        let mut last_err = None;
        for addr in resolved.socket_addrs(port) {
            tracing::trace!(%addr, "dialing");
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    tracing::debug!(%addr, error = %e, "connect attempt failed");
                    last_err = Some(NetError::connection_failed_to(host, port, e));
                }
                Err(_) => {
                    tracing::debug!(%addr, "connect attempt timed out");
                    last_err = Some(NetError::ConnectionTimedOut);
                }
            }
        }
        Err(last_err.unwrap_or(NetError::ConnectionFailed))
    }

    pub async fn connect_socket(&self, endpoint: &Endpoint) -> Result<SocketType, NetError> {
        let stream = self.connect_tcp(endpoint).await?;

        if !endpoint.is_secure() {
            return Ok(SocketType::Tcp(stream));
        }

        #[cfg(feature = "boring-tls")]
        {
            let tls = match &self.tls {
                Some(tls) => tls.clone(),
                None => TlsConnector::new(&Default::default())?,
            };
            let ssl = tls.connect(endpoint.bare_host(), stream).await?;
            Ok(SocketType::Ssl(ssl))
        }

        #[cfg(not(feature = "boring-tls"))]
        {
            drop(stream);
            Err(NetError::DisallowedUrlScheme)
        }
    }
}

impl Connector for ConnectJob {
    fn connect<'a>(
        &'a self,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<BoxedSocket, NetError>> {
        Box::pin(async move {
            let socket = self.connect_socket(endpoint).await?;
            tracing::debug!(%endpoint, secure = socket.is_secure(), "connected");
            Ok(BoxedSocket::new(socket))
        })
    }
}

impl std::fmt::Debug for ConnectJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectJob")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}
