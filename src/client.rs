//! HTTP client with builder pattern.
//!
//! [`Client`] is the dispatcher: it owns the host cache, the connection pool
//! and the observer set, and drives each request through resolve, acquire,
//! exchange and release. Redirects are followed here, one exchange per hop.
//!
//! # Example
//!
//! ```rust,ignore
//! use netengine::Client;
//! use std::time::Duration;
//!
//! let client = Client::builder()
//!     .timeout(Duration::from_secs(10))
//!     .build();
//!
//! let resp = client.get("http://example.com/").send().await?;
//! println!("{}", resp.text()?);
//! ```

use crate::base::events::{Observer, Observers, RequestInfo};
use crate::base::loadstate::Direction;
use crate::base::neterror::NetError;
use crate::dns::{GaiResolver, HostCache, HostCacheConfig, Resolve};
use crate::http::codec;
use crate::http::exchange::next_exchange_id;
use crate::http::redirect::RedirectPolicy;
use crate::http::request::{HttpRequest, RequestBody};
use crate::http::response::HttpResponse;
use crate::http::retry::should_resend;
use crate::http::server::{Handler, HttpServer};
use crate::http::transaction::{HttpNetworkTransaction, TransactionOutcome};
use crate::socket::connectjob::{ConnectJob, Connector};
use crate::socket::endpoint::Endpoint;
use crate::socket::pool::{ClientSocketPool, PoolConfig, PooledConnection};
use crate::socket::stream::BoxedSocket;
#[cfg(feature = "boring-tls")]
use crate::socket::tls::TlsConnector;
use crate::ws::connection::{SessionInit, WebSocket, WebSocketBuilder, WebSocketConfig};
use crate::ws::frame::Role;
use crate::ws::handshake::ClientHandshake;
use base64::Engine;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue};
use http::Method;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::ToSocketAddrs;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

/// HTTP client for making requests.
///
/// Cheap to clone; clones share the pool, the host cache and the observers.
/// Use [`Client::builder()`] to configure one.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    host_cache: HostCache,
    pool: ClientSocketPool,
    observers: Observers,
    timeout: Option<Duration>,
    redirect: RedirectPolicy,
    websocket: WebSocketConfig,
    default_headers: HeaderMap,
    max_header_bytes: usize,
    sweeper: Option<JoinHandle<()>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("pool", &self.inner.pool)
            .field("host_cache", &self.inner.host_cache)
            .field("observers", &self.inner.observers)
            .field("timeout", &self.inner.timeout)
            .field("redirect", &self.inner.redirect)
            .finish()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Create a new client with default settings.
    pub fn new() -> Self {
        ClientBuilder::default().build()
    }

    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn pool(&self) -> &ClientSocketPool {
        &self.inner.pool
    }

    pub fn host_cache(&self) -> &HostCache {
        &self.inner.host_cache
    }

    pub fn observers(&self) -> &Observers {
        &self.inner.observers
    }

    /// Start building a GET request.
    pub fn get<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Start building a POST request.
    pub fn post<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Start building a PUT request.
    pub fn put<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Start building a DELETE request.
    pub fn delete<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Start building a HEAD request.
    pub fn head<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    /// Start building a PATCH request.
    pub fn patch<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    /// Start building a request with custom method.
    pub fn request<U: AsRef<str>>(&self, method: Method, url: U) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            method,
            url: url.as_ref().to_string(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            timeout: None,
            error: None,
        }
    }

    /// Send one request and return the final response after redirects.
    ///
    /// `timeout` overrides the client default and spans every hop.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: impl Into<RequestBody>,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, NetError> {
        let url = Url::parse(url).map_err(|_| NetError::InvalidUrl)?;
        let mut request = HttpRequest::new(method, url);
        request.headers = headers;
        request.body = body.into();
        self.execute(request, timeout).await
    }

    /// Run a prepared request.
    pub async fn execute(
        &self,
        request: HttpRequest,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, NetError> {
        let deadline = timeout.or(self.inner.timeout).map(|t| Instant::now() + t);
        let request = self.prepare(request)?;

        let events = self.inner.observers.track(RequestInfo::new(
            next_exchange_id(),
            Direction::Client,
            request.method.clone(),
            request.url.as_str(),
        ));
        match self.follow(request, deadline).await {
            Ok(response) => {
                events.complete(response.status());
                Ok(response)
            }
            Err(e) => {
                events.error(&e);
                Err(e)
            }
        }
    }

    /// Start building a WebSocket connection to a `ws://` or `wss://` URL.
    pub fn websocket(&self, url: &str) -> Result<WebSocketBuilder, NetError> {
        WebSocketBuilder::new(self.clone(), url)
    }

    /// Open a WebSocket session with default handshake headers.
    pub async fn connect_websocket(&self, url: &str) -> Result<WebSocket, NetError> {
        self.websocket(url)?.connect().await
    }

    /// Serve `handler` on `addr`, reporting to this client's observers.
    pub async fn serve<H: Handler>(
        &self,
        addr: impl ToSocketAddrs,
        handler: H,
    ) -> Result<(), NetError> {
        HttpServer::bind(addr)
            .await?
            .with_observers(self.inner.observers.clone())
            .serve(handler)
            .await
    }

    /// Close idle connections and fail pending acquires. Requests already
    /// holding a connection finish, but their connections are not pooled.
    pub fn close_all(&self) {
        self.inner.pool.close_all();
    }

    /// Add default headers and turn URL userinfo into basic auth.
    fn prepare(&self, mut request: HttpRequest) -> Result<HttpRequest, NetError> {
        for (name, value) in &self.inner.default_headers {
            if !request.headers.contains_key(name) {
                request.headers.insert(name.clone(), value.clone());
            }
        }

        if !request.url.username().is_empty() {
            if !request.headers.contains_key(header::AUTHORIZATION) {
                let value = basic_auth(request.url.username(), request.url.password())?;
                request.headers.insert(header::AUTHORIZATION, value);
            }
            request.url.set_username("").map_err(|_| NetError::InvalidUrl)?;
            request.url.set_password(None).map_err(|_| NetError::InvalidUrl)?;
        }
        Ok(request)
    }

    async fn follow(
        &self,
        mut request: HttpRequest,
        deadline: Option<Instant>,
    ) -> Result<HttpResponse, NetError> {
        let mut followed = 0;
        loop {
            let outcome = self.run_exchange(&request, deadline).await?;
            match self.inner.redirect.next_request(&request, &outcome.head, followed)? {
                Some(next) => {
                    followed += 1;
                    request = next;
                }
                None => {
                    return Ok(HttpResponse::new(outcome.head, outcome.body, request.url)
                        .with_redirects(followed));
                }
            }
        }
    }

    /// One hop: acquire, run the transaction, release. A stale reused
    /// connection gets one replay on a fresh attempt.
    async fn run_exchange(
        &self,
        request: &HttpRequest,
        deadline: Option<Instant>,
    ) -> Result<TransactionOutcome, NetError> {
        let endpoint = request.endpoint()?;
        let mut retried = false;
        loop {
            let mut txn = HttpNetworkTransaction::new(next_exchange_id(), request, deadline)?;
            txn.set_max_header_bytes(self.inner.max_header_bytes);

            let mut conn = match self.connect(&endpoint, deadline).await {
                Ok(conn) => conn,
                Err(e) => {
                    txn.fail(&e);
                    return Err(e);
                }
            };

            match txn.start(&mut conn).await {
                Ok(outcome) => {
                    conn.release(outcome.reusable);
                    return Ok(outcome);
                }
                Err(e) => {
                    let reused = conn.was_reused();
                    conn.release(false);
                    if !retried {
                        let started = txn.response_started();
                        if let Some(reason) = should_resend(&e, &request.method, reused, started) {
                            tracing::debug!(%endpoint, ?reason, "retrying on a fresh connection");
                            retried = true;
                            continue;
                        }
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Resolve, then take a connection from the pool, all within `deadline`.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        deadline: Option<Instant>,
    ) -> Result<PooledConnection, NetError> {
        // Resolving before acquiring keeps a stuck lookup from holding a slot.
        let lookup = self.inner.host_cache.resolve(endpoint.bare_host());
        let resolved = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, lookup).await.map_err(|_| {
                NetError::NameResolutionTimedOut {
                    domain: endpoint.bare_host().to_string(),
                }
            })?,
            None => lookup.await,
        };
        resolved?;

        let acquire = self.inner.pool.acquire(endpoint, self.inner.pool.config().acquire_timeout);
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, acquire)
                .await
                .unwrap_or(Err(NetError::TimedOut)),
            None => acquire.await,
        }
    }

    pub(crate) async fn open_websocket(
        &self,
        url: Url,
        headers: HeaderMap,
        subprotocols: Vec<String>,
    ) -> Result<WebSocket, NetError> {
        let deadline = self.inner.timeout.map(|t| Instant::now() + t);
        let handshake = ClientHandshake::new(subprotocols);

        let mut request = HttpRequest::new(Method::GET, url);
        request.headers = headers;
        request.headers.extend(handshake.request_headers()?);
        let request = self.prepare(request)?;

        let id = next_exchange_id();
        let events = self.inner.observers.track(RequestInfo::new(
            id,
            Direction::Client,
            Method::GET,
            request.url.as_str(),
        ));

        match self.upgrade(id, &request, &handshake, deadline).await {
            Ok((socket, leftover, protocol)) => {
                tracing::debug!(url = %request.url, ?protocol, "websocket open");
                let init = SessionInit {
                    exchange_id: id,
                    events: Some(events),
                    url: Some(request.url),
                    protocol,
                };
                Ok(WebSocket::with_init(
                    socket,
                    leftover,
                    Role::Client,
                    self.inner.websocket.clone(),
                    init,
                ))
            }
            Err(e) => {
                events.error(&e);
                Err(e)
            }
        }
    }

    /// Run the upgrade request and take the socket out of the pool.
    async fn upgrade(
        &self,
        id: u64,
        request: &HttpRequest,
        handshake: &ClientHandshake,
        deadline: Option<Instant>,
    ) -> Result<(BoxedSocket, Bytes, Option<String>), NetError> {
        let endpoint = request.endpoint()?;
        let mut txn = HttpNetworkTransaction::new(id, request, deadline)?;
        txn.set_max_header_bytes(self.inner.max_header_bytes);
        let mut conn = self.connect(&endpoint, deadline).await?;

        let outcome = match txn.start(&mut conn).await {
            Ok(outcome) => outcome,
            Err(e) => {
                conn.release(false);
                return Err(e);
            }
        };
        let protocol = match handshake.verify(&outcome.head) {
            Ok(protocol) => protocol,
            Err(e) => {
                conn.release(outcome.reusable);
                return Err(e);
            }
        };
        let socket = conn.detach().ok_or(NetError::ConnectionClosed)?;
        Ok((socket, outcome.leftover, protocol))
    }
}

fn basic_auth(username: &str, password: Option<&str>) -> Result<HeaderValue, NetError> {
    let credentials = format!("{}:{}", username, password.unwrap_or(""));
    let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
    let mut value =
        HeaderValue::from_str(&format!("Basic {encoded}")).map_err(|_| NetError::InvalidHeader)?;
    value.set_sensitive(true);
    Ok(value)
}

/// Builder for creating a [`Client`].
pub struct ClientBuilder {
    pool_config: PoolConfig,
    host_cache_config: HostCacheConfig,
    host_cache: Option<HostCache>,
    resolver: Option<Arc<dyn Resolve>>,
    connector: Option<Arc<dyn Connector>>,
    #[cfg(feature = "boring-tls")]
    tls: Option<TlsConnector>,
    observers: Vec<Arc<dyn Observer>>,
    timeout: Option<Duration>,
    redirect: RedirectPolicy,
    websocket: WebSocketConfig,
    default_headers: HeaderMap,
    max_header_bytes: usize,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            pool_config: PoolConfig::default(),
            host_cache_config: HostCacheConfig::default(),
            host_cache: None,
            resolver: None,
            connector: None,
            #[cfg(feature = "boring-tls")]
            tls: None,
            observers: Vec::new(),
            timeout: None,
            redirect: RedirectPolicy::default(),
            websocket: WebSocketConfig::default(),
            default_headers: HeaderMap::new(),
            max_header_bytes: codec::MAX_HEADER_BYTES,
        }
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("pool_config", &self.pool_config)
            .field("host_cache_config", &self.host_cache_config)
            .field("observers", &self.observers.len())
            .field("timeout", &self.timeout)
            .field("redirect", &self.redirect)
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the per-endpoint connection limit.
    pub fn max_open_per_endpoint(mut self, max: usize) -> Self {
        self.pool_config.max_open_per_endpoint = max;
        self
    }

    /// Use an existing host cache, possibly shared with other clients.
    pub fn host_cache(mut self, cache: HostCache) -> Self {
        self.host_cache = Some(cache);
        self
    }

    pub fn host_cache_config(mut self, config: HostCacheConfig) -> Self {
        self.host_cache_config = config;
        self
    }

    /// Lookup backend for the client's own host cache. Defaults to the
    /// system resolver.
    pub fn resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Replace the dialer used by the pool.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    #[cfg(feature = "boring-tls")]
    pub fn tls_connector(mut self, tls: TlsConnector) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Register a lifecycle observer. Observers run in registration order.
    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Set request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn redirect(mut self, policy: RedirectPolicy) -> Self {
        self.redirect = policy;
        self
    }

    pub fn websocket_config(mut self, config: WebSocketConfig) -> Self {
        self.websocket = config;
        self
    }

    /// Header sent on every request unless the request sets it.
    pub fn default_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn max_header_bytes(mut self, max: usize) -> Self {
        self.max_header_bytes = max;
        self
    }

    /// Build the client.
    ///
    /// Inside a tokio runtime this also starts the pool's idle sweeper.
    pub fn build(self) -> Client {
        let host_cache = self.host_cache.unwrap_or_else(|| {
            let resolver = self.resolver.unwrap_or_else(|| Arc::new(GaiResolver::new()));
            HostCache::new(resolver, self.host_cache_config)
        });

        let connector = match self.connector {
            Some(connector) => connector,
            None => {
                let job = ConnectJob::new(host_cache.clone(), self.pool_config.connect_timeout);
                #[cfg(feature = "boring-tls")]
                let job = match self.tls {
                    Some(tls) => job.with_tls(tls),
                    None => job,
                };
                Arc::new(job)
            }
        };

        let pool = ClientSocketPool::new(connector, self.pool_config);
        let sweeper = tokio::runtime::Handle::try_current()
            .ok()
            .map(|_| pool.start_cleanup_task());

        Client {
            inner: Arc::new(ClientInner {
                host_cache,
                pool,
                observers: Observers::new(self.observers),
                timeout: self.timeout,
                redirect: self.redirect,
                websocket: self.websocket,
                default_headers: self.default_headers,
                max_header_bytes: self.max_header_bytes,
                sweeper,
            }),
        }
    }
}

/// Builder for a single request.
#[derive(Debug)]
pub struct RequestBuilder {
    client: Client,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: RequestBody,
    timeout: Option<Duration>,
    error: Option<NetError>,
}

impl RequestBuilder {
    /// Add a header. An invalid name or value fails the request at `send`.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: TryInto<header::HeaderName>,
        V: TryInto<HeaderValue>,
    {
        match (key.try_into(), value.try_into()) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => {
                self.error.get_or_insert(NetError::InvalidHeader);
            }
        }
        self
    }

    /// Set request body.
    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Set JSON body.
    #[cfg(feature = "json")]
    pub fn json<T: serde::Serialize>(mut self, json: &T) -> Self {
        match serde_json::to_vec(json) {
            Ok(bytes) => {
                self.body = bytes.into();
                self.headers
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            Err(_) => {
                self.error.get_or_insert(NetError::JsonParseError);
            }
        }
        self
    }

    pub fn basic_auth(mut self, username: &str, password: Option<&str>) -> Self {
        match basic_auth(username, password) {
            Ok(value) => {
                self.headers.insert(header::AUTHORIZATION, value);
            }
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    /// Deadline for the whole request, redirects included.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send the request.
    pub async fn send(self) -> Result<HttpResponse, NetError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let url = Url::parse(&self.url).map_err(|_| NetError::InvalidUrl)?;
        let mut request = HttpRequest::new(self.method, url);
        request.headers = self.headers;
        request.body = self.body;
        self.client.execute(request, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_value() {
        let value = basic_auth("aladdin", Some("opensesame")).unwrap();
        assert_eq!(value.to_str().unwrap(), "Basic YWxhZGRpbjpvcGVuc2VzYW1l");
        assert!(value.is_sensitive());
        assert_eq!(basic_auth("u", None).unwrap().to_str().unwrap(), "Basic dTo=");
    }

    #[test]
    fn test_prepare_moves_userinfo_to_header() {
        let client = Client::builder()
            .default_header(header::USER_AGENT, HeaderValue::from_static("netengine"))
            .build();
        let url = Url::parse("http://user:pw@example.com/x").unwrap();
        let request = client.prepare(HttpRequest::new(Method::GET, url)).unwrap();
        assert_eq!(request.url.as_str(), "http://example.com/x");
        assert!(request.headers.contains_key(header::AUTHORIZATION));
        assert_eq!(request.headers[header::USER_AGENT], "netengine");
    }

    #[test]
    fn test_prepare_keeps_explicit_headers() {
        let client = Client::builder()
            .default_header(header::ACCEPT, HeaderValue::from_static("*/*"))
            .build();
        let mut request = HttpRequest::new(Method::GET, Url::parse("http://example.com/").unwrap());
        request.headers.insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        let request = client.prepare(request).unwrap();
        assert_eq!(request.headers[header::ACCEPT], "text/html");
    }

    #[tokio::test]
    async fn test_invalid_header_fails_send() {
        let client = Client::new();
        let err = client
            .get("http://127.0.0.1:1/")
            .header("bad header", "v")
            .send()
            .await
            .unwrap_err();
        assert_eq!(err, NetError::InvalidHeader);
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let client = Client::new();
        assert_eq!(client.get("not a url").send().await.unwrap_err(), NetError::InvalidUrl);
        assert!(client.websocket("http://example.com/").is_err());
    }
}
