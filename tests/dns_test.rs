//! DNS Module Tests
//!
//! Covers:
//! - `DnsResolverWithOverrides` in front of a mock resolver
//! - `HostCache` sharing between a cache owner and a client
//! - A resolver that never answers: the request fails with a resolution
//!   error and no connection is ever dialed

use futures::future::BoxFuture;
use netengine::base::{ErrorKind, NetError};
use netengine::dns::{
    DnsResolverWithOverrides, GaiResolver, HostCache, HostCacheConfig, Name, Resolution, Resolve,
    Resolving,
};
use netengine::socket::{BoxedSocket, Connector, Endpoint};
use netengine::Client;
use std::borrow::Cow;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct MockResolver {
    calls: AtomicUsize,
    answer: Vec<IpAddr>,
}

impl MockResolver {
    fn new(answer: Vec<IpAddr>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            answer,
        })
    }
}

impl Resolve for MockResolver {
    fn resolve(&self, _name: Name) -> Resolving {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let addrs = self.answer.clone();
        Box::pin(async move { Ok(Resolution::new(addrs)) })
    }
}

struct HangingResolver;

impl Resolve for HangingResolver {
    fn resolve(&self, _name: Name) -> Resolving {
        Box::pin(futures::future::pending())
    }
}

#[derive(Default)]
struct CountingConnector {
    dials: AtomicUsize,
}

impl Connector for CountingConnector {
    fn connect<'a>(
        &'a self,
        _endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<BoxedSocket, NetError>> {
        Box::pin(async move {
            self.dials.fetch_add(1, Ordering::SeqCst);
            Err(NetError::ConnectionRefused)
        })
    }
}

#[tokio::test]
async fn test_overrides_short_circuit() {
    let inner = MockResolver::new(vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))]);
    let mut overrides = HashMap::new();
    overrides.insert(Cow::Borrowed("api.local"), vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
    let resolver = DnsResolverWithOverrides::new(inner.clone(), overrides);
    assert_eq!(resolver.override_count(), 1);

    let local = resolver.resolve(Name::new("api.local")).await.unwrap();
    assert_eq!(local.addrs, vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
    assert_eq!(inner.calls.load(Ordering::SeqCst), 0);

    let other = resolver.resolve(Name::new("other.test")).await.unwrap();
    assert_eq!(other.addrs, vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))]);
    assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_gai_resolves_localhost() {
    let cache = HostCache::new(Arc::new(GaiResolver::new()), HostCacheConfig::default());
    let resolved = cache.resolve("localhost").await.unwrap();
    assert!(resolved.addrs().iter().all(|ip| ip.is_loopback()));
    assert!(resolved.ttl() >= Duration::from_secs(5));
}

#[tokio::test]
async fn test_ip_literal_skips_resolver() {
    let resolver = MockResolver::new(vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))]);
    let cache = HostCache::new(resolver.clone(), HostCacheConfig::default());
    let resolved = cache.resolve("127.0.0.1").await.unwrap();
    assert_eq!(resolved.addrs(), &[IpAddr::V4(Ipv4Addr::LOCALHOST)]);
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_client_uses_shared_cache() {
    let resolver = MockResolver::new(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
    let cache = HostCache::new(resolver.clone(), HostCacheConfig::default());
    cache.resolve("shared.test").await.unwrap();

    let connector = Arc::new(CountingConnector::default());
    let client = Client::builder()
        .host_cache(cache.clone())
        .connector(connector.clone())
        .build();
    let err = client.get("http://shared.test/").send().await.unwrap_err();

    // Served from the warm cache; the failure comes from the dialer.
    assert_eq!(err, NetError::ConnectionRefused);
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_resolver_never_dials() {
    let connector = Arc::new(CountingConnector::default());
    let client = Client::builder()
        .resolver(Arc::new(HangingResolver))
        .connector(connector.clone())
        .timeout(Duration::from_secs(2))
        .build();

    let err = client.get("http://hang.test/").send().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolution);
    assert_eq!(connector.dials.load(Ordering::SeqCst), 0);
    assert_eq!(client.pool().total_open_all(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_lookup_timeout_without_request_deadline() {
    let config = HostCacheConfig {
        lookup_timeout: Duration::from_secs(1),
        ..Default::default()
    };
    let connector = Arc::new(CountingConnector::default());
    let client = Client::builder()
        .resolver(Arc::new(HangingResolver))
        .host_cache_config(config)
        .connector(connector.clone())
        .build();

    let err = client.get("http://hang.test/").send().await.unwrap_err();
    assert!(matches!(err, NetError::NameResolutionTimedOut { .. }));
    assert_eq!(connector.dials.load(Ordering::SeqCst), 0);
}
