//! TTL-bounded host cache in front of a [`Resolve`] implementation.
//!
//! Mirrors Chromium's `HostCache`: entries are immutable snapshots that are
//! superseded, never mutated, on re-resolution. While a lookup for a host is
//! in flight, every other caller for that host awaits the same lookup.

use super::{Name, Resolution, Resolve};
use crate::base::neterror::NetError;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Host cache tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostCacheConfig {
    /// Floor applied to every TTL, bounding query storms for short-lived records.
    pub min_ttl: Duration,
    /// TTL used when the resolver reports none.
    pub default_ttl: Duration,
    /// Upper bound on a single lookup.
    pub lookup_timeout: Duration,
}

impl Default for HostCacheConfig {
    fn default() -> Self {
        Self {
            min_ttl: Duration::from_secs(5),
            default_ttl: Duration::from_secs(60),
            lookup_timeout: Duration::from_secs(10),
        }
    }
}

/// A resolved host, valid until `resolved_at + ttl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    host: Name,
    addrs: Vec<IpAddr>,
    resolved_at: Instant,
    ttl: Duration,
}

impl ResolvedAddress {
    pub fn new(host: Name, addrs: Vec<IpAddr>, resolved_at: Instant, ttl: Duration) -> Self {
        Self {
            host,
            addrs,
            resolved_at,
            ttl,
        }
    }

    pub fn host(&self) -> &Name {
        &self.host
    }

    /// Addresses in resolver preference order.
    pub fn addrs(&self) -> &[IpAddr] {
        &self.addrs
    }

    pub fn resolved_at(&self) -> Instant {
        self.resolved_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.resolved_at) >= self.ttl
    }

    /// Pair every address with `port`, preserving order.
    pub fn socket_addrs(&self, port: u16) -> Vec<SocketAddr> {
        self.addrs.iter().map(|ip| SocketAddr::new(*ip, port)).collect()
    }
}

type Lookup = Shared<BoxFuture<'static, Result<Arc<ResolvedAddress>, NetError>>>;

/// A lookup running on its own task, tagged so only it can retire its slot.
#[derive(Clone)]
struct InFlight {
    id: u64,
    lookup: Lookup,
}

/// Cache of resolved hosts with at-most-one in-flight lookup per host.
///
/// Cloning is cheap; clones share entries and in-flight lookups.
#[derive(Clone)]
pub struct HostCache {
    resolver: Arc<dyn Resolve>,
    config: HostCacheConfig,
    entries: Arc<DashMap<Name, Arc<ResolvedAddress>>>,
    inflight: Arc<DashMap<Name, InFlight>>,
    next_lookup_id: Arc<AtomicU64>,
}

impl HostCache {
    pub fn new(resolver: Arc<dyn Resolve>, config: HostCacheConfig) -> Self {
        Self {
            resolver,
            config,
            entries: Arc::new(DashMap::new()),
            inflight: Arc::new(DashMap::new()),
            next_lookup_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn config(&self) -> &HostCacheConfig {
        &self.config
    }

    /// Resolve `host`, answering from cache while the entry is live.
    ///
    /// IP literals are answered directly and never cached. Failures are not
    /// cached either; the next call issues a fresh lookup.
    pub async fn resolve(&self, host: impl Into<Name>) -> Result<Arc<ResolvedAddress>, NetError> {
        let name = host.into();
        let now = Instant::now();

        if let Some(ip) = name.ip_literal() {
            return Ok(Arc::new(ResolvedAddress::new(name, vec![ip], now, Duration::MAX)));
        }

        if let Some(entry) = self.lookup_live(&name, now) {
            tracing::trace!(host = %name, "host cache hit");
            return Ok(entry);
        }

        let lookup = {
            // The entry guard makes check-then-insert atomic per host.
            let slot = self.inflight.entry(name.clone()).or_insert_with(|| {
                tracing::debug!(host = %name, "host cache miss, starting lookup");
                self.start_lookup(name.clone())
            });
            slot.value().lookup.clone()
        };

        // The lookup runs on its own task, so dropping this future leaves it
        // running to completion; the task retires its own in-flight slot.
        lookup.await
    }

    fn start_lookup(&self, name: Name) -> InFlight {
        let id = self.next_lookup_id.fetch_add(1, Ordering::Relaxed);
        let resolver = self.resolver.clone();
        let entries = self.entries.clone();
        let inflight = self.inflight.clone();
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            let result = run_lookup(resolver, &entries, &config, name.clone()).await;
            inflight.remove_if(&name, |_, current| current.id == id);
            result
        });

        let lookup = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(error = %e, "lookup task did not finish");
                    Err(NetError::Aborted)
                }
            }
        }
        .boxed()
        .shared();

        InFlight { id, lookup }
    }

    fn lookup_live(&self, name: &Name, now: Instant) -> Option<Arc<ResolvedAddress>> {
        let entry = self.entries.get(name)?;
        if entry.is_expired(now) {
            None
        } else {
            Some(entry.value().clone())
        }
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    /// Forget one host.
    pub fn invalidate(&self, host: impl Into<Name>) {
        self.entries.remove(&host.into());
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of cached entries, live or expired.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of lookups currently in flight.
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }
}

async fn run_lookup(
    resolver: Arc<dyn Resolve>,
    entries: &DashMap<Name, Arc<ResolvedAddress>>,
    config: &HostCacheConfig,
    name: Name,
) -> Result<Arc<ResolvedAddress>, NetError> {
    let query = resolver.resolve(name.clone());
    let resolution = match tokio::time::timeout(config.lookup_timeout, query).await {
        Ok(result) => result?,
        Err(_) => {
            tracing::debug!(host = %name, "lookup timed out");
            return Err(NetError::NameResolutionTimedOut {
                domain: name.to_string(),
            });
        }
    };
    let Resolution { addrs, ttl } = resolution;
    if addrs.is_empty() {
        return Err(NetError::NameNotResolved);
    }

    let ttl = ttl.unwrap_or(config.default_ttl).max(config.min_ttl);
    let entry = Arc::new(ResolvedAddress::new(name.clone(), addrs, Instant::now(), ttl));
    entries.insert(name, entry.clone());
    Ok(entry)
}

impl fmt::Debug for HostCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCache")
            .field("config", &self.config)
            .field("entries", &self.entries.len())
            .field("inflight", &self.inflight.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::Resolving;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
        delay: Duration,
        ttl: Option<Duration>,
    }

    impl CountingResolver {
        fn new(delay: Duration, ttl: Option<Duration>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                ttl,
            })
        }
    }

    impl Resolve for CountingResolver {
        fn resolve(&self, _name: Name) -> Resolving {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay;
            let ttl = self.ttl;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                let mut resolution = Resolution::new(vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))]);
                resolution.ttl = ttl;
                Ok(resolution)
            })
        }
    }

    struct FailingResolver;

    impl Resolve for FailingResolver {
        fn resolve(&self, name: Name) -> Resolving {
            Box::pin(async move {
                Err(NetError::dns_failed(
                    name.as_str(),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "nxdomain"),
                ))
            })
        }
    }

    struct HangingResolver;

    impl Resolve for HangingResolver {
        fn resolve(&self, _name: Name) -> Resolving {
            Box::pin(futures::future::pending())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_collapse() {
        let resolver = CountingResolver::new(Duration::from_millis(50), None);
        let cache = HostCache::new(resolver.clone(), HostCacheConfig::default());

        let lookups = (0..16).map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.resolve("collapse.test").await })
        });
        let results = futures::future::join_all(lookups).await;

        for result in results {
            let entry = result.unwrap().unwrap();
            assert_eq!(entry.addrs(), &[IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))]);
        }
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.inflight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_until_expiry() {
        let resolver = CountingResolver::new(Duration::ZERO, Some(Duration::from_secs(30)));
        let cache = HostCache::new(resolver.clone(), HostCacheConfig::default());

        cache.resolve("ttl.test").await.unwrap();
        cache.resolve("ttl.test").await.unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        let entry = cache.resolve("ttl.test").await.unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
        assert_eq!(entry.ttl(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_floor_applied() {
        let resolver = CountingResolver::new(Duration::ZERO, Some(Duration::from_secs(1)));
        let cache = HostCache::new(resolver.clone(), HostCacheConfig::default());

        let entry = cache.resolve("short.test").await.unwrap();
        assert_eq!(entry.ttl(), Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.resolve("short.test").await.unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_ttl_when_unreported() {
        let resolver = CountingResolver::new(Duration::ZERO, None);
        let cache = HostCache::new(resolver, HostCacheConfig::default());
        let entry = cache.resolve("plain.test").await.unwrap();
        assert_eq!(entry.ttl(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_ip_literal_skips_resolver() {
        let resolver = CountingResolver::new(Duration::ZERO, None);
        let cache = HostCache::new(resolver.clone(), HostCacheConfig::default());

        let entry = cache.resolve("127.0.0.1").await.unwrap();
        assert_eq!(entry.addrs(), &[IpAddr::V4(Ipv4Addr::LOCALHOST)]);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_failure_not_cached() {
        let cache = HostCache::new(Arc::new(FailingResolver), HostCacheConfig::default());
        let err = cache.resolve("missing.test").await.unwrap_err();
        assert!(matches!(err, NetError::NameNotResolvedFor { .. }));
        assert!(cache.is_empty());
        assert_eq!(cache.inflight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_timeout() {
        let config = HostCacheConfig {
            lookup_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let cache = HostCache::new(Arc::new(HangingResolver), config);

        let err = cache.resolve("slow.test").await.unwrap_err();
        assert!(
            matches!(err, NetError::NameResolutionTimedOut { ref domain } if domain == "slow.test")
        );
        assert_eq!(err.kind(), crate::base::ErrorKind::Resolution);
    }

    /// Hangs on the first query, answers every later one.
    struct StallOnceResolver {
        calls: AtomicUsize,
    }

    impl Resolve for StallOnceResolver {
        fn resolve(&self, _name: Name) -> Resolving {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Box::pin(futures::future::pending());
            }
            Box::pin(async { Ok(Resolution::new(vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))])) })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_lookup_does_not_poison_host() {
        let resolver = Arc::new(StallOnceResolver {
            calls: AtomicUsize::new(0),
        });
        let cache = HostCache::new(resolver.clone(), HostCacheConfig::default());

        let first = tokio::time::timeout(Duration::from_secs(1), cache.resolve("a.test")).await;
        assert!(first.is_err());

        // The abandoned lookup runs out its own timeout and clears its slot.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(cache.inflight_count(), 0);

        let entry = cache.resolve("a.test").await.unwrap();
        assert_eq!(entry.addrs(), &[IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))]);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_still_fills_cache() {
        let resolver = CountingResolver::new(Duration::from_millis(500), None);
        let cache = HostCache::new(resolver.clone(), HostCacheConfig::default());

        let first = tokio::time::timeout(Duration::from_millis(100), cache.resolve("b.test")).await;
        assert!(first.is_err());
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(cache.len(), 1);
        cache.resolve("b.test").await.unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let resolver = CountingResolver::new(Duration::ZERO, Some(Duration::from_secs(10)));
        let cache = HostCache::new(resolver, HostCacheConfig::default());
        cache.resolve("a.test").await.unwrap();
        cache.resolve("b.test").await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_config_from_json() {
        let config: HostCacheConfig =
            serde_json::from_str(r#"{"min_ttl":{"secs":2,"nanos":0}}"#).unwrap();
        assert_eq!(config.min_ttl, Duration::from_secs(2));
        assert_eq!(config.default_ttl, Duration::from_secs(60));
    }
}
