//! System DNS resolver using getaddrinfo.
//!
//! This resolver uses the operating system's native DNS resolution via
//! `getaddrinfo`, executed in a thread pool to avoid blocking the async runtime.
//!
//! # When to Use
//!
//! - When you need to respect system DNS configuration (/etc/hosts, nsswitch)
//! - When DoH/DoT is not required
//! - As a fallback when hickory-dns is not available

use super::{Name, Resolution, Resolve, Resolving};
use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use std::{io, net::ToSocketAddrs};

/// System DNS resolver using `getaddrinfo` in a thread pool.
///
/// `getaddrinfo` reports no TTL, so the cache applies its default.
#[derive(Clone, Debug, Default)]
pub struct GaiResolver;

impl GaiResolver {
    /// Creates a new `GaiResolver`.
    pub fn new() -> Self {
        Self
    }
}

impl Resolve for GaiResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let host = name.as_str().to_string();
            let domain = host.clone();

            let result = tokio::task::spawn_blocking(move || {
                tracing::debug!(host = %host, "resolving via getaddrinfo");
                (host.as_str(), 0u16)
                    .to_socket_addrs()
                    .map(|iter| iter.map(|sa| sa.ip()).collect::<Vec<_>>())
            })
            .await;

            let mut addrs = result
                .map_err(|e| {
                    tracing::error!(error = %e, "DNS resolution task failed");
                    NetError::NameNotResolved
                })?
                .dns_context(&domain)?;

            // getaddrinfo returns one entry per socket type; keep first occurrence.
            let mut seen = std::collections::HashSet::new();
            addrs.retain(|ip| seen.insert(*ip));

            if addrs.is_empty() {
                return Err(NetError::dns_failed(
                    &domain,
                    io::Error::new(io::ErrorKind::NotFound, "No addresses returned by getaddrinfo"),
                ));
            }

            tracing::debug!(domain = %domain, count = addrs.len(), "DNS resolution complete");
            Ok(Resolution::new(addrs))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gai_localhost() {
        let resolver = GaiResolver::new();
        // localhost resolves through /etc/hosts on any sane system.
        if let Ok(resolution) = resolver.resolve(Name::new("localhost")).await {
            assert!(!resolution.addrs.is_empty());
            assert!(resolution.ttl.is_none());
            assert!(resolution.addrs.iter().all(|ip| ip.is_loopback()));
        }
    }

    #[tokio::test]
    async fn test_gai_invalid_domain() {
        let resolver = GaiResolver::new();
        let result = resolver
            .resolve(Name::new("this-domain-definitely-does-not-exist.invalid"))
            .await;
        assert!(result.is_err());
    }
}
