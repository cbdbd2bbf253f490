//! DNS Resolution Module
//!
//! Provides pluggable DNS resolution with support for:
//! - System resolver (getaddrinfo via thread pool)
//! - Async hickory-dns resolver (DoH/DoT capable)
//! - Hostname-to-IP override mechanism
//! - A TTL-bounded [`HostCache`] that collapses concurrent lookups
//!
//! # Architecture
//!
//! This module mirrors Chromium's `HostResolver` / `HostCache` split. The
//! `Resolve` trait is the lookup collaborator; `HostCache` is an explicitly
//! constructed, explicitly owned cache in front of it. There is no process
//! singleton: every [`Client`](crate::client::Client) owns its cache.
//!
//! # Example
//!
//! ```rust,ignore
//! use netengine::dns::{HostCache, HostCacheConfig, HickoryResolver};
//! use std::sync::Arc;
//!
//! let cache = HostCache::new(Arc::new(HickoryResolver::new()), HostCacheConfig::default());
//! let resolved = cache.resolve("example.com").await?;
//! for ip in resolved.addrs() {
//!     println!("Resolved: {}", ip);
//! }
//! ```

mod cache;
mod gai;
mod hickory;
mod resolve;

pub use cache::{HostCache, HostCacheConfig, ResolvedAddress};
pub use gai::GaiResolver;
pub use hickory::HickoryResolver;
pub use resolve::{DnsResolverWithOverrides, Name, Resolution, Resolve, Resolving};
