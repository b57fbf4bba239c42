//! ENS reverse resolution with cache-aside and negative caching.
//!
//! Resolution results are cached per lower-cased address:
//!   ens:{address} → name            (TTL: 1h)
//!   ens:{address} → ""              (no name, TTL: 1h)
//!   ens:{address} → ""              (lookup errored, TTL: 5m)
//!
//! The empty marker deliberately conflates "confirmed no name" and "lookup
//! failed"; callers see `None` either way, and the shorter TTL on failures
//! is the only difference. Lookup errors are absorbed here; they are never a
//! worker-level failure.

pub mod rpc;

pub use rpc::RpcNameResolver;

use crate::cache::TtlCache;
use crate::metrics::PipelineMetrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upstream reverse-resolution lookup.
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// `Ok(None)` means confirmed absent; `Err` means the lookup failed.
    async fn lookup_address(&self, address: &str) -> anyhow::Result<Option<String>>;
}

/// Structural address check: 0x followed by 40 hex digits.
pub fn is_address(s: &str) -> bool {
    s.len() == 42
        && s.starts_with("0x")
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Cache-aside wrapper around a `NameResolver`.
pub struct EnsResolver {
    cache: Arc<dyn TtlCache>,
    resolver: Arc<dyn NameResolver>,
    positive_ttl: Duration,
    negative_ttl: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl EnsResolver {
    pub fn new(
        cache: Arc<dyn TtlCache>,
        resolver: Arc<dyn NameResolver>,
        positive_ttl: Duration,
        negative_ttl: Duration,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            cache,
            resolver,
            positive_ttl,
            negative_ttl,
            metrics,
        }
    }

    /// Resolve an address to its ENS name. Infallible: invalid addresses and
    /// failed lookups both come back as `None`.
    pub async fn resolve(&self, address: &str) -> Option<String> {
        if !is_address(address) {
            debug!(address = %address, "invalid address format, skipping lookup");
            return None;
        }

        let key = format!("ens:{}", address.to_lowercase());

        match self.cache.get(&key).await {
            Ok(Some(cached)) => {
                self.metrics.ens_cache_hit();
                return if cached.is_empty() { None } else { Some(cached) };
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "ens cache read failed, treating as miss");
            }
        }

        self.metrics.ens_cache_miss();
        match self.resolver.lookup_address(address).await {
            Ok(name) => {
                let marker = name.clone().unwrap_or_default();
                if let Err(e) = self.cache.put(&key, &marker, self.positive_ttl).await {
                    warn!(error = %e, "ens cache write failed");
                }
                debug!(address = %address, name = ?name, "ens resolved");
                name
            }
            Err(e) => {
                warn!(address = %address, error = %e, "ens lookup failed, caching negative result");
                if let Err(e) = self.cache.put(&key, "", self.negative_ttl).await {
                    warn!(error = %e, "ens negative cache write failed");
                }
                None
            }
        }
    }
}
