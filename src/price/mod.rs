//! Spot price lookup with cache-aside.
//!
//! `PriceOracle` fronts an upstream feed with a single well-known cache key
//! and a short TTL. There is no negative caching here: a feed failure on a
//! cache miss propagates to the caller as a retryable error.

use crate::cache::TtlCache;
use crate::metrics::PipelineMetrics;
use anyhow::Context;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Cache key for the ETH/USD spot price.
pub const PRICE_CACHE_KEY: &str = "price:eth_usd";

/// Upstream spot price feed for the native chain asset, in USD.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn spot_price(&self) -> anyhow::Result<Decimal>;
}

// --- Wire types ---

#[derive(Deserialize)]
struct SimplePriceResponse {
    ethereum: AssetPrice,
}

#[derive(Deserialize)]
struct AssetPrice {
    usd: Decimal,
}

/// CoinGecko `simple/price` feed.
pub struct CoinGeckoFeed {
    http: reqwest::Client,
    url: String,
}

impl CoinGeckoFeed {
    /// `base_url` is the API root, e.g. "https://api.coingecko.com/api/v3".
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!(
                "{}/simple/price?ids=ethereum&vs_currencies=usd",
                base_url.trim_end_matches('/')
            ),
        }
    }
}

#[async_trait]
impl PriceFeed for CoinGeckoFeed {
    async fn spot_price(&self) -> anyhow::Result<Decimal> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("price feed request failed")?
            .error_for_status()
            .context("price feed returned error status")?;

        let body: SimplePriceResponse = resp
            .json()
            .await
            .context("price feed returned unparseable body")?;

        Ok(body.ethereum.usd)
    }
}

/// Cache-aside wrapper around the price feed.
pub struct PriceOracle {
    cache: Arc<dyn TtlCache>,
    feed: Arc<dyn PriceFeed>,
    ttl: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl PriceOracle {
    pub fn new(
        cache: Arc<dyn TtlCache>,
        feed: Arc<dyn PriceFeed>,
        ttl: Duration,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            cache,
            feed,
            ttl,
            metrics,
        }
    }

    /// Current spot price. Served from cache within the TTL window; on miss
    /// the upstream is called and the result cached. Feed and cache-write
    /// failures propagate (the job queue retries them).
    pub async fn get_price(&self) -> anyhow::Result<Decimal> {
        match self.cache.get(PRICE_CACHE_KEY).await {
            Ok(Some(raw)) => match raw.parse::<Decimal>() {
                Ok(price) => {
                    self.metrics.price_cache_hit();
                    return Ok(price);
                }
                Err(_) => {
                    warn!(raw = %raw, "unparseable cached price, refetching");
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "price cache read failed, falling through to feed");
            }
        }

        self.metrics.price_cache_miss();
        let price = self.feed.spot_price().await?;
        self.cache
            .put(PRICE_CACHE_KEY, &price.to_string(), self.ttl)
            .await
            .context("price cache write failed")?;

        info!(price = %price, "spot price fetched");
        Ok(price)
    }
}
