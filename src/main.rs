use anyhow::Context;
use gavel::bus::{BroadcastBus, RedisBus};
use gavel::cache::{RedisCache, TtlCache};
use gavel::config::Config;
use gavel::ens::{EnsResolver, NameResolver, RpcNameResolver};
use gavel::metrics::PipelineMetrics;
use gavel::price::{CoinGeckoFeed, PriceFeed, PriceOracle};
use gavel::queue::JobQueue;
use gavel::store::{EventStore, RedisEventStore};
use gavel::worker::{EnrichmentWorker, WorkerPool};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Load config
    let config = if Path::new("gavel.toml").exists() {
        Config::load(Path::new("gavel.toml"))?
    } else {
        Config::from_env()
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("gavel v{} starting", env!("CARGO_PKG_VERSION"));

    // --- Redis ---
    // One multiplexed connection, cloned into every component.
    let client = redis::Client::open(config.redis.url.as_str())?;
    let conn = client
        .get_multiplexed_async_connection()
        .await
        .context("failed to connect to Redis")?;
    let pong: String = redis::cmd("PING")
        .query_async(&mut conn.clone())
        .await
        .context("Redis ping failed")?;
    info!(url = %config.redis.url, response = %pong, "connected to Redis");

    // --- Components ---
    let metrics = Arc::new(PipelineMetrics::default());

    let cache: Arc<dyn TtlCache> = Arc::new(RedisCache::new(conn.clone(), &config.redis.prefix));

    let feed: Arc<dyn PriceFeed> = Arc::new(CoinGeckoFeed::new(&config.price.feed_url));
    let price = Arc::new(PriceOracle::new(
        cache.clone(),
        feed,
        Duration::from_secs(config.price.cache_ttl_secs),
        metrics.clone(),
    ));

    let resolver: Arc<dyn NameResolver> = Arc::new(RpcNameResolver::new(&config.ens.rpc_url));
    let ens = Arc::new(EnsResolver::new(
        cache,
        resolver,
        Duration::from_secs(config.ens.positive_ttl_secs),
        Duration::from_secs(config.ens.negative_ttl_secs),
        metrics.clone(),
    ));

    let store: Arc<dyn EventStore> =
        Arc::new(RedisEventStore::new(conn.clone(), &config.redis.prefix));
    let bus: Arc<dyn BroadcastBus> = Arc::new(RedisBus::new(conn.clone()));

    let queue = Arc::new(JobQueue::new(
        conn,
        &config.redis.prefix,
        config.queue.clone(),
    ));

    let handler = Arc::new(EnrichmentWorker::new(price, ens, store, bus));
    let pool = WorkerPool::new(
        queue.clone(),
        handler,
        metrics.clone(),
        config.worker.concurrency,
        Duration::from_millis(config.queue.poll_interval_ms),
    );

    let handles = pool.start();
    info!(
        concurrency = config.worker.concurrency,
        "worker pool started, waiting for jobs"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down...");
    for handle in &handles {
        handle.abort();
    }

    if let Ok(depth) = queue.depth().await {
        info!(depth = ?depth, snapshot = ?metrics.snapshot(), "final pipeline state");
    }

    Ok(())
}
