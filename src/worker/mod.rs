//! Enrichment worker and handler pool.
//!
//! The worker owns the per-job pipeline: price lookup → identity resolution
//! → derivation → idempotent insert → broadcast. Step order within a job is
//! strict; across jobs there is no ordering, and a duplicate job for the
//! same transaction may run concurrently with (or after) a completed one;
//! the store's NX insert is what keeps the record unique.
//!
//! Failure routing: anything before the insert is retryable except a
//! malformed amount (fatal); a broadcast failure after a successful insert
//! is logged and swallowed, so the job still completes. That gap between
//! "durably recorded" and "announced" is accepted; clients recover missed
//! events through the query endpoints.

pub mod derive;

use crate::bus::{BroadcastBus, AUCTION_CHANNEL};
use crate::ens::EnsResolver;
use crate::metrics::PipelineMetrics;
use crate::model::{AuctionEvent, RawAuctionEvent};
use crate::price::PriceOracle;
use crate::queue::{JobQueue, JobRecord, RetryDecision};
use crate::store::{EventStore, InsertOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of one handler attempt.
pub enum JobOutcome {
    Completed,
    /// Transient failure; the queue retries with backoff.
    Retry(anyhow::Error),
    /// Unprocessable job; dead-lettered without burning retries.
    Fatal(anyhow::Error),
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobRecord) -> JobOutcome;
}

/// The enrichment handler.
pub struct EnrichmentWorker {
    price: Arc<PriceOracle>,
    ens: Arc<EnsResolver>,
    store: Arc<dyn EventStore>,
    bus: Arc<dyn BroadcastBus>,
}

impl EnrichmentWorker {
    pub fn new(
        price: Arc<PriceOracle>,
        ens: Arc<EnsResolver>,
        store: Arc<dyn EventStore>,
        bus: Arc<dyn BroadcastBus>,
    ) -> Self {
        Self {
            price,
            ens,
            store,
            bus,
        }
    }

    async fn enrich(&self, raw: &RawAuctionEvent) -> Result<AuctionEvent, JobOutcome> {
        let eth_price = self
            .price
            .get_price()
            .await
            .map_err(|e| JobOutcome::Retry(e.context("price lookup failed")))?;

        // absent addresses are expected (e.g. winner on non-Settled events)
        // and resolve to null without an upstream call
        let bidder_ens = match raw.bidder_address() {
            Some(addr) => self.ens.resolve(addr).await,
            None => None,
        };
        let winner_ens = match raw.winner_address() {
            Some(addr) => self.ens.resolve(addr).await,
            None => None,
        };

        let eth_amount = match raw.raw_value() {
            Some(value) => Some(
                derive::wei_to_eth(value)
                    .map_err(|e| JobOutcome::Fatal(e.context("malformed amount in payload")))?,
            ),
            None => None,
        };
        let usd_price = eth_amount.and_then(|eth| derive::usd_amount(eth, eth_price));
        let headline = derive::headline(raw.kind(), raw.noun_id(), eth_amount, usd_price);

        Ok(AuctionEvent {
            event_type: raw.kind(),
            block_number: raw.block_number(),
            tx_hash: raw.tx_hash().to_string(),
            noun_id: raw.noun_id(),
            bidder_address: raw.bidder_address().map(str::to_string),
            bidder_ens,
            winner_address: raw.winner_address().map(str::to_string),
            winner_ens,
            eth_price,
            usd_price,
            headline,
            timestamp: derive::parse_timestamp(raw.raw_timestamp()),
            created_at: derive::parse_timestamp(raw.raw_created_at()),
        })
    }
}

#[async_trait]
impl JobHandler for EnrichmentWorker {
    async fn handle(&self, job: &JobRecord) -> JobOutcome {
        let raw = &job.payload;
        debug!(
            key = %job.idempotency_key,
            event = %raw.kind(),
            noun_id = raw.noun_id(),
            attempt = job.attempts,
            "processing job"
        );

        let event = match self.enrich(raw).await {
            Ok(event) => event,
            Err(outcome) => return outcome,
        };

        match self.store.insert_if_absent(&event).await {
            Ok(InsertOutcome::Inserted) => {
                info!(tx_hash = %event.tx_hash, headline = %event.headline, "auction event recorded");
            }
            Ok(InsertOutcome::AlreadyExists) => {
                debug!(tx_hash = %event.tx_hash, "event already recorded, treating as success");
            }
            Err(e) => return JobOutcome::Retry(e.context("store insert failed")),
        }

        let message = match serde_json::to_string(&event) {
            Ok(m) => m,
            Err(e) => {
                return JobOutcome::Fatal(anyhow::Error::from(e).context("unserializable event"))
            }
        };
        // persistence already succeeded; a broadcast failure must not fail
        // the job or roll anything back
        if let Err(e) = self.bus.publish(AUCTION_CHANNEL, &message).await {
            warn!(tx_hash = %event.tx_hash, error = %e, "broadcast failed, event is persisted");
        }

        JobOutcome::Completed
    }
}

/// Fixed-size pool of handler tasks plus the queue maintenance tick.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    metrics: Arc<PipelineMetrics>,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        handler: Arc<dyn JobHandler>,
        metrics: Arc<PipelineMetrics>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            handler,
            metrics,
            concurrency,
            poll_interval,
        }
    }

    /// Spawn the maintenance task and the handler tasks. Returns all join
    /// handles; the tasks run until aborted.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.concurrency + 1);

        let queue = self.queue.clone();
        let interval = self.poll_interval;
        handles.push(tokio::spawn(async move {
            loop {
                if let Err(e) = queue.tick().await {
                    error!(error = %e, "queue maintenance failed");
                }
                tokio::time::sleep(interval).await;
            }
        }));

        for id in 0..self.concurrency {
            let queue = self.queue.clone();
            let handler = self.handler.clone();
            let metrics = self.metrics.clone();
            let interval = self.poll_interval;
            handles.push(tokio::spawn(async move {
                worker_loop(id, queue, handler, metrics, interval).await;
            }));
        }

        handles
    }
}

async fn worker_loop(
    id: usize,
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    metrics: Arc<PipelineMetrics>,
    poll_interval: Duration,
) {
    debug!(worker = id, "worker started");
    loop {
        match queue.dequeue().await {
            Ok(Some(mut job)) => {
                process_job(&queue, handler.as_ref(), &metrics, &mut job).await;
            }
            Ok(None) => tokio::time::sleep(poll_interval).await,
            Err(e) => {
                error!(worker = id, error = %e, "dequeue failed");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

async fn process_job(
    queue: &JobQueue,
    handler: &dyn JobHandler,
    metrics: &PipelineMetrics,
    job: &mut JobRecord,
) {
    let key = job.idempotency_key.clone();
    match handler.handle(job).await {
        JobOutcome::Completed => match queue.complete(&key).await {
            Ok(()) => {
                metrics.job_completed();
                info!(key = %key, "job completed");
            }
            Err(e) => error!(key = %key, error = %e, "failed to ack completed job"),
        },
        JobOutcome::Retry(e) => route_failure(queue, metrics, job, &e, false).await,
        JobOutcome::Fatal(e) => route_failure(queue, metrics, job, &e, true).await,
    }
}

async fn route_failure(
    queue: &JobQueue,
    metrics: &PipelineMetrics,
    job: &mut JobRecord,
    error: &anyhow::Error,
    fatal: bool,
) {
    match queue.fail(job, &format!("{error:#}"), fatal).await {
        Ok(RetryDecision::RetryAfter(_)) => metrics.job_retried(),
        Ok(RetryDecision::DeadLetter) => metrics.job_dead_lettered(),
        Err(e) => {
            // the job record is untouched; the visibility timeout will
            // redeliver it
            error!(key = %job.idempotency_key, error = %e, "failed to record job failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::{FailingBus, RecordingBus};
    use crate::cache::MemoryCache;
    use crate::ens::NameResolver;
    use crate::model::EventKind;
    use crate::price::PriceFeed;
    use crate::queue::JobState;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use rust_decimal::Decimal;

    const WINNER: &str = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045";
    const BIDDER: &str = "0xb1DDe4Fd322C23AF862D1D1c06F886Efd2078E50";

    struct FixedFeed(Decimal);

    #[async_trait]
    impl PriceFeed for FixedFeed {
        async fn spot_price(&self) -> anyhow::Result<Decimal> {
            Ok(self.0)
        }
    }

    struct DownFeed;

    #[async_trait]
    impl PriceFeed for DownFeed {
        async fn spot_price(&self) -> anyhow::Result<Decimal> {
            anyhow::bail!("price feed unreachable")
        }
    }

    struct FixedResolver(Option<String>);

    #[async_trait]
    impl NameResolver for FixedResolver {
        async fn lookup_address(&self, _address: &str) -> anyhow::Result<Option<String>> {
            Ok(self.0.clone())
        }
    }

    struct Fixture {
        worker: EnrichmentWorker,
        store: Arc<MemoryStore>,
        bus: Arc<RecordingBus>,
    }

    fn fixture_with(feed: Arc<dyn PriceFeed>, name: Option<&str>) -> Fixture {
        let cache = Arc::new(MemoryCache::new());
        let metrics = Arc::new(PipelineMetrics::default());
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(RecordingBus::default());

        let price = Arc::new(PriceOracle::new(
            cache.clone(),
            feed,
            Duration::from_secs(60),
            metrics.clone(),
        ));
        let ens = Arc::new(EnsResolver::new(
            cache,
            Arc::new(FixedResolver(name.map(str::to_string))),
            Duration::from_secs(3600),
            Duration::from_secs(300),
            metrics,
        ));

        Fixture {
            worker: EnrichmentWorker::new(price, ens, store.clone(), bus.clone()),
            store,
            bus,
        }
    }

    fn fixture(price: Decimal, name: Option<&str>) -> Fixture {
        fixture_with(Arc::new(FixedFeed(price)), name)
    }

    fn job(payload: RawAuctionEvent) -> JobRecord {
        JobRecord {
            idempotency_key: JobQueue::idempotency_key(payload.tx_hash()),
            payload,
            attempts: 1,
            state: JobState::Active,
            enqueued_at: Utc::now(),
            last_error: None,
        }
    }

    fn settled_payload() -> RawAuctionEvent {
        RawAuctionEvent::Settled {
            block_number: 19123456,
            tx_hash: "0xsettled42".to_string(),
            noun_id: 42,
            winner_address: WINNER.to_string(),
            amount: "2500000000000000000".to_string(),
            timestamp: Some("2024-01-15T12:00:00.000Z".to_string()),
            created_at: None,
            source: Some("blockchain".to_string()),
        }
    }

    #[tokio::test]
    async fn settled_event_end_to_end() {
        let fx = fixture(Decimal::new(2000, 0), Some("vitalik.eth"));

        let outcome = fx.worker.handle(&job(settled_payload())).await;
        assert!(matches!(outcome, JobOutcome::Completed));

        assert_eq!(fx.store.len(), 1);
        let event = fx.store.get("0xsettled42").unwrap();
        assert_eq!(event.event_type, EventKind::Settled);
        assert_eq!(event.usd_price, Some(5000));
        assert_eq!(event.winner_ens, Some("vitalik.eth".to_string()));
        assert_eq!(event.bidder_address, None);
        assert_eq!(event.headline, "Noun #42 settled for 2.50 ETH ($5,000)");
        assert_eq!(event.timestamp.to_rfc3339(), "2024-01-15T12:00:00+00:00");

        // exactly one broadcast, carrying the same fields
        let messages = fx.bus.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        let (topic, body) = &messages[0];
        assert_eq!(topic, AUCTION_CHANNEL);
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["txHash"], "0xsettled42");
        assert_eq!(json["usdPrice"], 5000);
        assert_eq!(json["headline"], "Noun #42 settled for 2.50 ETH ($5,000)");
        assert_eq!(json["winnerEns"], "vitalik.eth");
        assert!(json["timestamp"].as_str().unwrap().starts_with("2024-01-15T12:00:00"));
    }

    #[tokio::test]
    async fn duplicate_jobs_persist_exactly_one_record() {
        let fx = fixture(Decimal::new(2000, 0), None);
        let job = job(settled_payload());

        for _ in 0..3 {
            let outcome = fx.worker.handle(&job).await;
            assert!(matches!(outcome, JobOutcome::Completed));
        }
        assert_eq!(fx.store.len(), 1);
    }

    #[tokio::test]
    async fn bid_event_derives_usd_and_resolves_bidder() {
        let fx = fixture(Decimal::new(2500, 0), Some("bidder.eth"));
        let payload = RawAuctionEvent::Bid {
            block_number: 19123460,
            tx_hash: "0xbid1".to_string(),
            noun_id: 42,
            bidder_address: BIDDER.to_string(),
            value: "1000000000000000000".to_string(),
            extended: Some(false),
            timestamp: None,
            created_at: None,
            source: None,
        };

        let outcome = fx.worker.handle(&job(payload)).await;
        assert!(matches!(outcome, JobOutcome::Completed));

        let event = fx.store.get("0xbid1").unwrap();
        assert_eq!(event.usd_price, Some(2500));
        assert_eq!(event.bidder_ens, Some("bidder.eth".to_string()));
        assert_eq!(event.winner_ens, None);
        assert_eq!(event.headline, "Noun #42 bid for 1.00 ETH ($2,500)");
    }

    #[tokio::test]
    async fn created_event_has_no_usd_price() {
        let fx = fixture(Decimal::new(2000, 0), None);
        let payload = RawAuctionEvent::Created {
            block_number: 19123400,
            tx_hash: "0xcreated7".to_string(),
            noun_id: 7,
            start_time: Some("1705320000".to_string()),
            end_time: Some("1705406400".to_string()),
            timestamp: None,
            created_at: None,
            source: None,
        };

        let outcome = fx.worker.handle(&job(payload)).await;
        assert!(matches!(outcome, JobOutcome::Completed));

        let event = fx.store.get("0xcreated7").unwrap();
        assert_eq!(event.usd_price, None);
        assert_eq!(event.headline, "Noun #7 created");
        // eth price is still recorded at enrichment time
        assert_eq!(event.eth_price, Decimal::new(2000, 0));
    }

    #[tokio::test]
    async fn price_feed_failure_is_retryable() {
        let fx = fixture_with(Arc::new(DownFeed), None);

        let outcome = fx.worker.handle(&job(settled_payload())).await;
        assert!(matches!(outcome, JobOutcome::Retry(_)));
        assert!(fx.store.is_empty());
        assert!(fx.bus.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_amount_is_fatal() {
        let fx = fixture(Decimal::new(2000, 0), None);
        let payload = RawAuctionEvent::Settled {
            block_number: 1,
            tx_hash: "0xbadamount".to_string(),
            noun_id: 1,
            winner_address: WINNER.to_string(),
            amount: "not-a-number".to_string(),
            timestamp: None,
            created_at: None,
            source: None,
        };

        let outcome = fx.worker.handle(&job(payload)).await;
        assert!(matches!(outcome, JobOutcome::Fatal(_)));
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn broadcast_failure_still_completes_the_job() {
        let cache = Arc::new(MemoryCache::new());
        let metrics = Arc::new(PipelineMetrics::default());
        let store = Arc::new(MemoryStore::new());
        let price = Arc::new(PriceOracle::new(
            cache.clone(),
            Arc::new(FixedFeed(Decimal::new(2000, 0))),
            Duration::from_secs(60),
            metrics.clone(),
        ));
        let ens = Arc::new(EnsResolver::new(
            cache,
            Arc::new(FixedResolver(None)),
            Duration::from_secs(3600),
            Duration::from_secs(300),
            metrics,
        ));
        let worker =
            EnrichmentWorker::new(price, ens, store.clone(), Arc::new(FailingBus));

        let outcome = worker.handle(&job(settled_payload())).await;
        assert!(matches!(outcome, JobOutcome::Completed));
        // persisted despite the failed broadcast
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn invalid_winner_address_resolves_to_null() {
        let fx = fixture(Decimal::new(2000, 0), Some("should-not-appear.eth"));
        let payload = RawAuctionEvent::Settled {
            block_number: 1,
            tx_hash: "0xbadaddr".to_string(),
            noun_id: 9,
            winner_address: "definitely-not-an-address".to_string(),
            amount: "1000000000000000000".to_string(),
            timestamp: None,
            created_at: None,
            source: None,
        };

        let outcome = fx.worker.handle(&job(payload)).await;
        assert!(matches!(outcome, JobOutcome::Completed));
        assert_eq!(fx.store.get("0xbadaddr").unwrap().winner_ens, None);
    }
}
