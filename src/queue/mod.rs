//! Durable, at-least-once job queue on Redis.
//!
//! Data model (namespaced under the configured prefix):
//!   job:{key}        → JSON JobRecord            (live until completion)
//!   done:{key}       → "1"                       (TTL: retention window)
//!   queue:waiting    → LIST of job keys, LPUSH in / RPOP out
//!   queue:active     → ZSET key → visibility deadline (ms)
//!   queue:delayed    → ZSET key → retry-ready time (ms)
//!   queue:dead       → LIST of dead-lettered job keys
//!
//! `enqueue` is idempotent per key: a live job record or a completion
//! marker within the retention window makes it a no-op. `dequeue` pops and
//! registers the visibility deadline in one Lua step so a crash cannot
//! strand a job between the two. The maintenance `tick` promotes due
//! retries and redelivers jobs whose handler went silent. Jobs that exhaust
//! their attempts land on the dead-letter list with the last error
//! recorded; they stay inspectable and can be requeued.

use crate::config::QueueConfig;
use crate::model::RawAuctionEvent;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pops one key from waiting and registers its visibility deadline.
const DEQUEUE_SCRIPT: &str = r#"
local key = redis.call('RPOP', KEYS[1])
if key then
  redis.call('ZADD', KEYS[2], ARGV[1], key)
end
return key
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    Dead,
}

/// A queued unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub idempotency_key: String,
    pub payload: RawAuctionEvent,
    pub attempts: u32,
    pub state: JobState,
    pub enqueued_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// The key is already waiting, active, delayed, dead-lettered, or was
    /// completed within the retention window.
    Duplicate,
}

/// What to do with a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    DeadLetter,
}

impl RetryDecision {
    /// Routing for a failure on the given attempt (1-based).
    pub fn for_attempt(attempts: u32, max_attempts: u32, backoff_base: Duration, fatal: bool) -> Self {
        if fatal || attempts >= max_attempts {
            RetryDecision::DeadLetter
        } else {
            RetryDecision::RetryAfter(retry_delay(attempts, backoff_base))
        }
    }
}

/// Exponential backoff: base × 2^(attempts-1).
pub fn retry_delay(attempts: u32, base: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempts.saturating_sub(1)))
}

/// Counts from one maintenance pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickStats {
    pub promoted: usize,
    pub redelivered: usize,
}

/// Queue depths, for the metrics surface.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct QueueDepth {
    pub waiting: u64,
    pub delayed: u64,
    pub active: u64,
    pub dead: u64,
}

/// Redis-backed durable job queue.
#[derive(Clone)]
pub struct JobQueue {
    conn: MultiplexedConnection,
    prefix: String,
    cfg: QueueConfig,
}

impl JobQueue {
    pub fn new(conn: MultiplexedConnection, prefix: &str, cfg: QueueConfig) -> Self {
        Self {
            conn,
            prefix: prefix.to_string(),
            cfg,
        }
    }

    /// Deterministic idempotency key for a transaction hash.
    pub fn idempotency_key(tx_hash: &str) -> String {
        format!("blockchain-{}", tx_hash)
    }

    /// Build a namespaced key: "{prefix}:{suffix}"
    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    fn job_key(&self, key: &str) -> String {
        self.key(&format!("job:{}", key))
    }

    fn done_key(&self, key: &str) -> String {
        self.key(&format!("done:{}", key))
    }

    fn waiting_key(&self) -> String {
        self.key("queue:waiting")
    }

    fn active_key(&self) -> String {
        self.key("queue:active")
    }

    fn delayed_key(&self) -> String {
        self.key("queue:delayed")
    }

    fn dead_key(&self) -> String {
        self.key("queue:dead")
    }

    /// Enqueue a payload under its idempotency key. Safe to call repeatedly
    /// and concurrently: the job record SET NX is the deduplication gate.
    pub async fn enqueue(&self, payload: &RawAuctionEvent) -> anyhow::Result<EnqueueOutcome> {
        let key = Self::idempotency_key(payload.tx_hash());
        let mut conn = self.conn.clone();

        let completed: bool = conn.exists(self.done_key(&key)).await?;
        if completed {
            debug!(key = %key, "already completed within retention window, skipping");
            return Ok(EnqueueOutcome::Duplicate);
        }

        let record = JobRecord {
            idempotency_key: key.clone(),
            payload: payload.clone(),
            attempts: 0,
            state: JobState::Waiting,
            enqueued_at: Utc::now(),
            last_error: None,
        };
        let json = serde_json::to_string(&record)?;

        let created: Option<String> = redis::cmd("SET")
            .arg(self.job_key(&key))
            .arg(&json)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        if created.is_none() {
            debug!(key = %key, "job already queued, skipping");
            return Ok(EnqueueOutcome::Duplicate);
        }

        conn.lpush::<_, _, ()>(self.waiting_key(), &key).await?;
        info!(key = %key, event = %record.payload.kind(), noun_id = record.payload.noun_id(), "job enqueued");
        Ok(EnqueueOutcome::Enqueued)
    }

    /// Pull one job for processing. Returns `None` when the queue is idle.
    /// The job's attempt count is incremented here, when processing starts.
    pub async fn dequeue(&self) -> anyhow::Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let deadline = now_ms() + (self.cfg.visibility_timeout_secs as i64) * 1000;

        let key: Option<String> = redis::Script::new(DEQUEUE_SCRIPT)
            .key(self.waiting_key())
            .key(self.active_key())
            .arg(deadline)
            .invoke_async(&mut conn)
            .await?;
        let Some(key) = key else {
            return Ok(None);
        };

        let json: Option<String> = conn.get(self.job_key(&key)).await?;
        let Some(json) = json else {
            warn!(key = %key, "dequeued key has no job record, dropping");
            conn.zrem::<_, _, ()>(self.active_key(), &key).await?;
            return Ok(None);
        };

        let mut record: JobRecord = match serde_json::from_str(&json) {
            Ok(r) => r,
            Err(e) => {
                warn!(key = %key, error = %e, "corrupt job record, dead-lettering");
                conn.zrem::<_, _, ()>(self.active_key(), &key).await?;
                conn.lpush::<_, _, ()>(self.dead_key(), &key).await?;
                return Ok(None);
            }
        };

        record.attempts += 1;
        record.state = JobState::Active;
        conn.set::<_, _, ()>(self.job_key(&key), serde_json::to_string(&record)?)
            .await?;

        debug!(key = %key, attempt = record.attempts, "job dequeued");
        Ok(Some(record))
    }

    /// Acknowledge success: drop the job record and leave a completion
    /// marker for the retention window.
    pub async fn complete(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>(self.active_key(), key).await?;
        conn.del::<_, ()>(self.job_key(key)).await?;
        conn.set_ex::<_, _, ()>(self.done_key(key), "1", self.cfg.retention_secs)
            .await?;
        Ok(())
    }

    /// Record a failure and route the job: schedule a backed-off retry, or
    /// dead-letter it once attempts are exhausted (or the failure is fatal).
    pub async fn fail(
        &self,
        record: &mut JobRecord,
        error: &str,
        fatal: bool,
    ) -> anyhow::Result<RetryDecision> {
        let mut conn = self.conn.clone();
        let key = record.idempotency_key.clone();
        record.last_error = Some(error.to_string());

        let decision = RetryDecision::for_attempt(
            record.attempts,
            self.cfg.max_attempts,
            Duration::from_millis(self.cfg.backoff_base_ms),
            fatal,
        );

        match decision {
            RetryDecision::RetryAfter(delay) => {
                record.state = JobState::Delayed;
                conn.set::<_, _, ()>(self.job_key(&key), serde_json::to_string(record)?)
                    .await?;
                conn.zrem::<_, _, ()>(self.active_key(), &key).await?;
                let ready_at = now_ms() + delay.as_millis() as i64;
                conn.zadd::<_, _, _, ()>(self.delayed_key(), &key, ready_at)
                    .await?;
                info!(
                    key = %key,
                    attempt = record.attempts,
                    retry_in = ?delay,
                    error = %error,
                    "job failed, retry scheduled"
                );
            }
            RetryDecision::DeadLetter => {
                record.state = JobState::Dead;
                conn.set::<_, _, ()>(self.job_key(&key), serde_json::to_string(record)?)
                    .await?;
                conn.zrem::<_, _, ()>(self.active_key(), &key).await?;
                conn.lpush::<_, _, ()>(self.dead_key(), &key).await?;
                warn!(
                    key = %key,
                    attempts = record.attempts,
                    fatal = fatal,
                    error = %error,
                    "job dead-lettered"
                );
            }
        }

        Ok(decision)
    }

    /// Maintenance pass: promote due retries to waiting and redeliver jobs
    /// whose visibility deadline has passed. The ZREM result arbitrates
    /// between concurrent maintenance tasks, so a key is pushed at most once.
    pub async fn tick(&self) -> anyhow::Result<TickStats> {
        let mut conn = self.conn.clone();
        let now = now_ms();
        let mut stats = TickStats::default();

        let due: Vec<String> = conn
            .zrangebyscore(self.delayed_key(), "-inf", now)
            .await?;
        for key in due {
            let removed: i32 = conn.zrem(self.delayed_key(), &key).await?;
            if removed == 1 {
                conn.lpush::<_, _, ()>(self.waiting_key(), &key).await?;
                stats.promoted += 1;
            }
        }

        let expired: Vec<String> = conn
            .zrangebyscore(self.active_key(), "-inf", now)
            .await?;
        for key in expired {
            let removed: i32 = conn.zrem(self.active_key(), &key).await?;
            if removed == 1 {
                conn.lpush::<_, _, ()>(self.waiting_key(), &key).await?;
                stats.redelivered += 1;
            }
        }

        if stats.promoted > 0 {
            debug!(count = stats.promoted, "promoted delayed jobs");
        }
        if stats.redelivered > 0 {
            info!(count = stats.redelivered, "redelivered jobs past visibility timeout");
        }
        Ok(stats)
    }

    pub async fn depth(&self) -> anyhow::Result<QueueDepth> {
        let mut conn = self.conn.clone();
        Ok(QueueDepth {
            waiting: conn.llen(self.waiting_key()).await?,
            delayed: conn.zcard(self.delayed_key()).await?,
            active: conn.zcard(self.active_key()).await?,
            dead: conn.llen(self.dead_key()).await?,
        })
    }

    /// All dead-lettered jobs, newest first.
    pub async fn dead_letters(&self) -> anyhow::Result<Vec<JobRecord>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.lrange(self.dead_key(), 0, -1).await?;

        let mut jobs = Vec::new();
        for key in keys {
            let json: Option<String> = conn.get(self.job_key(&key)).await?;
            if let Some(json) = json {
                match serde_json::from_str(&json) {
                    Ok(job) => jobs.push(job),
                    Err(e) => warn!(key = %key, error = %e, "unreadable dead-letter record"),
                }
            }
        }
        Ok(jobs)
    }

    /// Put a dead-lettered job back on the waiting list with a fresh
    /// attempt budget. Returns false if the key is not dead-lettered.
    pub async fn requeue_dead(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i32 = conn.lrem(self.dead_key(), 0, key).await?;
        if removed == 0 {
            return Ok(false);
        }

        let json: Option<String> = conn.get(self.job_key(key)).await?;
        let Some(json) = json else {
            warn!(key = %key, "dead-lettered key has no job record");
            return Ok(false);
        };
        let mut record: JobRecord = serde_json::from_str(&json)?;
        record.attempts = 0;
        record.state = JobState::Waiting;
        conn.set::<_, _, ()>(self.job_key(key), serde_json::to_string(&record)?)
            .await?;
        conn.lpush::<_, _, ()>(self.waiting_key(), key).await?;
        info!(key = %key, "dead-lettered job requeued");
        Ok(true)
    }

    pub async fn requeue_all_dead(&self) -> anyhow::Result<usize> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.lrange(self.dead_key(), 0, -1).await?;
        let mut count = 0;
        for key in keys {
            // the LREM inside requeue_dead arbitrates concurrent callers
            if self.requeue_dead(&key).await? {
                count += 1;
            }
        }
        Ok(count)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
