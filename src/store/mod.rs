//! Persistent store adapter: idempotent insert keyed by transaction hash.
//!
//! Data model (Redis adapter, namespaced under the configured prefix):
//!   event:{tx_hash}  → JSON AuctionEvent   (no TTL, durable)
//!   events:index     → LIST of tx hashes, newest first
//!
//! The contract is the interesting part: `insert_if_absent` must be safe to
//! call concurrently and repeatedly with the same record, and a uniqueness
//! conflict is a no-op, not an error. The store's atomic NX write is the
//! sole serialization point between duplicate jobs; no in-process lock
//! would suffice, since multiple worker processes may run.

use crate::model::AuctionEvent;
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with this `txHash` already exists; the first writer won.
    AlreadyExists,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_if_absent(&self, event: &AuctionEvent) -> anyhow::Result<InsertOutcome>;
}

/// Redis-backed event store.
#[derive(Clone)]
pub struct RedisEventStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisEventStore {
    pub fn new(conn: MultiplexedConnection, prefix: &str) -> Self {
        Self {
            conn,
            prefix: prefix.to_string(),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }
}

#[async_trait]
impl EventStore for RedisEventStore {
    async fn insert_if_absent(&self, event: &AuctionEvent) -> anyhow::Result<InsertOutcome> {
        let mut conn = self.conn.clone();
        let key = self.key(&format!("event:{}", event.tx_hash));
        let json = serde_json::to_string(event)?;

        let created: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&json)
            .arg("NX")
            .query_async(&mut conn)
            .await?;

        if created.is_none() {
            debug!(tx_hash = %event.tx_hash, "record already exists");
            return Ok(InsertOutcome::AlreadyExists);
        }

        // insertion-order index for the external query endpoints
        conn.lpush::<_, _, ()>(self.key("events:index"), &event.tx_hash)
            .await?;
        debug!(tx_hash = %event.tx_hash, "record inserted");
        Ok(InsertOutcome::Inserted)
    }
}

/// In-process store for tests and Redis-less runs.
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<String, AuctionEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, tx_hash: &str) -> Option<AuctionEvent> {
        self.records.get(tx_hash).map(|r| r.value().clone())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_if_absent(&self, event: &AuctionEvent) -> anyhow::Result<InsertOutcome> {
        use dashmap::mapref::entry::Entry;
        match self.records.entry(event.tx_hash.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(event.clone());
                Ok(InsertOutcome::Inserted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventKind;
    use rust_decimal::Decimal;

    fn sample_event(tx_hash: &str) -> AuctionEvent {
        AuctionEvent {
            event_type: EventKind::Bid,
            block_number: 1,
            tx_hash: tx_hash.to_string(),
            noun_id: 1,
            bidder_address: None,
            bidder_ens: None,
            winner_address: None,
            winner_ens: None,
            eth_price: Decimal::new(2000, 0),
            usd_price: Some(2000),
            headline: "Noun #1 bid for 1.00 ETH ($2,000)".to_string(),
            timestamp: chrono::Utc::now(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn first_writer_wins() {
        let store = MemoryStore::new();
        let event = sample_event("0x1");

        assert_eq!(
            store.insert_if_absent(&event).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_if_absent(&event).await.unwrap(),
            InsertOutcome::AlreadyExists
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_inserts_of_same_hash_yield_one_record() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert_if_absent(&sample_event("0xsame")).await.unwrap()
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() == InsertOutcome::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn distinct_hashes_insert_independently() {
        let store = MemoryStore::new();
        store.insert_if_absent(&sample_event("0x1")).await.unwrap();
        store.insert_if_absent(&sample_event("0x2")).await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get("0x1").is_some());
    }
}
