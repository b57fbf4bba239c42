//! Best-effort broadcast bus.
//!
//! Single writer (the enrichment worker), any number of external readers.
//! Publish is fire-and-forget: no acknowledgment, no delivery guarantee, no
//! backlog for late subscribers. The real-time gateway subscribes on the
//! other side, authenticates sessions, and fans out to clients; subscribers
//! that miss messages recover through the query endpoints, not the bus.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::debug;

/// Channel the worker publishes enriched events on.
pub const AUCTION_CHANNEL: &str = "auction_event";

#[async_trait]
pub trait BroadcastBus: Send + Sync {
    async fn publish(&self, topic: &str, message: &str) -> anyhow::Result<()>;
}

/// Redis pub/sub bus.
#[derive(Clone)]
pub struct RedisBus {
    conn: MultiplexedConnection,
}

impl RedisBus {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl BroadcastBus for RedisBus {
    async fn publish(&self, topic: &str, message: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(topic)
            .arg(message)
            .query_async(&mut conn)
            .await?;
        debug!(topic = %topic, receivers = receivers, "message published");
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory bus doubles for worker tests.

    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingBus {
        pub messages: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl BroadcastBus for RecordingBus {
        async fn publish(&self, topic: &str, message: &str) -> anyhow::Result<()> {
            self.messages
                .lock()
                .unwrap()
                .push((topic.to_string(), message.to_string()));
            Ok(())
        }
    }

    /// A bus whose gateway is down.
    #[derive(Default)]
    pub struct FailingBus;

    #[async_trait]
    impl BroadcastBus for FailingBus {
        async fn publish(&self, _topic: &str, _message: &str) -> anyhow::Result<()> {
            anyhow::bail!("broadcast channel unavailable")
        }
    }
}
