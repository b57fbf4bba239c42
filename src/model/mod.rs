//! Auction event data model.
//!
//! Two shapes flow through the pipeline:
//! - `RawAuctionEvent`: the payload the chain indexer enqueues, a closed
//!   tagged enum keyed on `eventType`. Malformed payloads fail at decode
//!   and never reach enrichment.
//! - `AuctionEvent`: the enriched record the worker persists and broadcasts,
//!   with derived price/identity fields and RFC 3339 timestamps.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The closed set of auction event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Created,
    Bid,
    Settled,
}

impl EventKind {
    /// Lowercase form used in headlines.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Bid => "bid",
            EventKind::Settled => "settled",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Raw pre-enrichment payload, one variant per `eventType`.
///
/// Field names mirror the indexer's wire format (camelCase). The amount
/// fields (`value` / `amount`) are stringified wei integers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all_fields = "camelCase")]
pub enum RawAuctionEvent {
    Created {
        block_number: u64,
        tx_hash: String,
        noun_id: u64,
        #[serde(default)]
        start_time: Option<String>,
        #[serde(default)]
        end_time: Option<String>,
        #[serde(default)]
        timestamp: Option<String>,
        #[serde(default)]
        created_at: Option<String>,
        #[serde(default)]
        source: Option<String>,
    },
    Bid {
        block_number: u64,
        tx_hash: String,
        noun_id: u64,
        bidder_address: String,
        value: String,
        #[serde(default)]
        extended: Option<bool>,
        #[serde(default)]
        timestamp: Option<String>,
        #[serde(default)]
        created_at: Option<String>,
        #[serde(default)]
        source: Option<String>,
    },
    Settled {
        block_number: u64,
        tx_hash: String,
        noun_id: u64,
        winner_address: String,
        amount: String,
        #[serde(default)]
        timestamp: Option<String>,
        #[serde(default)]
        created_at: Option<String>,
        #[serde(default)]
        source: Option<String>,
    },
}

impl RawAuctionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RawAuctionEvent::Created { .. } => EventKind::Created,
            RawAuctionEvent::Bid { .. } => EventKind::Bid,
            RawAuctionEvent::Settled { .. } => EventKind::Settled,
        }
    }

    pub fn tx_hash(&self) -> &str {
        match self {
            RawAuctionEvent::Created { tx_hash, .. }
            | RawAuctionEvent::Bid { tx_hash, .. }
            | RawAuctionEvent::Settled { tx_hash, .. } => tx_hash,
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            RawAuctionEvent::Created { block_number, .. }
            | RawAuctionEvent::Bid { block_number, .. }
            | RawAuctionEvent::Settled { block_number, .. } => *block_number,
        }
    }

    pub fn noun_id(&self) -> u64 {
        match self {
            RawAuctionEvent::Created { noun_id, .. }
            | RawAuctionEvent::Bid { noun_id, .. }
            | RawAuctionEvent::Settled { noun_id, .. } => *noun_id,
        }
    }

    pub fn bidder_address(&self) -> Option<&str> {
        match self {
            RawAuctionEvent::Bid { bidder_address, .. } => Some(bidder_address),
            _ => None,
        }
    }

    pub fn winner_address(&self) -> Option<&str> {
        match self {
            RawAuctionEvent::Settled { winner_address, .. } => Some(winner_address),
            _ => None,
        }
    }

    /// The raw wei amount, if this event carries one (`value` on bids,
    /// `amount` on settlements).
    pub fn raw_value(&self) -> Option<&str> {
        match self {
            RawAuctionEvent::Bid { value, .. } => Some(value),
            RawAuctionEvent::Settled { amount, .. } => Some(amount),
            RawAuctionEvent::Created { .. } => None,
        }
    }

    pub fn raw_timestamp(&self) -> Option<&str> {
        match self {
            RawAuctionEvent::Created { timestamp, .. }
            | RawAuctionEvent::Bid { timestamp, .. }
            | RawAuctionEvent::Settled { timestamp, .. } => timestamp.as_deref(),
        }
    }

    pub fn raw_created_at(&self) -> Option<&str> {
        match self {
            RawAuctionEvent::Created { created_at, .. }
            | RawAuctionEvent::Bid { created_at, .. }
            | RawAuctionEvent::Settled { created_at, .. } => created_at.as_deref(),
        }
    }
}

/// Fully enriched auction event: the persisted record and the broadcast
/// message body. `ethPrice`, `usdPrice`, ENS names and `headline` are
/// computed once at enrichment time and never recomputed after a
/// successful insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionEvent {
    pub event_type: EventKind,
    pub block_number: u64,
    /// Unique across all persisted records; the natural idempotency key.
    pub tx_hash: String,
    pub noun_id: u64,
    pub bidder_address: Option<String>,
    pub bidder_ens: Option<String>,
    pub winner_address: Option<String>,
    pub winner_ens: Option<String>,
    pub eth_price: Decimal,
    pub usd_price: Option<i64>,
    pub headline: String,
    /// Chain time of the event.
    pub timestamp: DateTime<Utc>,
    /// Pipeline processing time.
    pub created_at: DateTime<Utc>,
}
