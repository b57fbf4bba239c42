//! Pipeline metrics tracking.
//!
//! Counts job outcomes and cache effectiveness:
//! - Jobs completed / retried / dead-lettered
//! - Price and ENS cache hit rates
//!
//! Counters only; queue depth is read from the queue itself. There is no
//! export surface; callers log a `snapshot()` when they want visibility.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared, lock-free pipeline counters.
#[derive(Default)]
pub struct PipelineMetrics {
    jobs_completed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_dead_lettered: AtomicU64,
    price_cache_hits: AtomicU64,
    price_cache_misses: AtomicU64,
    ens_cache_hits: AtomicU64,
    ens_cache_misses: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_completed: u64,
    pub jobs_retried: u64,
    pub jobs_dead_lettered: u64,
    pub price_cache_hits: u64,
    pub price_cache_misses: u64,
    pub price_cache_hit_rate: f64,
    pub ens_cache_hits: u64,
    pub ens_cache_misses: u64,
    pub ens_cache_hit_rate: f64,
}

impl PipelineMetrics {
    pub fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_retried(&self) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_dead_lettered(&self) {
        self.jobs_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn price_cache_hit(&self) {
        self.price_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn price_cache_miss(&self) {
        self.price_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ens_cache_hit(&self) {
        self.ens_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ens_cache_miss(&self) {
        self.ens_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let price_hits = self.price_cache_hits.load(Ordering::Relaxed);
        let price_misses = self.price_cache_misses.load(Ordering::Relaxed);
        let ens_hits = self.ens_cache_hits.load(Ordering::Relaxed);
        let ens_misses = self.ens_cache_misses.load(Ordering::Relaxed);

        MetricsSnapshot {
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            jobs_dead_lettered: self.jobs_dead_lettered.load(Ordering::Relaxed),
            price_cache_hits: price_hits,
            price_cache_misses: price_misses,
            price_cache_hit_rate: hit_rate(price_hits, price_misses),
            ens_cache_hits: ens_hits,
            ens_cache_misses: ens_misses,
            ens_cache_hit_rate: hit_rate(ens_hits, ens_misses),
        }
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        return 0.0;
    }
    hits as f64 / total as f64
}
