//! Engine counters and the stats snapshot returned to callers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::cache::CacheStats;

/// Counters updated by the engine on every query and ingestion.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    queries: AtomicU64,
    cache_hits: AtomicU64,
    total_response_us: AtomicU64,
    degraded_queries: AtomicU64,
    index_rebuilds: AtomicU64,
    documents_ingested: AtomicU64,
    chunks_skipped: AtomicU64,
}

impl EngineMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one answered query.
    pub fn record_query(&self, elapsed: Duration, cache_hit: bool) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_response_us.fetch_add(micros, Ordering::Relaxed);
    }

    /// A query that fell back to lexical-only scoring.
    pub fn record_degraded(&self) {
        self.degraded_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rebuild(&self) {
        self.index_rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ingest(&self, skipped_chunks: usize) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_skipped
            .fetch_add(skipped_chunks as u64, Ordering::Relaxed);
    }

    #[must_use]
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn degraded_queries(&self) -> u64 {
        self.degraded_queries.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn index_rebuilds(&self) -> u64 {
        self.index_rebuilds.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn documents_ingested(&self) -> u64 {
        self.documents_ingested.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn chunks_skipped(&self) -> u64 {
        self.chunks_skipped.load(Ordering::Relaxed)
    }

    /// Mean response time over all recorded queries, 0 before the first.
    #[must_use]
    pub fn average_response_ms(&self) -> f64 {
        let queries = self.queries();
        if queries == 0 {
            return 0.0;
        }
        let total_us = self.total_response_us.load(Ordering::Relaxed) as f64;
        total_us / queries as f64 / 1000.0
    }
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub chunk_count: usize,
    pub document_count: usize,
    pub vector_count: usize,
    pub cache_size: usize,
    /// Cache hits over cache lookups.
    pub cache_hit_rate: f64,
    pub average_response_time_ms: f64,
    pub queries: u64,
    pub degraded_queries: u64,
    pub index_rebuilds: u64,
    pub cache: CacheStats,
}
