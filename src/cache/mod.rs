//! Semantic query cache
//!
//! Two-level lookup over previously answered queries:
//!
//! 1. Exact: SHA-256 of the scope and the normalized query text
//! 2. Semantic: best cached query vector in the same scope with cosine
//!    similarity at or above `semantic_threshold`
//!
//! Entries expire after their TTL (lazily on lookup and by a periodic
//! sweep) and are evicted least-recently-accessed first at capacity.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::config::CacheConfig;
use crate::error::{DocseekError, Result};
use crate::search::similarity::cosine_similarity;
use crate::text::normalize_query;
use crate::types::{SearchOptions, SearchResult};

/// How long a lookup waits for the cache lock before treating the cache as
/// unavailable.
const LOCK_TIMEOUT: Duration = Duration::from_millis(250);

/// Source of "now" for TTL and recency bookkeeping.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Key for cache entries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    normalized_query: String,
    /// Fingerprint of the options the results were computed with.
    scope: String,
}

impl CacheKey {
    /// Unscoped key.
    #[must_use]
    pub fn new(query: &str) -> Self {
        Self::scoped(query, "")
    }

    pub fn scoped(query: &str, scope: impl Into<String>) -> Self {
        Self {
            normalized_query: normalize_query(query),
            scope: scope.into(),
        }
    }

    /// Key for `query` run with `options`; different limits, thresholds,
    /// modes or filters never share entries.
    #[must_use]
    pub fn for_search(query: &str, options: &SearchOptions) -> Self {
        let mut filters: Vec<String> = options
            .filters
            .iter()
            .map(|f| format!("{}={}", f.key, f.value.to_lowercase()))
            .collect();
        filters.sort();
        let scope = format!(
            "hybrid={};limit={};threshold={:.4};filters={}",
            options.use_hybrid,
            options.limit,
            options.threshold,
            filters.join(",")
        );
        Self::scoped(query, scope)
    }

    #[must_use]
    pub fn normalized_query(&self) -> &str {
        &self.normalized_query
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Stable entry id: hex SHA-256 of scope and normalized query.
    #[must_use]
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.scope.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.normalized_query.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// One cached answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub normalized_query: String,
    pub scope: String,
    /// Absent for lexical-only queries; such entries only match exactly.
    pub query_vector: Option<Vec<f32>>,
    pub results: Vec<SearchResult>,
    pub created_at: DateTime<Utc>,
    pub ttl_ms: u64,
    pub access_count: u64,
    pub last_accessed_at: DateTime<Utc>,
}

impl CacheEntry {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = i64::try_from(self.ttl_ms).unwrap_or(i64::MAX);
        now.signed_duration_since(self.created_at).num_milliseconds() > ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheHitKind {
    Exact,
    Semantic { similarity: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub kind: CacheHitKind,
    pub results: Vec<SearchResult>,
    pub access_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub exact_hits: u64,
    pub semantic_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    /// Hits over lookups, 0 before the first lookup.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

struct CacheState {
    entries: LruCache<String, CacheEntry>,
    stats: CacheStats,
}

pub struct QueryCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
    clock: Clock,
    /// Bumped by every invalidation; writes computed before it are dropped.
    generation: AtomicU64,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("enabled", &self.config.enabled)
            .field("max_entries", &self.config.max_entries)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl QueryCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(Utc::now))
    }

    #[must_use]
    pub fn with_clock(config: CacheConfig, clock: Clock) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                stats: CacheStats {
                    capacity: capacity.get(),
                    ..CacheStats::default()
                },
            }),
            clock,
            generation: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheState>> {
        self.state.try_lock_for(LOCK_TIMEOUT).ok_or_else(|| {
            DocseekError::CacheUnavailable(format!(
                "lock not acquired within {}ms",
                LOCK_TIMEOUT.as_millis()
            ))
        })
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Exact lookup only. Counts hits but not misses, so a caller that falls
    /// through to [`QueryCache::get`] counts each query once.
    pub fn get_exact(&self, key: &CacheKey) -> Result<Option<CacheHit>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let now = self.now();
        let mut state = self.lock()?;
        Ok(Self::lookup_exact(&mut state, &key.id(), now))
    }

    /// Exact lookup, then semantic lookup when a query vector is given.
    pub fn get(&self, key: &CacheKey, query_vector: Option<&[f32]>) -> Result<Option<CacheHit>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let now = self.now();
        let mut state = self.lock()?;

        if let Some(hit) = Self::lookup_exact(&mut state, &key.id(), now) {
            return Ok(Some(hit));
        }

        let hit = query_vector
            .filter(|vector| !vector.is_empty())
            .and_then(|vector| self.lookup_semantic(&mut state, key, vector, now));
        if hit.is_none() {
            state.stats.misses += 1;
        }
        Ok(hit)
    }

    fn lookup_exact(state: &mut CacheState, id: &str, now: DateTime<Utc>) -> Option<CacheHit> {
        let expired = state.entries.peek(id)?.is_expired(now);
        if expired {
            state.entries.pop(id);
            state.stats.expirations += 1;
            return None;
        }

        let entry = state.entries.get_mut(id)?;
        entry.access_count += 1;
        entry.last_accessed_at = now;
        let hit = CacheHit {
            kind: CacheHitKind::Exact,
            results: entry.results.clone(),
            access_count: entry.access_count,
        };
        state.stats.hits += 1;
        state.stats.exact_hits += 1;
        Some(hit)
    }

    fn lookup_semantic(
        &self,
        state: &mut CacheState,
        key: &CacheKey,
        query_vector: &[f32],
        now: DateTime<Utc>,
    ) -> Option<CacheHit> {
        let mut expired = Vec::new();
        let mut best: Option<(String, f32)> = None;

        for (id, entry) in &state.entries {
            if entry.is_expired(now) {
                expired.push(id.clone());
                continue;
            }
            if entry.scope != key.scope {
                continue;
            }
            let Some(cached) = entry.query_vector.as_deref() else {
                continue;
            };
            let similarity = cosine_similarity(query_vector, cached);
            if similarity < self.config.semantic_threshold {
                continue;
            }
            let better = best.as_ref().is_none_or(|(best_id, best_sim)| {
                similarity > *best_sim || (similarity == *best_sim && id < best_id)
            });
            if better {
                best = Some((id.clone(), similarity));
            }
        }

        for id in &expired {
            state.entries.pop(id);
        }
        state.stats.expirations += expired.len() as u64;

        let (id, similarity) = best?;
        let entry = state.entries.get_mut(&id)?;
        entry.access_count += 1;
        entry.last_accessed_at = now;
        let hit = CacheHit {
            kind: CacheHitKind::Semantic { similarity },
            results: entry.results.clone(),
            access_count: entry.access_count,
        };
        state.stats.hits += 1;
        state.stats.semantic_hits += 1;
        debug!(similarity, "Semantic cache hit");
        Some(hit)
    }

    /// Store results for `key`. `ttl_ms` defaults to the configured TTL.
    pub fn put(
        &self,
        key: &CacheKey,
        query_vector: Option<Vec<f32>>,
        results: Vec<SearchResult>,
        ttl_ms: Option<u64>,
    ) -> Result<()> {
        self.insert(None, key, query_vector, results, ttl_ms)
    }

    /// Store results computed while the cache was at `generation`. Dropped
    /// silently if an invalidation happened in between.
    pub fn put_if_current(
        &self,
        generation: u64,
        key: &CacheKey,
        query_vector: Option<Vec<f32>>,
        results: Vec<SearchResult>,
    ) -> Result<()> {
        self.insert(Some(generation), key, query_vector, results, None)
    }

    fn insert(
        &self,
        generation: Option<u64>,
        key: &CacheKey,
        query_vector: Option<Vec<f32>>,
        results: Vec<SearchResult>,
        ttl_ms: Option<u64>,
    ) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let now = self.now();
        let mut state = self.lock()?;
        if generation.is_some_and(|g| g != self.generation()) {
            debug!("Cache invalidated during search; result not stored");
            return Ok(());
        }

        let id = key.id();
        let entry = CacheEntry {
            id: id.clone(),
            normalized_query: key.normalized_query.clone(),
            scope: key.scope.clone(),
            query_vector,
            results,
            created_at: now,
            ttl_ms: ttl_ms.unwrap_or(self.config.ttl_ms),
            access_count: 0,
            last_accessed_at: now,
        };

        if let Some((evicted_id, _)) = state.entries.push(id.clone(), entry) {
            if evicted_id != id {
                state.stats.evictions += 1;
                debug!(evicted = %evicted_id, "Evicted least recently used cache entry");
            }
        }
        Ok(())
    }

    /// Drop every entry. Waits for the lock: a skipped invalidation could
    /// serve deleted content.
    pub fn invalidate_all(&self) -> usize {
        let mut state = self.state.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let removed = state.entries.len();
        state.entries.clear();
        debug!(removed, "Invalidated query cache");
        removed
    }

    /// Remove expired entries, holding the lock for at most `batch` entries
    /// at a time. Returns the number removed.
    pub fn sweep_expired(&self, batch: usize) -> usize {
        let batch = batch.max(1);
        let mut offset = 0;
        let mut removed = 0;

        loop {
            let now = self.now();
            let mut state = self.state.lock();
            let window: Vec<(String, bool)> = state
                .entries
                .iter()
                .skip(offset)
                .take(batch)
                .map(|(id, entry)| (id.clone(), entry.is_expired(now)))
                .collect();
            let scanned = window.len();

            let mut dropped = 0;
            for (id, expired) in window {
                if expired && state.entries.pop(&id).is_some() {
                    dropped += 1;
                }
            }
            state.stats.expirations += dropped as u64;
            drop(state);

            removed += dropped;
            offset += scanned - dropped;
            if scanned < batch {
                break;
            }
        }

        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    /// Sweep expired entries every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancelToken,
    ) -> JoinHandle<()> {
        let batch = self.config.sweep_batch;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep_expired(batch);
                    }
                }
            }
            debug!("Cache sweeper stopped");
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            size: state.entries.len(),
            ..state.stats
        }
    }

    /// Snapshot of all live entries, least recently accessed first.
    #[must_use]
    pub fn entries(&self) -> Vec<CacheEntry> {
        let now = self.now();
        let state = self.state.lock();
        let mut entries: Vec<CacheEntry> = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(_, entry)| entry.clone())
            .collect();
        entries.sort_by_key(|entry| entry.last_accessed_at);
        entries
    }

    /// Load persisted entries, skipping expired ones. Recency order follows
    /// `last_accessed_at`.
    pub fn restore(&self, mut entries: Vec<CacheEntry>) -> usize {
        let now = self.now();
        entries.sort_by_key(|entry| entry.last_accessed_at);
        let mut state = self.state.lock();
        let mut restored = 0;
        for entry in entries {
            if entry.is_expired(now) {
                continue;
            }
            if entry.id.is_empty() {
                warn!(query = %entry.normalized_query, "Skipping cache entry without id");
                continue;
            }
            state.entries.push(entry.id.clone(), entry);
            restored += 1;
        }
        debug!(restored, "Restored cache entries");
        restored
    }
}
