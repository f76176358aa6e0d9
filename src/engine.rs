//! Retrieval engine
//!
//! Owns every component and wires the two flows together:
//!
//! ```text
//! ingest:  document ─► Chunker ─► EmbeddingEnsemble ─► LexicalIndex + VectorIndex
//! search:  query ─► cache (exact) ─► embed ─► cache (semantic) ─► FusionEngine ─► cache put
//! ```
//!
//! There is no global state: build one engine per corpus and share it behind
//! an `Arc`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use itertools::Itertools;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheHit, CacheKey, QueryCache};
use crate::cancel::CancelToken;
use crate::chunking::Chunker;
use crate::config::{Config, ModelConfig};
use crate::embedding::{EmbeddingBackend, EmbeddingEnsemble};
use crate::error::{DocseekError, Result};
use crate::metrics::{EngineMetrics, EngineStats};
use crate::search::{FusionEngine, LexicalIndex, SqliteVectorStore, VectorEntry, VectorIndex};
use crate::storage::Database;
use crate::types::{Chunk, Document, DocumentId, DocumentKind, SearchOptions, SearchResult};

/// Serializable copy of everything the engine knows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub chunks: Vec<Chunk>,
    pub vectors: Vec<VectorEntry>,
    pub cache: Vec<CacheEntry>,
}

pub struct RetrievalEngine {
    config: Config,
    chunker: Chunker,
    ensemble: EmbeddingEnsemble,
    lexical: RwLock<LexicalIndex>,
    vectors: RwLock<VectorIndex>,
    fusion: FusionEngine,
    cache: Arc<QueryCache>,
    metrics: EngineMetrics,
    db: Option<Arc<Database>>,
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("ensemble", &self.ensemble)
            .field("chunks", &self.lexical.read().len())
            .field("vectors", &self.vectors.read().len())
            .field("persistent", &self.db.is_some())
            .finish_non_exhaustive()
    }
}

impl RetrievalEngine {
    /// In-memory engine with backends built from `config.embedding`.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let ensemble = EmbeddingEnsemble::from_config(&config.embedding)?;
        Ok(Self::assemble(config, ensemble, None, VectorIndex::new))
    }

    /// In-memory engine with caller-supplied backends for the configured models.
    pub fn with_backends(
        config: Config,
        backends: Vec<(ModelConfig, Arc<dyn EmbeddingBackend>)>,
    ) -> Result<Self> {
        config.validate()?;
        let ensemble = EmbeddingEnsemble::with_backends(&config.embedding, backends)?;
        Ok(Self::assemble(config, ensemble, None, VectorIndex::new))
    }

    /// Engine backed by `config.storage` when persistence is on, otherwise
    /// the same as [`RetrievalEngine::new`].
    pub fn open(config: Config) -> Result<Self> {
        if !config.storage.persist {
            return Self::new(config);
        }
        config.validate()?;
        let ensemble = EmbeddingEnsemble::from_config(&config.embedding)?;
        let db = Arc::new(Database::open(config.storage.database_path())?);
        Self::with_database(config, ensemble, db)
    }

    /// Load chunks, vector entries and cached queries from `db`.
    pub fn with_database(
        config: Config,
        ensemble: EmbeddingEnsemble,
        db: Arc<Database>,
    ) -> Result<Self> {
        let store = SqliteVectorStore::open(Arc::clone(&db))?;
        let dims = ensemble.dims();
        let mut vectors = VectorIndex::with_store(dims, Box::new(store));
        if let Err(err) = vectors.verify() {
            warn!(error = %err, "Stored vectors do not match the configured ensemble; discarding");
            vectors.clear()?;
        }

        let chunks = db.load_chunks()?;
        let engine = Self::assemble(config, ensemble, Some(Arc::clone(&db)), move |_| vectors);
        engine.lexical.write().rebuild(chunks);
        let restored = engine.cache.restore(db.load_cache_entries()?);

        info!(
            chunks = engine.lexical.read().len(),
            vectors = engine.vectors.read().len(),
            cached_queries = restored,
            "Opened persistent index"
        );
        Ok(engine)
    }

    fn assemble(
        config: Config,
        ensemble: EmbeddingEnsemble,
        db: Option<Arc<Database>>,
        vectors: impl FnOnce(usize) -> VectorIndex,
    ) -> Self {
        let vectors = vectors(ensemble.dims());
        Self {
            chunker: Chunker::new(&config.chunking),
            lexical: RwLock::new(LexicalIndex::new(config.bm25)),
            vectors: RwLock::new(vectors),
            fusion: FusionEngine::new(config.fusion.clone()),
            cache: Arc::new(QueryCache::new(config.cache.clone())),
            metrics: EngineMetrics::new(),
            ensemble,
            db,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn ensemble(&self) -> &EmbeddingEnsemble {
        &self.ensemble
    }

    #[must_use]
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    #[must_use]
    pub const fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Search options seeded from config (vector threshold).
    #[must_use]
    pub fn default_options(&self) -> SearchOptions {
        SearchOptions {
            threshold: self.config.vector.threshold,
            use_cache: self.config.cache.enabled,
            ..SearchOptions::default()
        }
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Chunk, embed and index one document. Returns the number of chunks.
    pub async fn ingest_document(
        &self,
        document_id: impl Into<DocumentId>,
        title: &str,
        kind: DocumentKind,
        text: &str,
    ) -> Result<usize> {
        self.ingest(Document::new(document_id, title, kind, text), &CancelToken::new())
            .await
    }

    /// Ingest a prepared document. Re-ingesting an id replaces its chunks.
    ///
    /// Cancellation before indexing leaves both indices untouched. Chunks
    /// whose embedding fails stay searchable lexically.
    pub async fn ingest(&self, document: Document, cancel: &CancelToken) -> Result<usize> {
        cancel.check()?;
        if document.text.trim().is_empty() {
            warn!(document_id = %document.id, "Skipping document with no text");
            return Ok(0);
        }

        let chunks = self.chunker.chunk(&document);
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.ensemble.embed_batch(&texts, cancel).await?;
        cancel.check()?;

        let mut entries = Vec::with_capacity(chunks.len());
        let mut skipped = 0;
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            match embedding {
                Ok(composite) => entries.push(VectorEntry::from_composite(chunk, &composite)),
                Err(err) => {
                    skipped += 1;
                    warn!(chunk_id = %chunk.id, error = %err, "Chunk not embedded; lexical only");
                }
            }
        }

        // Invalidate even when the write fails; the old chunks are gone.
        let written = self.replace_document(&document.id, &chunks, entries);
        let invalidated = self.invalidate_cache();
        written?;
        invalidated?;
        self.metrics.record_ingest(skipped);

        info!(
            document_id = %document.id,
            chunks = chunks.len(),
            skipped,
            "Ingested document"
        );
        Ok(chunks.len())
    }

    /// Ingest several documents in order; stops at the first hard error.
    pub async fn ingest_documents(
        &self,
        documents: Vec<Document>,
        cancel: &CancelToken,
    ) -> Result<Vec<(DocumentId, usize)>> {
        let mut counts = Vec::with_capacity(documents.len());
        for document in documents {
            let id = document.id.clone();
            let count = self.ingest(document, cancel).await?;
            counts.push((id, count));
        }
        Ok(counts)
    }

    /// Embed chunks that have no vector entry (after a model change or a
    /// failed embedding). Returns the number embedded.
    pub async fn embed_missing(&self, cancel: &CancelToken) -> Result<usize> {
        let missing: Vec<Chunk> = {
            let lexical = self.lexical.read();
            let vectors = self.vectors.read();
            lexical
                .chunks()
                .filter(|chunk| vectors.get(&chunk.id).is_none())
                .cloned()
                .collect()
        };
        if missing.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = missing.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.ensemble.embed_batch(&texts, cancel).await?;
        cancel.check()?;

        let mut embedded = 0;
        let mut written = Ok(());
        {
            let mut vectors = self.vectors.write();
            for (chunk, embedding) in missing.iter().zip(embeddings) {
                let Ok(composite) = embedding else {
                    continue;
                };
                if let Err(err) = vectors.add_entry(VectorEntry::from_composite(chunk, &composite)) {
                    written = Err(err);
                    break;
                }
                embedded += 1;
            }
        }
        if embedded > 0 {
            self.invalidate_cache()?;
        }
        written?;
        debug!(embedded, missing = missing.len(), "Embedded missing chunks");
        Ok(embedded)
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Remove a document from both indices and invalidate the whole cache.
    /// Returns the number of chunks removed.
    pub fn delete_document(&self, document_id: &DocumentId) -> Result<usize> {
        let removed = self.remove_document_chunks(document_id);
        if matches!(removed, Ok(0)) {
            return Err(DocseekError::DocumentNotFound(document_id.to_string()));
        }
        let invalidated = self.invalidate_cache();
        let removed = removed?;
        let invalidated = invalidated?;
        info!(%document_id, chunks = removed, invalidated, "Deleted document");
        Ok(removed)
    }

    /// Swap a document's chunks for `chunks`. A failed write removes the
    /// document everywhere so the stores never disagree.
    fn replace_document(
        &self,
        document_id: &DocumentId,
        chunks: &[Chunk],
        entries: Vec<VectorEntry>,
    ) -> Result<()> {
        self.remove_document_chunks(document_id)?;
        let written = self.write_chunks(chunks, entries);
        if let Err(err) = &written {
            warn!(%document_id, error = %err, "Ingest failed; rolling back document");
            if let Err(rollback) = self.remove_document_chunks(document_id) {
                warn!(%document_id, error = %rollback, "Rollback incomplete");
            }
        }
        written
    }

    fn write_chunks(&self, chunks: &[Chunk], entries: Vec<VectorEntry>) -> Result<()> {
        if let Some(db) = &self.db {
            db.upsert_chunks(chunks)?;
        }
        {
            let mut vectors = self.vectors.write();
            for entry in entries {
                vectors.add_entry(entry)?;
            }
        }
        let mut lexical = self.lexical.write();
        for chunk in chunks {
            lexical.add_chunk(chunk.clone());
        }
        Ok(())
    }

    /// Drop every cached answer, in memory and on disk.
    fn invalidate_cache(&self) -> Result<usize> {
        let removed = self.cache.invalidate_all();
        if let Some(db) = &self.db {
            db.replace_cache_entries(&[])?;
        }
        Ok(removed)
    }

    fn remove_document_chunks(&self, document_id: &DocumentId) -> Result<usize> {
        let lexical_removed = self.lexical.write().remove_document(document_id);
        let vector_removed = self.vectors.write().remove_document(document_id)?;
        if let Some(db) = &self.db {
            db.delete_document_chunks(document_id)?;
        }
        Ok(lexical_removed.len().max(vector_removed.len()))
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        self.search_with_cancel(query, options, &CancelToken::new())
            .await
    }

    /// Cached hybrid search.
    ///
    /// Blank queries return nothing. Embedding failure degrades to lexical
    /// scoring and the degraded answer is not cached. A cancelled search
    /// never writes to the cache.
    pub async fn search_with_cancel(
        &self,
        query: &str,
        options: &SearchOptions,
        cancel: &CancelToken,
    ) -> Result<Vec<SearchResult>> {
        let started = Instant::now();
        cancel.check()?;

        let query = query.trim();
        if query.is_empty() {
            warn!("Skipping blank query");
            return Ok(Vec::new());
        }

        let use_cache = options.use_cache && self.cache.is_enabled();
        let key = CacheKey::for_search(query, options);
        let generation = self.cache.generation();

        if use_cache {
            if let Some(results) = self.cached(self.cache.get_exact(&key)) {
                self.metrics.record_query(started.elapsed(), true);
                return Ok(results);
            }
        }

        let mut degraded = false;
        let query_vector = if options.use_hybrid {
            match self.ensemble.embed_with_cancel(query, cancel).await {
                Ok(composite) => Some(composite.vector),
                Err(DocseekError::Cancelled) => return Err(DocseekError::Cancelled),
                Err(err) => {
                    warn!(error = %err, "Query embedding failed; lexical search only");
                    self.metrics.record_degraded();
                    degraded = true;
                    None
                }
            }
        } else {
            None
        };

        if use_cache {
            if let Some(results) = self.cached(self.cache.get(&key, query_vector.as_deref())) {
                self.metrics.record_query(started.elapsed(), true);
                return Ok(results);
            }
        }

        cancel.check()?;
        let results = self.fused_search(query, query_vector.as_deref(), options)?;
        cancel.check()?;

        if use_cache && !degraded {
            if let Err(err) =
                self.cache
                    .put_if_current(generation, &key, query_vector, results.clone())
            {
                warn!(error = %err, "Query cache unavailable; result not stored");
            }
        }

        self.metrics.record_query(started.elapsed(), false);
        debug!(results = results.len(), elapsed_ms = ?started.elapsed().as_millis(), "Search complete");
        Ok(results)
    }

    fn cached(&self, lookup: Result<Option<CacheHit>>) -> Option<Vec<SearchResult>> {
        match lookup {
            Ok(hit) => hit.map(|hit| {
                debug!(kind = ?hit.kind, "Query cache hit");
                hit.results
            }),
            Err(err) => {
                warn!(error = %err, "Query cache unavailable; treating as miss");
                None
            }
        }
    }

    /// Fusion search with one rebuild-and-retry on lexical corruption.
    fn fused_search(
        &self,
        query: &str,
        query_vector: Option<&[f32]>,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        match self
            .fusion
            .search(query, query_vector, &self.lexical, &self.vectors, options)
        {
            Err(DocseekError::IndexCorruption { index, reason }) => {
                warn!(index, %reason, "Index corruption detected; rebuilding");
                self.rebuild_lexical_index()?;
                self.fusion
                    .search(query, query_vector, &self.lexical, &self.vectors, options)
            }
            other => other,
        }
    }

    /// Rebuild the BM25 index from source chunks (SQLite when persistent,
    /// otherwise the chunks held by the index itself).
    pub fn rebuild_lexical_index(&self) -> Result<usize> {
        let chunks = match &self.db {
            Some(db) => db.load_chunks()?,
            None => self.lexical.read().chunks().cloned().collect(),
        };
        let mut lexical = self.lexical.write();
        lexical.rebuild(chunks);
        lexical.verify()?;
        self.metrics.record_rebuild();
        info!(chunks = lexical.len(), "Rebuilt lexical index");
        Ok(lexical.len())
    }

    /// Check both indices for internal consistency.
    pub fn verify(&self) -> Result<()> {
        self.lexical.read().verify()?;
        self.vectors.read().verify()
    }

    // ------------------------------------------------------------------
    // Stats, maintenance, persistence
    // ------------------------------------------------------------------

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let (chunk_count, document_count) = {
            let lexical = self.lexical.read();
            let documents = lexical.chunks().map(|chunk| &chunk.document_id).unique().count();
            (lexical.len(), documents)
        };
        let cache = self.cache.stats();
        EngineStats {
            chunk_count,
            document_count,
            vector_count: self.vectors.read().len(),
            cache_size: cache.size,
            cache_hit_rate: cache.hit_rate(),
            average_response_time_ms: self.metrics.average_response_ms(),
            queries: self.metrics.queries(),
            degraded_queries: self.metrics.degraded_queries(),
            index_rebuilds: self.metrics.index_rebuilds(),
            cache,
        }
    }

    /// Start the periodic TTL sweep; stops when `cancel` fires.
    #[must_use]
    pub fn spawn_cache_sweeper(&self, cancel: CancelToken) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.cache.sweep_interval_secs.max(1));
        Arc::clone(&self.cache).spawn_sweeper(interval, cancel)
    }

    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        let mut chunks: Vec<Chunk> = self.lexical.read().chunks().cloned().collect();
        chunks.sort_by(|a, b| a.id.cmp(&b.id));
        let mut vectors: Vec<VectorEntry> = self.vectors.read().entries().cloned().collect();
        vectors.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        EngineSnapshot {
            chunks,
            vectors,
            cache: self.cache.entries(),
        }
    }

    /// Replace all state with `snapshot`. Vector entries are loaded as-is,
    /// without re-embedding.
    pub fn restore(&self, snapshot: EngineSnapshot) -> Result<()> {
        if let Some(db) = &self.db {
            let previous: Vec<DocumentId> = self
                .lexical
                .read()
                .chunks()
                .map(|chunk| chunk.document_id.clone())
                .unique()
                .collect();
            for document_id in &previous {
                db.delete_document_chunks(document_id)?;
            }
            db.upsert_chunks(&snapshot.chunks)?;
        }
        self.lexical.write().rebuild(snapshot.chunks);
        {
            let mut vectors = self.vectors.write();
            vectors.clear()?;
            for entry in snapshot.vectors {
                vectors.add_entry(entry)?;
            }
        }
        self.invalidate_cache()?;
        self.cache.restore(snapshot.cache);
        self.save_cache()?;
        Ok(())
    }

    /// Write the query cache to SQLite. No-op for in-memory engines.
    pub fn save_cache(&self) -> Result<usize> {
        let Some(db) = &self.db else {
            return Ok(0);
        };
        let entries = self.cache.entries();
        db.replace_cache_entries(&entries)?;
        debug!(entries = entries.len(), "Saved query cache");
        Ok(entries.len())
    }
}
