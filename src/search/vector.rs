//! Vector index
//!
//! Cosine-similarity search over chunk embeddings. Storage is pluggable
//! behind [`VectorStore`]: [`MemoryVectorStore`] keeps entries in arena
//! slots, [`SqliteVectorStore`] writes through to SQLite and serves reads
//! from an in-memory mirror.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embedding::CompositeEmbedding;
use crate::error::{DocseekError, Result};
use crate::search::similarity::cosine_similarity;
use crate::storage::Database;
use crate::types::{Chunk, ChunkId, ChunkMetadata, DocumentId, MetadataFilter};

/// One embedded chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    /// Fused, unit-length embedding.
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
    /// Models that contributed to `embedding`.
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub quality: f32,
}

impl VectorEntry {
    #[must_use]
    pub fn from_composite(chunk: &Chunk, composite: &CompositeEmbedding) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            embedding: composite.vector.clone(),
            metadata: chunk.metadata.clone(),
            models: composite.model_names().map(str::to_string).collect(),
            quality: composite.quality,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorHit {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub score: f32,
}

/// Backing storage for vector entries.
pub trait VectorStore: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;
    /// Insert or replace by chunk id.
    fn upsert(&mut self, entry: VectorEntry) -> Result<()>;
    fn remove(&mut self, chunk_id: &ChunkId) -> Result<bool>;
    fn remove_document(&mut self, document_id: &DocumentId) -> Result<Vec<ChunkId>>;
    fn get(&self, chunk_id: &ChunkId) -> Option<&VectorEntry>;
    fn entries(&self) -> Box<dyn Iterator<Item = &VectorEntry> + '_>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn clear(&mut self) -> Result<()>;
}

/// Arena-backed in-memory store.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    slots: Vec<Option<VectorEntry>>,
    free: Vec<usize>,
    by_id: HashMap<ChunkId, usize>,
}

impl MemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorStore for MemoryVectorStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn upsert(&mut self, entry: VectorEntry) -> Result<()> {
        if let Some(slot) = self.by_id.get(&entry.chunk_id) {
            self.slots[*slot] = Some(entry);
            return Ok(());
        }
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        self.by_id.insert(entry.chunk_id.clone(), slot);
        self.slots[slot] = Some(entry);
        Ok(())
    }

    fn remove(&mut self, chunk_id: &ChunkId) -> Result<bool> {
        let Some(slot) = self.by_id.remove(chunk_id) else {
            return Ok(false);
        };
        self.slots[slot] = None;
        self.free.push(slot);
        Ok(true)
    }

    fn remove_document(&mut self, document_id: &DocumentId) -> Result<Vec<ChunkId>> {
        let ids: Vec<ChunkId> = self
            .slots
            .iter()
            .flatten()
            .filter(|entry| &entry.document_id == document_id)
            .map(|entry| entry.chunk_id.clone())
            .collect();
        for id in &ids {
            self.remove(id)?;
        }
        Ok(ids)
    }

    fn get(&self, chunk_id: &ChunkId) -> Option<&VectorEntry> {
        self.by_id
            .get(chunk_id)
            .and_then(|slot| self.slots.get(*slot))
            .and_then(Option::as_ref)
    }

    fn entries(&self) -> Box<dyn Iterator<Item = &VectorEntry> + '_> {
        Box::new(self.slots.iter().flatten())
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }

    fn clear(&mut self) -> Result<()> {
        *self = Self::default();
        Ok(())
    }
}

/// SQLite write-through store; reads come from the in-memory mirror.
#[derive(Debug)]
pub struct SqliteVectorStore {
    db: Arc<Database>,
    mirror: MemoryVectorStore,
}

impl SqliteVectorStore {
    /// Open over an existing database, loading every stored entry.
    pub fn open(db: Arc<Database>) -> Result<Self> {
        let mut mirror = MemoryVectorStore::new();
        for entry in db.load_vector_entries()? {
            mirror.upsert(entry)?;
        }
        debug!(entries = mirror.len(), "Loaded vector entries from SQLite");
        Ok(Self { db, mirror })
    }
}

impl VectorStore for SqliteVectorStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn upsert(&mut self, entry: VectorEntry) -> Result<()> {
        self.db.upsert_vector_entry(&entry)?;
        self.mirror.upsert(entry)
    }

    fn remove(&mut self, chunk_id: &ChunkId) -> Result<bool> {
        self.db.delete_vector_entry(chunk_id)?;
        self.mirror.remove(chunk_id)
    }

    fn remove_document(&mut self, document_id: &DocumentId) -> Result<Vec<ChunkId>> {
        self.db.delete_document_vectors(document_id)?;
        self.mirror.remove_document(document_id)
    }

    fn get(&self, chunk_id: &ChunkId) -> Option<&VectorEntry> {
        self.mirror.get(chunk_id)
    }

    fn entries(&self) -> Box<dyn Iterator<Item = &VectorEntry> + '_> {
        self.mirror.entries()
    }

    fn len(&self) -> usize {
        self.mirror.len()
    }

    fn clear(&mut self) -> Result<()> {
        self.db.clear_vector_entries()?;
        self.mirror.clear()
    }
}

#[derive(Debug)]
pub struct VectorIndex {
    dims: usize,
    store: Box<dyn VectorStore>,
}

impl VectorIndex {
    /// In-memory index.
    #[must_use]
    pub fn new(dims: usize) -> Self {
        Self::with_store(dims, Box::new(MemoryVectorStore::new()))
    }

    #[must_use]
    pub fn with_store(dims: usize, store: Box<dyn VectorStore>) -> Self {
        Self { dims, store }
    }

    #[must_use]
    pub const fn dims(&self) -> usize {
        self.dims
    }

    #[must_use]
    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    #[must_use]
    pub fn get(&self, chunk_id: &ChunkId) -> Option<&VectorEntry> {
        self.store.get(chunk_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &VectorEntry> {
        self.store.entries()
    }

    /// Insert or replace. Wrong dimension or non-finite values are rejected.
    pub fn add_entry(&mut self, entry: VectorEntry) -> Result<()> {
        if entry.embedding.len() != self.dims {
            return Err(DocseekError::DimensionMismatch {
                expected: self.dims,
                actual: entry.embedding.len(),
            });
        }
        if entry.embedding.iter().any(|x| !x.is_finite()) {
            return Err(DocseekError::MalformedInput(format!(
                "embedding for {} has non-finite values",
                entry.chunk_id
            )));
        }
        self.store.upsert(entry)
    }

    pub fn remove_entry(&mut self, chunk_id: &ChunkId) -> Result<bool> {
        self.store.remove(chunk_id)
    }

    pub fn remove_document(&mut self, document_id: &DocumentId) -> Result<Vec<ChunkId>> {
        self.store.remove_document(document_id)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.store.clear()
    }

    /// Entries passing every filter with cosine similarity at or above
    /// `threshold`, best first, ties by chunk id. A query of the wrong
    /// dimension matches nothing.
    #[must_use]
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        threshold: f32,
        filters: &[MetadataFilter],
    ) -> Vec<VectorHit> {
        if query.len() != self.dims {
            warn!(
                expected = self.dims,
                actual = query.len(),
                "Query vector dimension mismatch; vector search skipped"
            );
            return Vec::new();
        }
        if limit == 0 {
            return Vec::new();
        }

        let mut hits: Vec<VectorHit> = self
            .store
            .entries()
            .filter(|entry| {
                filters
                    .iter()
                    .all(|f| f.matches(&entry.document_id, &entry.metadata))
            })
            .filter_map(|entry| {
                let score = cosine_similarity(query, &entry.embedding);
                (score >= threshold).then(|| VectorHit {
                    chunk_id: entry.chunk_id.clone(),
                    document_id: entry.document_id.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(limit);
        hits
    }

    /// Check every stored embedding has the index dimension and finite values.
    pub fn verify(&self) -> Result<()> {
        for entry in self.store.entries() {
            if entry.embedding.len() != self.dims || entry.embedding.iter().any(|x| !x.is_finite())
            {
                return Err(DocseekError::IndexCorruption {
                    index: "vector",
                    reason: format!("entry {} has an invalid embedding", entry.chunk_id),
                });
            }
        }
        Ok(())
    }
}
