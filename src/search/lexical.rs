//! BM25 lexical index
//!
//! In-memory inverted index over chunk tokens. Per matched query term:
//!
//! ```text
//! idf(t) * tf * (k1 + 1) / (tf + k1 * (1 - b + b * len / avg_len))
//! idf(t) = ln(1 + (N - df + 0.5) / (df + 0.5))
//! ```
//!
//! Chunks live in arena slots; postings refer to slot numbers. The average
//! chunk length is recomputed on every add and remove.

use std::collections::{BTreeSet, HashMap, HashSet};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::Bm25Config;
use crate::error::{DocseekError, Result};
use crate::text::tokenize_with;
use crate::types::{Chunk, ChunkId, DocumentId};

/// A chunk with its derived lexical statistics.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub tokens: Vec<String>,
    pub term_frequency: HashMap<String, u32>,
    pub length: usize,
}

impl IndexedChunk {
    #[must_use]
    pub fn from_chunk(chunk: Chunk, drop_stop_words: bool) -> Self {
        let tokens = tokenize_with(&chunk.content, drop_stop_words);
        let mut term_frequency: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *term_frequency.entry(token.clone()).or_default() += 1;
        }
        Self {
            length: tokens.len(),
            chunk,
            tokens,
            term_frequency,
        }
    }
}

/// Why a chunk scored what it did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreExplanation {
    pub matched_terms: Vec<String>,
    pub chunk_length: usize,
    pub average_length: f32,
    pub idf_sum: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LexicalHit {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub explanation: ScoreExplanation,
}

#[derive(Debug)]
pub struct LexicalIndex {
    params: Bm25Config,
    slots: Vec<Option<IndexedChunk>>,
    free: Vec<usize>,
    by_id: HashMap<ChunkId, usize>,
    postings: HashMap<String, HashSet<usize>>,
    total_length: usize,
    average_length: f32,
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new(Bm25Config::default())
    }
}

impl LexicalIndex {
    #[must_use]
    pub fn new(params: Bm25Config) -> Self {
        Self {
            params,
            slots: Vec::new(),
            free: Vec::new(),
            by_id: HashMap::new(),
            postings: HashMap::new(),
            total_length: 0,
            average_length: 0.0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    #[must_use]
    pub const fn average_length(&self) -> f32 {
        self.average_length
    }

    #[must_use]
    pub fn contains(&self, chunk_id: &ChunkId) -> bool {
        self.by_id.contains_key(chunk_id)
    }

    #[must_use]
    pub fn get(&self, chunk_id: &ChunkId) -> Option<&IndexedChunk> {
        self.by_id
            .get(chunk_id)
            .and_then(|slot| self.slots.get(*slot))
            .and_then(Option::as_ref)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.slots.iter().flatten().map(|indexed| &indexed.chunk)
    }

    #[must_use]
    pub fn document_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, HashSet::len)
    }

    /// Index a chunk, replacing any chunk with the same id.
    pub fn add_chunk(&mut self, chunk: Chunk) {
        self.insert(IndexedChunk::from_chunk(chunk, self.params.stop_words));
    }

    fn insert(&mut self, indexed: IndexedChunk) {
        if self.by_id.contains_key(&indexed.chunk.id) {
            self.remove_chunk(&indexed.chunk.id);
        }

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        for term in indexed.term_frequency.keys() {
            self.postings.entry(term.clone()).or_default().insert(slot);
        }
        self.total_length += indexed.length;
        self.by_id.insert(indexed.chunk.id.clone(), slot);
        self.slots[slot] = Some(indexed);
        self.recompute_average();
    }

    /// Remove a chunk; returns it when it was indexed.
    pub fn remove_chunk(&mut self, chunk_id: &ChunkId) -> Option<Chunk> {
        let slot = self.by_id.remove(chunk_id)?;
        let indexed = self.slots.get_mut(slot).and_then(Option::take)?;

        for term in indexed.term_frequency.keys() {
            if let Some(posting) = self.postings.get_mut(term) {
                posting.remove(&slot);
                if posting.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        self.total_length = self.total_length.saturating_sub(indexed.length);
        self.free.push(slot);
        self.recompute_average();
        Some(indexed.chunk)
    }

    /// Remove every chunk of a document; returns the removed ids.
    pub fn remove_document(&mut self, document_id: &DocumentId) -> Vec<ChunkId> {
        let ids: Vec<ChunkId> = self
            .slots
            .iter()
            .flatten()
            .filter(|indexed| &indexed.chunk.document_id == document_id)
            .map(|indexed| indexed.chunk.id.clone())
            .collect();
        for id in &ids {
            self.remove_chunk(id);
        }
        ids
    }

    #[allow(clippy::cast_precision_loss)]
    fn recompute_average(&mut self) {
        self.average_length = if self.by_id.is_empty() {
            0.0
        } else {
            self.total_length as f32 / self.by_id.len() as f32
        };
    }

    /// Query terms under this index's tokenization.
    #[must_use]
    pub fn query_tokens(&self, query: &str) -> Vec<String> {
        tokenize_with(query, self.params.stop_words)
    }

    /// Smoothed inverse document frequency; always positive.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn idf(&self, term: &str) -> f32 {
        let n = self.len() as f32;
        let df = self.document_frequency(term) as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// BM25 term contribution for one chunk.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn term_score(&self, idf: f32, tf: u32, length: usize) -> f32 {
        let Bm25Config { k1, b, .. } = self.params;
        let tf = tf as f32;
        let avg = if self.average_length > 0.0 {
            self.average_length
        } else {
            1.0
        };
        let norm = k1 * (1.0 - b + b * length as f32 / avg);
        idf * tf * (k1 + 1.0) / (tf + norm)
    }

    /// Score every chunk containing at least one query token.
    ///
    /// Duplicate query tokens count once. Results are sorted by score
    /// descending, ties by chunk id. A posting that points at an empty slot
    /// is reported as corruption.
    pub fn score(&self, query_tokens: &[String]) -> Result<Vec<LexicalHit>> {
        let terms: BTreeSet<&str> = query_tokens.iter().map(String::as_str).collect();

        let mut candidates: BTreeSet<usize> = BTreeSet::new();
        for term in &terms {
            if let Some(posting) = self.postings.get(*term) {
                candidates.extend(posting.iter().copied());
            }
        }

        let idfs: HashMap<&str, f32> = terms.iter().map(|t| (*t, self.idf(t))).collect();
        let mut hits = Vec::with_capacity(candidates.len());

        for slot in candidates {
            let indexed = self.slots.get(slot).and_then(Option::as_ref).ok_or_else(|| {
                DocseekError::IndexCorruption {
                    index: "lexical",
                    reason: format!("posting refers to empty slot {slot}"),
                }
            })?;

            let mut score = 0.0;
            let mut idf_sum = 0.0;
            let mut matched_terms = Vec::new();
            for term in &terms {
                let Some(tf) = indexed.term_frequency.get(*term) else {
                    continue;
                };
                let idf = idfs.get(term).copied().unwrap_or_default();
                score += self.term_score(idf, *tf, indexed.length);
                idf_sum += idf;
                matched_terms.push((*term).to_string());
            }

            if matched_terms.is_empty() {
                return Err(DocseekError::IndexCorruption {
                    index: "lexical",
                    reason: format!("chunk {} is posted but matches no term", indexed.chunk.id),
                });
            }

            hits.push(LexicalHit {
                chunk_id: indexed.chunk.id.clone(),
                score,
                explanation: ScoreExplanation {
                    matched_terms,
                    chunk_length: indexed.length,
                    average_length: self.average_length,
                    idf_sum,
                },
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        Ok(hits)
    }

    /// Tokenize `query` and score. Blank or all-stop-word queries match nothing.
    pub fn search(&self, query: &str) -> Result<Vec<LexicalHit>> {
        let tokens = self.query_tokens(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        self.score(&tokens)
    }

    /// Check postings, slots and length bookkeeping agree.
    pub fn verify(&self) -> Result<()> {
        let corrupt = |reason: String| DocseekError::IndexCorruption {
            index: "lexical",
            reason,
        };

        let live = self.slots.iter().flatten().count();
        if live != self.by_id.len() {
            return Err(corrupt(format!(
                "{live} live slots but {} ids",
                self.by_id.len()
            )));
        }

        for (id, slot) in &self.by_id {
            match self.slots.get(*slot).and_then(Option::as_ref) {
                Some(indexed) if &indexed.chunk.id == id => {}
                _ => return Err(corrupt(format!("id {id} points at wrong slot {slot}"))),
            }
        }

        let total: usize = self.slots.iter().flatten().map(|c| c.length).sum();
        if total != self.total_length {
            return Err(corrupt(format!(
                "total length {} but chunks sum to {total}",
                self.total_length
            )));
        }

        for (term, posting) in &self.postings {
            for slot in posting {
                let holds_term = self
                    .slots
                    .get(*slot)
                    .and_then(Option::as_ref)
                    .is_some_and(|c| c.term_frequency.contains_key(term));
                if !holds_term {
                    return Err(corrupt(format!("posting for '{term}' has stale slot {slot}")));
                }
            }
        }

        for (slot, indexed) in self.slots.iter().enumerate() {
            let Some(indexed) = indexed else { continue };
            for term in indexed.term_frequency.keys() {
                if !self.postings.get(term).is_some_and(|p| p.contains(&slot)) {
                    return Err(corrupt(format!(
                        "chunk {} missing from posting for '{term}'",
                        indexed.chunk.id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Drop everything and re-index from source chunks.
    #[instrument(skip_all)]
    pub fn rebuild(&mut self, chunks: Vec<Chunk>) {
        let drop_stop_words = self.params.stop_words;
        let indexed: Vec<IndexedChunk> = chunks
            .into_par_iter()
            .map(|chunk| IndexedChunk::from_chunk(chunk, drop_stop_words))
            .collect();

        *self = Self::new(self.params);
        for chunk in indexed {
            self.insert(chunk);
        }
        debug!(chunks = self.len(), "Rebuilt lexical index");
    }

    #[cfg(test)]
    pub(crate) fn inject_stale_posting(&mut self, term: &str) {
        self.postings
            .entry(term.to_string())
            .or_default()
            .insert(self.slots.len() + 7);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkMetadata;

    fn chunk(id: &str, content: &str) -> Chunk {
        Chunk {
            id: ChunkId::from(id),
            document_id: DocumentId::from(id.split('#').next().unwrap_or(id)),
            content: content.to_string(),
            token_count: crate::text::estimate_tokens(content),
            start_offset: 0,
            end_offset: content.len(),
            keywords: Vec::new(),
            metadata: ChunkMetadata::default(),
        }
    }

    fn index_with(chunks: &[(&str, &str)]) -> LexicalIndex {
        let mut index = LexicalIndex::default();
        for (id, content) in chunks {
            index.add_chunk(chunk(id, content));
        }
        index
    }

    #[test]
    fn test_dishwasher_chunk_outscores_warranty_chunk() {
        let index = index_with(&[
            ("manual#0000", "The Miele dishwasher has a 14-place setting"),
            ("manual#0001", "Warranty covers parts for two years"),
        ]);

        let hits = index.search("dishwasher warranty").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id.as_str(), "manual#0000");
        assert!(hits[0].score > hits[1].score);
        assert!(hits[1].score > 0.0);
        assert_eq!(hits[0].explanation.matched_terms, vec!["dishwasher"]);
        assert_eq!(hits[0].explanation.chunk_length, 4);
        assert!((hits[0].explanation.average_length - 4.5).abs() < 1e-6);
    }

    #[test]
    fn test_idf_is_positive_and_prefers_rare_terms() {
        let index = index_with(&[
            ("a#0000", "rust compiler errors"),
            ("b#0000", "rust borrow checker"),
            ("c#0000", "python interpreter"),
        ]);
        assert!(index.idf("rust") > 0.0);
        assert!(index.idf("python") > index.idf("rust"));
        assert!(index.idf("absent") > index.idf("python"));
    }

    #[test]
    fn test_average_length_tracks_add_and_remove() {
        let mut index = index_with(&[("a#0000", "alpha beta gamma delta"), ("b#0000", "alpha beta")]);
        assert!((index.average_length() - 3.0).abs() < 1e-6);

        index.remove_chunk(&ChunkId::from("a#0000")).unwrap();
        assert!((index.average_length() - 2.0).abs() < 1e-6);

        index.remove_chunk(&ChunkId::from("b#0000")).unwrap();
        assert_eq!(index.average_length(), 0.0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_upsert_replaces_content() {
        let mut index = index_with(&[("a#0000", "old content here")]);
        index.add_chunk(chunk("a#0000", "fresh material"));
        assert_eq!(index.len(), 1);
        assert!(index.search("old").unwrap().is_empty());
        assert_eq!(index.search("fresh").unwrap().len(), 1);
        index.verify().unwrap();
    }

    #[test]
    fn test_remove_document_removes_all_its_chunks() {
        let mut index = index_with(&[
            ("doc#0000", "dishwasher manual"),
            ("doc#0001", "dishwasher warranty"),
            ("other#0000", "dishwasher review"),
        ]);
        let removed = index.remove_document(&DocumentId::from("doc"));
        assert_eq!(removed.len(), 2);
        let hits = index.search("dishwasher").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id.as_str(), "other#0000");
        assert_eq!(index.document_frequency("dishwasher"), 1);
        index.verify().unwrap();
    }

    #[test]
    fn test_slots_are_reused() {
        let mut index = index_with(&[("a#0000", "alpha"), ("b#0000", "beta")]);
        index.remove_chunk(&ChunkId::from("a#0000"));
        index.add_chunk(chunk("c#0000", "gamma"));
        assert_eq!(index.slots.len(), 2);
        index.verify().unwrap();
    }

    #[test]
    fn test_stop_word_query_matches_nothing() {
        let index = index_with(&[("a#0000", "the dishwasher")]);
        assert!(index.search("the and of").unwrap().is_empty());
        assert!(index.search("").unwrap().is_empty());
    }

    #[test]
    fn test_stop_words_can_be_kept() {
        let mut index = LexicalIndex::new(Bm25Config {
            stop_words: false,
            ..Bm25Config::default()
        });
        index.add_chunk(chunk("a#0000", "the dishwasher"));
        index.add_chunk(chunk("b#0000", "a kettle"));

        let hits = index.search("the").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id.as_str(), "a#0000");
        assert_eq!(index.get(&ChunkId::from("a#0000")).unwrap().length, 2);
    }

    #[test]
    fn test_ties_break_by_chunk_id() {
        let index = index_with(&[("b#0000", "identical words"), ("a#0000", "identical words")]);
        let hits = index.search("identical").unwrap();
        assert_eq!(hits[0].chunk_id.as_str(), "a#0000");
        assert_eq!(hits[1].chunk_id.as_str(), "b#0000");
    }

    #[test]
    fn test_stale_posting_is_detected_and_rebuild_recovers() {
        let mut index = index_with(&[("a#0000", "dishwasher manual")]);
        index.inject_stale_posting("dishwasher");

        assert!(matches!(
            index.verify(),
            Err(DocseekError::IndexCorruption { index: "lexical", .. })
        ));
        assert!(matches!(
            index.search("dishwasher"),
            Err(DocseekError::IndexCorruption { .. })
        ));

        let chunks: Vec<Chunk> = index.chunks().cloned().collect();
        index.rebuild(chunks);
        index.verify().unwrap();
        assert_eq!(index.search("dishwasher").unwrap().len(), 1);
    }
}
