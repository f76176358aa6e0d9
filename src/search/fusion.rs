//! Score fusion for hybrid search
//!
//! Merges BM25 and vector candidates into one ranked list:
//!
//! ```text
//! norm(x)  = x / max(batch)
//! combined = (w_bm25 * norm(bm25) + w_vec * norm(cos)) / (w_bm25 + w_vec)
//! ```
//!
//! A candidate missing from one side scores 0 there. When no vector search
//! ran (lexical-only mode or no query vector) the combined score is the
//! normalized BM25 score alone. Candidates under `min_score` are dropped,
//! then a bounded multiplier rewards title matches, early chunks and
//! preferred document kinds.

use std::collections::{BTreeMap, HashSet};

use parking_lot::RwLock;
use tracing::{debug, instrument};

use crate::config::FusionConfig;
use crate::error::Result;
use crate::search::lexical::{LexicalHit, LexicalIndex};
use crate::search::vector::{VectorHit, VectorIndex};
use crate::text::tokenize;
use crate::types::{Chunk, ChunkId, SearchOptions, SearchResult};

/// Candidate accumulated from both sub-searches.
#[derive(Debug, Default)]
struct Candidate {
    bm25: f32,
    vector: f32,
    matched_terms: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FusionEngine {
    config: FusionConfig,
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}

impl FusionEngine {
    #[must_use]
    pub const fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Candidates fetched from each sub-search for a final `limit`.
    #[must_use]
    pub fn candidate_limit(&self, limit: usize) -> usize {
        limit.saturating_mul(self.config.candidate_multiplier.max(1))
    }

    /// Run lexical and (when a query vector is given) vector search, then fuse.
    ///
    /// Index read locks are taken one at a time; a writer on one index never
    /// waits for a reader of the other.
    #[instrument(skip_all, fields(hybrid = query_vector.is_some(), limit = options.limit))]
    pub fn search(
        &self,
        query: &str,
        query_vector: Option<&[f32]>,
        lexical: &RwLock<LexicalIndex>,
        vectors: &RwLock<VectorIndex>,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        if options.limit == 0 {
            return Ok(Vec::new());
        }
        let candidates = self.candidate_limit(options.limit);
        let query_tokens = lexical.read().query_tokens(query);

        let lexical_hits = if query_tokens.is_empty() {
            Vec::new()
        } else {
            lexical.read().score(&query_tokens)?
        };

        let vector_hits = query_vector.map(|vector| {
            vectors
                .read()
                .search(vector, candidates, options.threshold, &options.filters)
        });

        let index = lexical.read();
        let lexical_hits: Vec<LexicalHit> = lexical_hits
            .into_iter()
            .filter(|hit| {
                index.get(&hit.chunk_id).is_some_and(|indexed| {
                    options
                        .filters
                        .iter()
                        .all(|f| f.matches(&indexed.chunk.document_id, &indexed.chunk.metadata))
                })
            })
            .take(candidates)
            .collect();

        Ok(self.fuse(
            &query_tokens,
            lexical_hits,
            vector_hits,
            |id| index.get(id).map(|indexed| &indexed.chunk),
            options.limit,
        ))
    }

    /// Fuse already-computed sub-search hits.
    ///
    /// `vector_hits` is `None` when vector search did not run. `lookup`
    /// resolves chunk content; hits whose chunk is gone are skipped.
    pub fn fuse<'a, F>(
        &self,
        query_tokens: &[String],
        lexical_hits: Vec<LexicalHit>,
        vector_hits: Option<Vec<VectorHit>>,
        lookup: F,
        limit: usize,
    ) -> Vec<SearchResult>
    where
        F: Fn(&ChunkId) -> Option<&'a Chunk>,
    {
        let hybrid = vector_hits.is_some();
        let max_bm25 = lexical_hits.iter().map(|h| h.score).fold(0.0f32, f32::max);
        let max_vector = vector_hits
            .iter()
            .flatten()
            .map(|h| h.score)
            .fold(0.0f32, f32::max);

        // BTreeMap keeps candidate order deterministic before the final sort.
        let mut merged: BTreeMap<ChunkId, Candidate> = BTreeMap::new();
        for hit in lexical_hits {
            let entry = merged.entry(hit.chunk_id).or_default();
            entry.bm25 = normalize(hit.score, max_bm25);
            entry.matched_terms = hit.explanation.matched_terms;
        }
        for hit in vector_hits.into_iter().flatten() {
            merged.entry(hit.chunk_id).or_default().vector = normalize(hit.score, max_vector);
        }

        let query_terms: HashSet<&str> = query_tokens.iter().map(String::as_str).collect();
        let mut results: Vec<SearchResult> = merged
            .into_iter()
            .filter_map(|(chunk_id, candidate)| {
                let chunk = lookup(&chunk_id)?;
                let combined = self.combine(candidate.bm25, candidate.vector, hybrid);
                if combined < self.config.min_score {
                    return None;
                }
                let boost = self.boost(&query_terms, chunk);
                Some(SearchResult {
                    chunk_id,
                    document_id: chunk.document_id.clone(),
                    content: chunk.content.clone(),
                    bm25_score: candidate.bm25,
                    vector_score: candidate.vector,
                    combined_score: combined * boost,
                    matched_terms: candidate.matched_terms,
                    boost,
                })
            })
            .collect();

        let top = results
            .iter()
            .map(|r| r.combined_score)
            .fold(0.0f32, f32::max);
        if top > 1.0 {
            for result in &mut results {
                result.combined_score /= top;
            }
        }

        results.sort_by(|a, b| {
            b.combined_score
                .total_cmp(&a.combined_score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        results.truncate(limit);

        debug!(results = results.len(), hybrid, "Fused search results");
        results
    }

    fn combine(&self, bm25: f32, vector: f32, hybrid: bool) -> f32 {
        let bm25_weight = self.config.bm25_weight.max(0.0);
        let vector_weight = self.config.vector_weight.max(0.0);
        let total = bm25_weight + vector_weight;
        if !hybrid || total <= 0.0 {
            return bm25;
        }
        ((bm25_weight * bm25 + vector_weight * vector) / total).clamp(0.0, 1.0)
    }

    /// Rerank multiplier in `[1, max_boost]`.
    fn boost(&self, query_terms: &HashSet<&str>, chunk: &Chunk) -> f32 {
        let config = &self.config;
        let mut boost = 1.0;

        if !query_terms.is_empty()
            && tokenize(&chunk.metadata.document_title)
                .iter()
                .any(|token| query_terms.contains(token.as_str()))
        {
            boost += config.title_boost;
        }
        if chunk.metadata.chunk_index < config.position_window {
            boost += config.position_boost;
        }
        let kind = chunk.metadata.document_kind.tag();
        if config
            .preferred_kinds
            .iter()
            .any(|preferred| preferred.eq_ignore_ascii_case(kind))
        {
            boost += config.content_type_boost;
        }

        boost.clamp(1.0, config.max_boost.max(1.0))
    }
}

fn normalize(score: f32, max: f32) -> f32 {
    if max > 0.0 && score.is_finite() {
        (score / max).clamp(0.0, 1.0)
    } else {
        0.0
    }
}
