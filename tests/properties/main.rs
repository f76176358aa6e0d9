//! Property tests for scoring, chunking and cache invariants.

use parking_lot::RwLock;
use proptest::prelude::*;

use docseek::cache::{CacheKey, QueryCache};
use docseek::chunking::Chunker;
use docseek::config::{Bm25Config, CacheConfig, ChunkingConfig};
use docseek::embedding::HashEmbedder;
use docseek::search::{
    FusionEngine, LexicalIndex, VectorEntry, VectorIndex, cosine_similarity,
};
use docseek::text::normalize_query;
use docseek::types::{Document, DocumentKind, SearchOptions};

const VOCAB: &[&str] = &[
    "dishwasher", "warranty", "filter", "rinse", "cycle", "parts", "labor", "drain", "pump",
    "detergent", "spray", "arm", "rack", "door", "seal",
];

fn arb_sentence() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(VOCAB), 1..12).prop_map(|words| {
        let mut sentence = words.join(" ");
        sentence.push('.');
        sentence
    })
}

fn arb_text() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_sentence(), 1..12).prop_map(|s| s.join(" "))
}

fn chunker(max_tokens: usize) -> Chunker {
    Chunker::new(&ChunkingConfig {
        max_tokens,
        min_tokens: 3,
        overlap_sentences: 1,
        max_keywords: 5,
    })
}

proptest! {
    #[test]
    fn bm25_term_score_never_decreases_with_tf(
        idf in 0.01f32..5.0,
        tf in 1u32..50,
        length in 1usize..500,
    ) {
        let index = LexicalIndex::new(Bm25Config::default());
        let lower = index.term_score(idf, tf, length);
        let higher = index.term_score(idf, tf + 1, length);
        prop_assert!(higher >= lower);
        prop_assert!(lower > 0.0);
    }

    #[test]
    fn cosine_is_symmetric_and_bounded(
        pair in (1usize..32).prop_flat_map(|n| (
            prop::collection::vec(-10.0f32..10.0, n),
            prop::collection::vec(-10.0f32..10.0, n),
        )),
    ) {
        let (a, b) = pair;
        let ab = cosine_similarity(&a, &b);
        let ba = cosine_similarity(&b, &a);
        prop_assert!((ab - ba).abs() < 1e-5);
        prop_assert!((-1.0..=1.0).contains(&ab));
    }

    #[test]
    fn normalized_query_ignores_order_and_case(words in prop::collection::vec("[a-z]{3,8}", 1..6)) {
        let forward = words.join(" ");
        let mut reversed = words.clone();
        reversed.reverse();
        let shouted = reversed.join("  ").to_uppercase();
        prop_assert_eq!(normalize_query(&forward), normalize_query(&shouted));
    }

    #[test]
    fn chunks_respect_budget_and_cover_source(text in arb_text(), max_tokens in 4usize..40) {
        let document = Document::new("doc", "Doc", DocumentKind::Text, text.clone());
        let chunks = chunker(max_tokens).chunk(&document);

        prop_assert!(!chunks.is_empty());
        let mut last_start = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert!(chunk.token_count <= max_tokens);
            prop_assert!(!chunk.content.trim().is_empty());
            prop_assert_eq!(&text[chunk.start_offset..chunk.end_offset], chunk.content.as_str());
            prop_assert!(chunk.start_offset >= last_start);
            prop_assert_eq!(chunk.metadata.chunk_index, i);
            prop_assert_eq!(chunk.metadata.chunk_count, chunks.len());
            last_start = chunk.start_offset;
        }
    }

    #[test]
    fn cache_never_exceeds_capacity(
        max_entries in 1usize..8,
        queries in prop::collection::vec("[a-z]{3,10}( [a-z]{3,10}){0,2}", 1..40),
    ) {
        let cache = QueryCache::new(CacheConfig {
            max_entries,
            ..CacheConfig::default()
        });
        for query in &queries {
            cache.put(&CacheKey::new(query), None, Vec::new(), None).unwrap();
            prop_assert!(cache.len() <= max_entries);
        }
    }

    #[test]
    fn fused_results_are_sorted_bounded_and_unique(
        texts in prop::collection::vec(arb_text(), 1..8),
        query in prop::collection::vec(prop::sample::select(VOCAB), 1..4),
        limit in 1usize..10,
        hybrid in any::<bool>(),
    ) {
        let chunker = chunker(30);
        let embedder = HashEmbedder::new("prop", 64);
        let mut lexical = LexicalIndex::new(Bm25Config::default());
        let mut vectors = VectorIndex::new(64);
        for (i, text) in texts.iter().enumerate() {
            let document = Document::new(format!("doc-{i}"), "Doc", DocumentKind::Text, text.clone());
            for chunk in chunker.chunk(&document) {
                vectors.add_entry(VectorEntry {
                    chunk_id: chunk.id.clone(),
                    document_id: chunk.document_id.clone(),
                    embedding: embedder.embed_sync(&chunk.content),
                    metadata: chunk.metadata.clone(),
                    models: vec!["prop".to_string()],
                    quality: 1.0,
                }).unwrap();
                lexical.add_chunk(chunk);
            }
        }

        let query = query.join(" ");
        let query_vector = embedder.embed_sync(&query);
        let options = SearchOptions { limit, ..SearchOptions::default() };
        let results = FusionEngine::default()
            .search(
                &query,
                hybrid.then_some(query_vector.as_slice()),
                &RwLock::new(lexical),
                &RwLock::new(vectors),
                &options,
            )
            .unwrap();

        prop_assert!(results.len() <= limit);
        for pair in results.windows(2) {
            prop_assert!(pair[0].combined_score >= pair[1].combined_score);
            prop_assert!(pair[0].chunk_id != pair[1].chunk_id);
        }
        for result in &results {
            prop_assert!((0.0..=1.0 + 1e-6).contains(&result.combined_score));
            prop_assert!(result.boost >= 1.0);
            if !hybrid {
                prop_assert_eq!(result.vector_score, 0.0);
            }
        }
    }
}
