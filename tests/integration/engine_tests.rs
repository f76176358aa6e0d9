use std::sync::Arc;
use std::time::Duration;

use docseek::cancel::CancelToken;
use docseek::embedding::EmbeddingBackend;
use docseek::error::DocseekError;
use docseek::types::{Document, DocumentId, DocumentKind, MetadataFilter, SearchOptions};
use docseek::RetrievalEngine;

use super::fixture::{
    CountingBackend, FailingBackend, MANUAL, RECIPE, engine_with, model, test_config,
};

#[tokio::test]
async fn test_dishwasher_query_ranks_dishwasher_chunk_first() {
    let engine = RetrievalEngine::new(test_config()).unwrap();
    let chunks = engine
        .ingest_document("manual", "Miele G 7000", DocumentKind::Text, MANUAL)
        .await
        .unwrap();
    assert_eq!(chunks, 2);

    let results = engine
        .search("dishwasher warranty", &SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk_id.as_str(), "manual#0000");
    assert_eq!(results[1].chunk_id.as_str(), "manual#0001");
    assert!(results[0].bm25_score > results[1].bm25_score);
    assert!(results[0].content.contains("dishwasher"));
    assert!(results[0].matched_terms.contains(&"dishwasher".to_string()));
    for pair in results.windows(2) {
        assert!(pair[0].combined_score >= pair[1].combined_score);
    }
    for result in &results {
        assert!((0.0..=1.0).contains(&result.combined_score));
        assert!((0.0..=1.0).contains(&result.bm25_score));
        assert!((0.0..=1.0).contains(&result.vector_score));
    }
}

#[tokio::test]
async fn test_repeated_query_is_served_from_cache_without_embedding() {
    let backend = CountingBackend::new("local");
    let engine = engine_with(vec![(
        model("local"),
        Arc::clone(&backend) as Arc<dyn EmbeddingBackend>,
    )]);
    engine
        .ingest_document("manual", "Manual", DocumentKind::Text, MANUAL)
        .await
        .unwrap();
    backend.reset();

    let first = engine
        .search("dishwasher warranty", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(backend.calls(), 1);

    // Same terms in another order normalize to the same key.
    let second = engine
        .search("Warranty   DISHWASHER", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(backend.calls(), 1);
    assert_eq!(first, second);

    let stats = engine.stats();
    assert_eq!(stats.cache.exact_hits, 1);
    assert_eq!(stats.queries, 2);
    assert!(stats.cache_hit_rate > 0.0);
}

#[tokio::test]
async fn test_options_are_part_of_cache_key() {
    let backend = CountingBackend::new("local");
    let engine = engine_with(vec![(
        model("local"),
        Arc::clone(&backend) as Arc<dyn EmbeddingBackend>,
    )]);
    engine
        .ingest_document("manual", "Manual", DocumentKind::Text, MANUAL)
        .await
        .unwrap();

    engine
        .search("dishwasher", &SearchOptions::default())
        .await
        .unwrap();
    engine
        .search("dishwasher", &SearchOptions::default().with_limit(1))
        .await
        .unwrap();
    assert_eq!(engine.cache().len(), 2);
}

#[tokio::test]
async fn test_failing_model_is_dropped_and_healthy_model_answers() {
    let remote = FailingBackend::new("remote");
    let local = CountingBackend::new("local");
    let engine = engine_with(vec![
        (model("remote"), Arc::clone(&remote) as Arc<dyn EmbeddingBackend>),
        (model("local"), Arc::clone(&local) as Arc<dyn EmbeddingBackend>),
    ]);

    let chunks = engine
        .ingest_document("manual", "Manual", DocumentKind::Text, MANUAL)
        .await
        .unwrap();
    assert_eq!(engine.stats().vector_count, chunks);

    let results = engine
        .search("dishwasher", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results[0].chunk_id.as_str(), "manual#0000");
    assert!(results[0].vector_score > 0.0);
    assert!(remote.calls.load(std::sync::atomic::Ordering::SeqCst) > 0);
    assert_eq!(engine.stats().degraded_queries, 0);
}

#[tokio::test]
async fn test_all_models_failing_uses_fallback_embedder() {
    let remote = FailingBackend::new("remote");
    let engine = engine_with(vec![(
        model("remote"),
        Arc::clone(&remote) as Arc<dyn EmbeddingBackend>,
    )]);

    engine
        .ingest_document("manual", "Manual", DocumentKind::Text, MANUAL)
        .await
        .unwrap();
    assert_eq!(engine.stats().vector_count, 2);

    let results = engine
        .search("dishwasher", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results[0].chunk_id.as_str(), "manual#0000");
}

#[tokio::test]
async fn test_lexical_only_search_never_embeds() {
    let backend = CountingBackend::new("local");
    let engine = engine_with(vec![(
        model("local"),
        Arc::clone(&backend) as Arc<dyn EmbeddingBackend>,
    )]);
    engine
        .ingest_document("manual", "Manual", DocumentKind::Text, MANUAL)
        .await
        .unwrap();
    backend.reset();

    let results = engine
        .search("warranty", &SearchOptions::default().lexical_only())
        .await
        .unwrap();
    assert_eq!(backend.calls(), 0);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_id.as_str(), "manual#0001");
    assert_eq!(results[0].vector_score, 0.0);
}

#[tokio::test]
async fn test_deleted_document_never_reappears() {
    let engine = RetrievalEngine::new(test_config()).unwrap();
    engine
        .ingest_document("manual", "Manual", DocumentKind::Text, MANUAL)
        .await
        .unwrap();
    engine
        .ingest_document("recipe", "Bread", DocumentKind::Text, RECIPE)
        .await
        .unwrap();

    let before = engine
        .search("dishwasher dough", &SearchOptions::default())
        .await
        .unwrap();
    assert!(before.iter().any(|r| r.document_id.as_str() == "manual"));
    assert_eq!(engine.cache().len(), 1);

    let removed = engine.delete_document(&DocumentId::from("manual")).unwrap();
    assert_eq!(removed, 2);
    assert!(engine.cache().is_empty());

    let after = engine
        .search("dishwasher dough", &SearchOptions::default())
        .await
        .unwrap();
    assert!(after.iter().all(|r| r.document_id.as_str() == "recipe"));
    assert!(!after.is_empty());

    let stats = engine.stats();
    assert_eq!(stats.document_count, 1);
    assert_eq!(stats.vector_count, stats.chunk_count);

    let err = engine
        .delete_document(&DocumentId::from("manual"))
        .unwrap_err();
    assert!(matches!(err, DocseekError::DocumentNotFound(_)));
}

#[tokio::test]
async fn test_ingest_invalidates_cached_answers() {
    let engine = RetrievalEngine::new(test_config()).unwrap();
    engine
        .ingest_document("manual", "Manual", DocumentKind::Text, MANUAL)
        .await
        .unwrap();
    engine
        .search("dough", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(engine.cache().len(), 1);

    engine
        .ingest_document("recipe", "Bread", DocumentKind::Text, RECIPE)
        .await
        .unwrap();
    assert!(engine.cache().is_empty());

    let results = engine
        .search("dough", &SearchOptions::default())
        .await
        .unwrap();
    assert!(results.iter().any(|r| r.document_id.as_str() == "recipe"));
}

#[tokio::test]
async fn test_cancelled_search_leaves_cache_untouched() {
    let backend = CountingBackend::new("local");
    let engine = Arc::new(engine_with(vec![(
        model("local"),
        Arc::clone(&backend) as Arc<dyn EmbeddingBackend>,
    )]));
    engine
        .ingest_document("manual", "Manual", DocumentKind::Text, MANUAL)
        .await
        .unwrap();
    backend.set_slow(true);

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = engine
        .search_with_cancel("dishwasher", &SearchOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, DocseekError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(engine.cache().is_empty());
}

#[tokio::test]
async fn test_cancelled_ingest_indexes_nothing() {
    let engine = RetrievalEngine::new(test_config()).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = engine
        .ingest(
            Document::new("manual", "Manual", DocumentKind::Text, MANUAL),
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DocseekError::Cancelled));
    assert_eq!(engine.stats().chunk_count, 0);
    assert_eq!(engine.stats().vector_count, 0);
}

#[tokio::test]
async fn test_metadata_filter_restricts_results() {
    let engine = RetrievalEngine::new(test_config()).unwrap();
    let cancel = CancelToken::new();
    engine
        .ingest_documents(
            vec![
                Document::new("a", "Kitchen A", DocumentKind::Text, MANUAL)
                    .with_extra("team", "appliances"),
                Document::new("b", "Kitchen B", DocumentKind::Markdown, MANUAL)
                    .with_extra("team", "support"),
            ],
            &cancel,
        )
        .await
        .unwrap();

    let options = SearchOptions::default().with_filter(MetadataFilter::new("team", "support"));
    let results = engine.search("dishwasher", &options).await.unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.document_id.as_str() == "b"));

    let options = SearchOptions::default().with_filter(MetadataFilter::new("kind", "text"));
    let results = engine.search("dishwasher", &options).await.unwrap();
    assert!(results.iter().all(|r| r.document_id.as_str() == "a"));
}

#[tokio::test]
async fn test_concurrent_searches_share_one_engine() {
    let engine = Arc::new(RetrievalEngine::new(test_config()).unwrap());
    engine
        .ingest_document("manual", "Manual", DocumentKind::Text, MANUAL)
        .await
        .unwrap();
    engine
        .ingest_document("recipe", "Bread", DocumentKind::Text, RECIPE)
        .await
        .unwrap();

    let queries = ["dishwasher", "warranty", "dough", "bread rise", "parts"];
    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = Arc::clone(&engine);
        let query = queries[i % queries.len()];
        handles.push(tokio::spawn(async move {
            engine.search(query, &SearchOptions::default()).await
        }));
    }
    for handle in handles {
        let results = handle.await.unwrap().unwrap();
        assert!(!results.is_empty());
    }

    let stats = engine.stats();
    assert_eq!(stats.queries, 20);
    assert!(stats.cache.size <= queries.len());
}
