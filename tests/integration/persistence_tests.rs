use docseek::config::Config;
use docseek::types::{DocumentId, DocumentKind, SearchOptions};
use docseek::{EngineSnapshot, RetrievalEngine};
use tempfile::TempDir;

use super::fixture::{MANUAL, RECIPE, test_config};

fn persistent_config(dir: &TempDir) -> Config {
    let mut config = test_config();
    config.storage.persist = true;
    config.storage.data_dir = dir.path().to_path_buf();
    config
}

#[tokio::test]
async fn test_index_and_cache_survive_reopen() {
    let dir = TempDir::new().unwrap();

    let first = {
        let engine = RetrievalEngine::open(persistent_config(&dir)).unwrap();
        engine
            .ingest_document("manual", "Manual", DocumentKind::Text, MANUAL)
            .await
            .unwrap();
        let results = engine
            .search("dishwasher", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(engine.save_cache().unwrap(), 1);
        results
    };
    assert!(dir.path().join("docseek.db").exists());

    let engine = RetrievalEngine::open(persistent_config(&dir)).unwrap();
    let stats = engine.stats();
    assert_eq!(stats.chunk_count, 2);
    assert_eq!(stats.vector_count, 2);
    assert_eq!(stats.cache_size, 1);
    engine.verify().unwrap();

    let again = engine
        .search("dishwasher", &SearchOptions::default())
        .await
        .unwrap();
    let ids = |results: &[docseek::types::SearchResult]| {
        results.iter().map(|r| r.chunk_id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&again), ids(&first));
    assert_eq!(engine.stats().cache.exact_hits, 1);
}

#[tokio::test]
async fn test_ingest_and_delete_clear_persisted_cache() {
    let dir = TempDir::new().unwrap();
    {
        let engine = RetrievalEngine::open(persistent_config(&dir)).unwrap();
        engine
            .ingest_document("manual", "Manual", DocumentKind::Text, MANUAL)
            .await
            .unwrap();
        engine
            .search("dishwasher", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(engine.save_cache().unwrap(), 1);

        engine
            .ingest_document("recipe", "Bread", DocumentKind::Text, RECIPE)
            .await
            .unwrap();
    }

    {
        let engine = RetrievalEngine::open(persistent_config(&dir)).unwrap();
        assert_eq!(engine.stats().cache_size, 0);
        engine
            .search("dough", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(engine.save_cache().unwrap(), 1);
        engine.delete_document(&DocumentId::from("recipe")).unwrap();
    }

    let engine = RetrievalEngine::open(persistent_config(&dir)).unwrap();
    assert_eq!(engine.stats().cache_size, 0);
    assert_eq!(engine.stats().document_count, 1);
}

#[tokio::test]
async fn test_deletion_is_persisted() {
    let dir = TempDir::new().unwrap();
    {
        let engine = RetrievalEngine::open(persistent_config(&dir)).unwrap();
        engine
            .ingest_document("manual", "Manual", DocumentKind::Text, MANUAL)
            .await
            .unwrap();
        engine
            .ingest_document("recipe", "Bread", DocumentKind::Text, RECIPE)
            .await
            .unwrap();
        engine.delete_document(&DocumentId::from("manual")).unwrap();
    }

    let engine = RetrievalEngine::open(persistent_config(&dir)).unwrap();
    let stats = engine.stats();
    assert_eq!(stats.document_count, 1);
    assert_eq!(stats.vector_count, stats.chunk_count);

    let results = engine
        .search("dishwasher warranty", &SearchOptions::default().lexical_only())
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_vectors_from_other_dimension_are_discarded() {
    let dir = TempDir::new().unwrap();
    {
        let engine = RetrievalEngine::open(persistent_config(&dir)).unwrap();
        engine
            .ingest_document("manual", "Manual", DocumentKind::Text, MANUAL)
            .await
            .unwrap();
    }

    let mut config = persistent_config(&dir);
    config.embedding.dims = 64;
    let engine = RetrievalEngine::open(config).unwrap();
    let stats = engine.stats();
    assert_eq!(stats.chunk_count, 2);
    assert_eq!(stats.vector_count, 0);

    let embedded = engine
        .embed_missing(&docseek::cancel::CancelToken::new())
        .await
        .unwrap();
    assert_eq!(embedded, 2);
    assert_eq!(engine.stats().vector_count, 2);
}

#[tokio::test]
async fn test_snapshot_moves_state_between_engines() {
    let source = RetrievalEngine::new(test_config()).unwrap();
    source
        .ingest_document("manual", "Manual", DocumentKind::Text, MANUAL)
        .await
        .unwrap();

    let json = serde_json::to_string(&source.snapshot()).unwrap();
    let snapshot: EngineSnapshot = serde_json::from_str(&json).unwrap();

    let target = RetrievalEngine::new(test_config()).unwrap();
    target.restore(snapshot).unwrap();
    let results = target
        .search("warranty", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results[0].chunk_id.as_str(), "manual#0001");
}
