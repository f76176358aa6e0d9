use docseek::RetrievalEngine;
use docseek::config::ModelConfig;
use docseek::embedding::Specialization;
use docseek::types::{DocumentKind, SearchOptions};
use httpmock::prelude::*;
use serde_json::json;

use super::fixture::{DIMS, test_config};

fn http_model(name: &str, endpoint: &str) -> ModelConfig {
    ModelConfig {
        backend: "http".to_string(),
        endpoint: Some(endpoint.to_string()),
        model: Some("mini-embed".to_string()),
        ..ModelConfig::hash(name, 1.0, Specialization::General)
    }
}

fn unit_vector(hot: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIMS];
    v[hot] = 1.0;
    v
}

#[tokio::test]
async fn test_http_backend_feeds_the_ensemble() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/embeddings")
                .body_includes("mini-embed");
            then.status(200)
                .json_body(json!({ "data": [{ "index": 0, "embedding": unit_vector(3) }] }));
        })
        .await;

    let mut config = test_config();
    config.embedding.models = vec![http_model("remote", &server.base_url())];
    let engine = RetrievalEngine::new(config).unwrap();

    engine
        .ingest_document(
            "note",
            "Note",
            DocumentKind::Text,
            "Descaling keeps the boiler efficient.",
        )
        .await
        .unwrap();

    // Every text maps to the same vector, so any query is a perfect vector match.
    let results = engine
        .search("unrelated words entirely", &SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!((results[0].vector_score - 1.0).abs() < 1e-6);
    assert_eq!(results[0].bm25_score, 0.0);
    assert_eq!(mock.calls_async().await, 2);
}

#[tokio::test]
async fn test_unreachable_http_model_is_dropped_from_ensemble() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(503);
        })
        .await;

    let mut config = test_config();
    config.embedding.models = vec![
        http_model("remote", &server.base_url()),
        ModelConfig::hash("local", 1.0, Specialization::General),
    ];
    let engine = RetrievalEngine::new(config).unwrap();

    engine
        .ingest_document(
            "note",
            "Note",
            DocumentKind::Text,
            "Descaling keeps the boiler efficient.",
        )
        .await
        .unwrap();
    let results = engine
        .search("boiler descaling", &SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].vector_score > 0.0);
    assert!(mock.calls_async().await >= 2);
    assert_eq!(engine.stats().degraded_queries, 0);
}
