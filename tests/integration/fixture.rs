use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use docseek::config::{Config, ModelConfig};
use docseek::embedding::{EmbeddingBackend, HashEmbedder, Specialization};
use docseek::error::{DocseekError, Result};
use docseek::RetrievalEngine;

pub const DIMS: usize = 384;

pub const MANUAL: &str =
    "The Miele dishwasher has a 14-place setting. Warranty covers parts for two years.";

pub const RECIPE: &str = "Knead the bread dough well. Let the dough rise slowly.";

/// In-memory config small enough that each sentence of [`MANUAL`] is a chunk.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.storage.persist = false;
    config.chunking.max_tokens = 10;
    config
}

pub fn model(name: &str) -> ModelConfig {
    ModelConfig::hash(name, 1.0, Specialization::General)
}

pub fn engine_with(backends: Vec<(ModelConfig, Arc<dyn EmbeddingBackend>)>) -> RetrievalEngine {
    let mut config = test_config();
    config.embedding.models = backends.iter().map(|(m, _)| m.clone()).collect();
    RetrievalEngine::with_backends(config, backends).expect("engine")
}

/// Hash embedder that counts calls and can be switched into a slow mode.
#[derive(Debug)]
pub struct CountingBackend {
    inner: HashEmbedder,
    calls: AtomicUsize,
    slow: AtomicBool,
}

impl CountingBackend {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: HashEmbedder::new(name, DIMS),
            calls: AtomicUsize::new(0),
            slow: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    pub fn set_slow(&self, slow: bool) {
        self.slow.store(slow, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingBackend for CountingBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        self.inner.embed(text).await
    }
}

/// Backend that always errors.
#[derive(Debug)]
pub struct FailingBackend {
    name: String,
    pub calls: AtomicUsize,
}

impl FailingBackend {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for FailingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DocseekError::EmbeddingBackend {
            model: self.name.clone(),
            reason: "connection refused".to_string(),
        })
    }
}
