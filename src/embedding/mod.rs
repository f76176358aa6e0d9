//! Multi-model embedding.
//!
//! Each configured model is an [`EmbeddingBackend`]. The
//! [`EmbeddingEnsemble`] calls every enabled backend concurrently and fuses
//! the surviving vectors into one unit-length [`CompositeEmbedding`].

mod ensemble;
mod hash;
mod http;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::error::{DocseekError, Result};

pub use ensemble::{EmbeddingEnsemble, TextFeatures};
pub use hash::HashEmbedder;
pub use http::HttpEmbedder;

/// Pluggable embedding backend.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Model name as configured.
    fn name(&self) -> &str;

    /// Output dimension.
    fn dims(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts. Backends with a native batch API override this.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Build a backend from a model entry.
pub fn build_backend(model: &ModelConfig, dims: usize) -> Result<Box<dyn EmbeddingBackend>> {
    if dims == 0 {
        return Err(DocseekError::Config(
            "embedding.dims must be greater than 0".to_string(),
        ));
    }

    match model.backend.trim().to_lowercase().as_str() {
        "" | "hash" => Ok(Box::new(HashEmbedder::new(&model.name, dims))),
        "http" | "openai" => {
            let endpoint = model.endpoint.as_deref().ok_or_else(|| {
                DocseekError::MissingConfig(format!("embedding.models.{}.endpoint", model.name))
            })?;
            Ok(Box::new(HttpEmbedder::new(
                &model.name,
                endpoint,
                model.model.as_deref().unwrap_or(&model.name),
                dims,
            )?))
        }
        other => Err(DocseekError::Config(format!(
            "unknown embedding backend '{other}' for model '{}'",
            model.name
        ))),
    }
}

/// What kind of text a model is good at; drives attention fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialization {
    #[default]
    General,
    Code,
    #[serde(alias = "longform")]
    LongForm,
    #[serde(alias = "shortform")]
    ShortForm,
    Numeric,
}

impl Specialization {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Code => "code",
            Self::LongForm => "long_form",
            Self::ShortForm => "short_form",
            Self::Numeric => "numeric",
        }
    }
}

/// How per-model vectors are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    #[default]
    WeightedAverage,
    MaxPooling,
    AttentionFusion,
}

impl FusionStrategy {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "weighted_average" | "weighted" | "average" => Some(Self::WeightedAverage),
            "max_pooling" | "max" => Some(Self::MaxPooling),
            "attention_fusion" | "attention" => Some(Self::AttentionFusion),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WeightedAverage => "weighted_average",
            Self::MaxPooling => "max_pooling",
            Self::AttentionFusion => "attention_fusion",
        }
    }
}

impl fmt::Display for FusionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One model's unit-length vector and the weight it was fused with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub model_name: String,
    pub vector: Vec<f32>,
    pub weight: f32,
}

/// Result of one model call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    Ok { latency_ms: u64 },
    Failed { reason: String },
    TimedOut { timeout_ms: u64 },
    /// Disabled in config.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOutcome {
    pub model: String,
    #[serde(flatten)]
    pub status: ModelStatus,
}

impl ModelOutcome {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.status, ModelStatus::Ok { .. })
    }
}

/// Fused, unit-length embedding plus per-model detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeEmbedding {
    pub vector: Vec<f32>,
    pub components: Vec<EmbeddingVector>,
    pub strategy: FusionStrategy,
    /// Observability signal in `[0, 1]`; never used to drop results.
    pub quality: f32,
    pub outcomes: Vec<ModelOutcome>,
    pub used_fallback: bool,
}

impl CompositeEmbedding {
    #[must_use]
    pub fn dims(&self) -> usize {
        self.vector.len()
    }

    /// Names of the models that contributed.
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|c| c.model_name.as_str())
    }
}
