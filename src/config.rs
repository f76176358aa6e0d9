use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::embedding::{FusionStrategy, Specialization};
use crate::error::{DocseekError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bm25: Bm25Config,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load defaults, then the global and project config files (or an explicit
    /// path), then `DOCSEEK_*` environment overrides.
    pub fn load(explicit_path: Option<&Path>, data_dir: &Path) -> Result<Self> {
        let mut config = Self::default();
        config.storage.data_dir = data_dir.to_path_buf();

        let explicit = explicit_path
            .map(PathBuf::from)
            .or_else(|| std::env::var("DOCSEEK_CONFIG").ok().map(PathBuf::from));

        if let Some(path) = explicit {
            match Self::load_patch(&path)? {
                Some(patch) => config.merge_patch(patch),
                None => return Err(DocseekError::ConfigNotFound(path)),
            }
        } else {
            if let Some(global) = Self::load_global()? {
                config.merge_patch(global);
            }
            if let Some(project) = Self::load_patch(&data_dir.join("config.toml"))? {
                config.merge_patch(project);
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Parse a full config from TOML text, applying it over the defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let patch: ConfigPatch = toml::from_str(raw)
            .map_err(|err| DocseekError::Config(format!("parse config: {err}")))?;
        let mut config = Self::default();
        config.merge_patch(patch);
        config.validate()?;
        Ok(config)
    }

    fn load_global() -> Result<Option<ConfigPatch>> {
        let Some(dir) = dirs::config_dir() else {
            return Ok(None);
        };
        Self::load_patch(&dir.join("docseek/config.toml"))
    }

    fn load_patch(path: &Path) -> Result<Option<ConfigPatch>> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path).map_err(|err| {
            DocseekError::Config(format!("read config {}: {err}", path.display()))
        })?;
        let patch = toml::from_str(&raw).map_err(|err| {
            DocseekError::Config(format!("parse config {}: {err}", path.display()))
        })?;
        Ok(Some(patch))
    }

    fn merge_patch(&mut self, patch: ConfigPatch) {
        if let Some(patch) = patch.bm25 {
            self.bm25.merge(patch);
        }
        if let Some(patch) = patch.fusion {
            self.fusion.merge(patch);
        }
        if let Some(patch) = patch.vector {
            self.vector.merge(patch);
        }
        if let Some(patch) = patch.cache {
            self.cache.merge(patch);
        }
        if let Some(patch) = patch.embedding {
            self.embedding.merge(patch);
        }
        if let Some(patch) = patch.chunking {
            self.chunking.merge(patch);
        }
        if let Some(patch) = patch.storage {
            self.storage.merge(patch);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_f32("DOCSEEK_BM25_K1")? {
            self.bm25.k1 = value;
        }
        if let Some(value) = env_f32("DOCSEEK_BM25_B")? {
            self.bm25.b = value;
        }
        if let Some(value) = env_bool("DOCSEEK_BM25_STOP_WORDS") {
            self.bm25.stop_words = value;
        }
        if let Some(value) = env_f32("DOCSEEK_FUSION_BM25_WEIGHT")? {
            self.fusion.bm25_weight = value;
        }
        if let Some(value) = env_f32("DOCSEEK_FUSION_VECTOR_WEIGHT")? {
            self.fusion.vector_weight = value;
        }
        if let Some(value) = env_f32("DOCSEEK_VECTOR_THRESHOLD")? {
            self.vector.threshold = value;
        }
        if env_bool("DOCSEEK_CACHE_DISABLED").unwrap_or(false) {
            self.cache.enabled = false;
        }
        if let Some(value) = env_u64("DOCSEEK_CACHE_MAX_ENTRIES")? {
            self.cache.max_entries = usize::try_from(value).unwrap_or(usize::MAX);
        }
        if let Some(value) = env_u64("DOCSEEK_CACHE_TTL_MS")? {
            self.cache.ttl_ms = value;
        }
        if let Some(value) = env_f32("DOCSEEK_CACHE_SEMANTIC_THRESHOLD")? {
            self.cache.semantic_threshold = value;
        }
        if let Some(value) = env_string("DOCSEEK_EMBEDDING_STRATEGY") {
            self.embedding.strategy = FusionStrategy::parse(&value).ok_or_else(|| {
                DocseekError::Config(format!(
                    "invalid DOCSEEK_EMBEDDING_STRATEGY {value} \
                     (expected weighted_average|max_pooling|attention_fusion)"
                ))
            })?;
        }
        if let Some(value) = env_u64("DOCSEEK_EMBEDDING_TIMEOUT_MS")? {
            self.embedding.timeout_ms = value;
        }
        if let Some(value) = env_u64("DOCSEEK_CHUNKING_MAX_TOKENS")? {
            self.chunking.max_tokens = usize::try_from(value).unwrap_or(usize::MAX);
        }
        if let Some(value) = env_string("DOCSEEK_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(value);
        }

        Ok(())
    }

    /// Reject values that would break the scoring math or the cache bounds.
    pub fn validate(&self) -> Result<()> {
        if !(self.bm25.k1 > 0.0) {
            return Err(DocseekError::Config("bm25.k1 must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.bm25.b) {
            return Err(DocseekError::Config("bm25.b must be within [0, 1]".to_string()));
        }
        if self.fusion.bm25_weight < 0.0 || self.fusion.vector_weight < 0.0 {
            return Err(DocseekError::Config(
                "fusion weights must be non-negative".to_string(),
            ));
        }
        if self.fusion.bm25_weight + self.fusion.vector_weight <= 0.0 {
            return Err(DocseekError::Config(
                "fusion.bm25_weight + fusion.vector_weight must be > 0".to_string(),
            ));
        }
        if !(1.0..=2.0).contains(&self.fusion.max_boost) {
            return Err(DocseekError::Config(
                "fusion.max_boost must be within [1, 2]".to_string(),
            ));
        }
        for (key, value) in [
            ("fusion.min_score", self.fusion.min_score),
            ("vector.threshold", self.vector.threshold),
            ("cache.semantic_threshold", self.cache.semantic_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DocseekError::Config(format!("{key} must be within [0, 1]")));
            }
        }
        if self.cache.max_entries == 0 {
            return Err(DocseekError::Config("cache.max_entries must be > 0".to_string()));
        }
        if self.chunking.max_tokens == 0 {
            return Err(DocseekError::Config(
                "chunking.max_tokens must be > 0".to_string(),
            ));
        }
        if self.embedding.dims == 0 {
            return Err(DocseekError::Config("embedding.dims must be > 0".to_string()));
        }
        if self.embedding.max_concurrent == 0 {
            return Err(DocseekError::Config(
                "embedding.max_concurrent must be > 0".to_string(),
            ));
        }
        if !self.embedding.models.iter().any(|model| model.enabled) {
            return Err(DocseekError::Config(
                "embedding.models must contain at least one enabled model".to_string(),
            ));
        }
        for model in &self.embedding.models {
            if model.weight < 0.0 {
                return Err(DocseekError::Config(format!(
                    "embedding model {} has a negative weight",
                    model.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bm25Config {
    #[serde(default)]
    pub k1: f32,
    #[serde(default)]
    pub b: f32,
    /// Drop English stop words from indexed and query terms.
    #[serde(default = "default_true")]
    pub stop_words: bool,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            stop_words: true,
        }
    }
}

impl Bm25Config {
    fn merge(&mut self, patch: Bm25Patch) {
        if let Some(value) = patch.k1 {
            self.k1 = value;
        }
        if let Some(value) = patch.b {
            self.b = value;
        }
        if let Some(value) = patch.stop_words {
            self.stop_words = value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default)]
    pub bm25_weight: f32,
    #[serde(default)]
    pub vector_weight: f32,
    /// Results whose fused score falls below this are dropped before reranking.
    #[serde(default)]
    pub min_score: f32,
    /// Upper bound on the rerank multiplier.
    #[serde(default)]
    pub max_boost: f32,
    #[serde(default)]
    pub title_boost: f32,
    #[serde(default)]
    pub position_boost: f32,
    /// Chunks with an index below this count as early-position.
    #[serde(default)]
    pub position_window: usize,
    #[serde(default)]
    pub content_type_boost: f32,
    /// Document kinds (`text`, `markdown`, `code`, ...) that receive the content-type boost.
    #[serde(default)]
    pub preferred_kinds: Vec<String>,
    /// Each sub-search fetches `limit * candidate_multiplier` candidates.
    #[serde(default)]
    pub candidate_multiplier: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            bm25_weight: 0.7,
            vector_weight: 0.3,
            min_score: 0.05,
            max_boost: 2.0,
            title_boost: 0.3,
            position_boost: 0.15,
            position_window: 2,
            content_type_boost: 0.2,
            preferred_kinds: Vec::new(),
            candidate_multiplier: 3,
        }
    }
}

impl FusionConfig {
    fn merge(&mut self, patch: FusionPatch) {
        if let Some(value) = patch.bm25_weight {
            self.bm25_weight = value;
        }
        if let Some(value) = patch.vector_weight {
            self.vector_weight = value;
        }
        if let Some(value) = patch.min_score {
            self.min_score = value;
        }
        if let Some(value) = patch.max_boost {
            self.max_boost = value;
        }
        if let Some(value) = patch.title_boost {
            self.title_boost = value;
        }
        if let Some(value) = patch.position_boost {
            self.position_boost = value;
        }
        if let Some(value) = patch.position_window {
            self.position_window = value;
        }
        if let Some(value) = patch.content_type_boost {
            self.content_type_boost = value;
        }
        if let Some(values) = patch.preferred_kinds {
            self.preferred_kinds = values;
        }
        if let Some(value) = patch.candidate_multiplier {
            self.candidate_multiplier = value.max(1);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default)]
    pub threshold: f32,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self { threshold: 0.3 }
    }
}

impl VectorConfig {
    fn merge(&mut self, patch: VectorPatch) {
        if let Some(value) = patch.threshold {
            self.threshold = value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max_entries: usize,
    #[serde(default)]
    pub ttl_ms: u64,
    #[serde(default)]
    pub semantic_threshold: f32,
    #[serde(default)]
    pub sweep_interval_secs: u64,
    /// Entries examined per lock acquisition during a sweep.
    #[serde(default)]
    pub sweep_batch: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            ttl_ms: 3_600_000,
            semantic_threshold: 0.85,
            sweep_interval_secs: 300,
            sweep_batch: 256,
        }
    }
}

impl CacheConfig {
    fn merge(&mut self, patch: CachePatch) {
        if let Some(value) = patch.enabled {
            self.enabled = value;
        }
        if let Some(value) = patch.max_entries {
            self.max_entries = value;
        }
        if let Some(value) = patch.ttl_ms {
            self.ttl_ms = value;
        }
        if let Some(value) = patch.semantic_threshold {
            self.semantic_threshold = value;
        }
        if let Some(value) = patch.sweep_interval_secs {
            self.sweep_interval_secs = value;
        }
        if let Some(value) = patch.sweep_batch {
            self.sweep_batch = value.max(1);
        }
    }
}

/// One participant of the embedding ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub specialization: Specialization,
    /// `hash` (local, deterministic) or `http` (OpenAI-compatible endpoint).
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Remote model identifier; defaults to `name`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ModelConfig {
    pub fn hash(name: impl Into<String>, weight: f32, specialization: Specialization) -> Self {
        Self {
            name: name.into(),
            weight,
            enabled: true,
            specialization,
            backend: default_backend(),
            endpoint: None,
            model: None,
            timeout_ms: None,
        }
    }
}

fn default_weight() -> f32 {
    1.0
}

const fn default_true() -> bool {
    true
}

fn default_backend() -> String {
    "hash".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub strategy: FusionStrategy,
    #[serde(default)]
    pub dims: usize,
    #[serde(default)]
    pub max_concurrent: usize,
    #[serde(default)]
    pub timeout_ms: u64,
    /// Name of the hash model used when every configured model fails.
    #[serde(default)]
    pub fallback: String,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            strategy: FusionStrategy::WeightedAverage,
            dims: 384,
            max_concurrent: 8,
            timeout_ms: 10_000,
            fallback: "hash-fallback".to_string(),
            models: vec![
                ModelConfig::hash("hash-general", 1.0, Specialization::General),
                ModelConfig::hash("hash-code", 0.6, Specialization::Code),
                ModelConfig::hash("hash-longform", 0.8, Specialization::LongForm),
            ],
        }
    }
}

impl EmbeddingConfig {
    fn merge(&mut self, patch: EmbeddingPatch) {
        if let Some(value) = patch.strategy {
            self.strategy = value;
        }
        if let Some(value) = patch.dims {
            self.dims = value;
        }
        if let Some(value) = patch.max_concurrent {
            self.max_concurrent = value;
        }
        if let Some(value) = patch.timeout_ms {
            self.timeout_ms = value;
        }
        if let Some(value) = patch.fallback {
            self.fallback = value;
        }
        if let Some(values) = patch.models {
            self.models = values;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub max_tokens: usize,
    /// A trailing chunk smaller than this is merged into its predecessor when it fits.
    #[serde(default)]
    pub min_tokens: usize,
    #[serde(default)]
    pub overlap_sentences: usize,
    #[serde(default)]
    pub max_keywords: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            min_tokens: 20,
            overlap_sentences: 1,
            max_keywords: 10,
        }
    }
}

impl ChunkingConfig {
    fn merge(&mut self, patch: ChunkingPatch) {
        if let Some(value) = patch.max_tokens {
            self.max_tokens = value;
        }
        if let Some(value) = patch.min_tokens {
            self.min_tokens = value;
        }
        if let Some(value) = patch.overlap_sentences {
            self.overlap_sentences = value;
        }
        if let Some(value) = patch.max_keywords {
            self.max_keywords = value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub data_dir: PathBuf,
    /// Persist chunks, vector entries and cache entries to SQLite.
    #[serde(default)]
    pub persist: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            persist: true,
        }
    }
}

impl StorageConfig {
    fn merge(&mut self, patch: StoragePatch) {
        if let Some(value) = patch.data_dir {
            self.data_dir = value;
        }
        if let Some(value) = patch.persist {
            self.persist = value;
        }
    }

    /// Path of the SQLite database inside the data directory.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("docseek.db")
    }
}

/// `$XDG_DATA_HOME/docseek` (or the platform equivalent), `./.docseek` otherwise.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir().map_or_else(|| PathBuf::from(".docseek"), |dir| dir.join("docseek"))
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigPatch {
    pub bm25: Option<Bm25Patch>,
    pub fusion: Option<FusionPatch>,
    pub vector: Option<VectorPatch>,
    pub cache: Option<CachePatch>,
    pub embedding: Option<EmbeddingPatch>,
    pub chunking: Option<ChunkingPatch>,
    pub storage: Option<StoragePatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Bm25Patch {
    pub k1: Option<f32>,
    pub b: Option<f32>,
    pub stop_words: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FusionPatch {
    pub bm25_weight: Option<f32>,
    pub vector_weight: Option<f32>,
    pub min_score: Option<f32>,
    pub max_boost: Option<f32>,
    pub title_boost: Option<f32>,
    pub position_boost: Option<f32>,
    pub position_window: Option<usize>,
    pub content_type_boost: Option<f32>,
    pub preferred_kinds: Option<Vec<String>>,
    pub candidate_multiplier: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct VectorPatch {
    pub threshold: Option<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CachePatch {
    pub enabled: Option<bool>,
    pub max_entries: Option<usize>,
    pub ttl_ms: Option<u64>,
    pub semantic_threshold: Option<f32>,
    pub sweep_interval_secs: Option<u64>,
    pub sweep_batch: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EmbeddingPatch {
    pub strategy: Option<FusionStrategy>,
    pub dims: Option<usize>,
    pub max_concurrent: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub fallback: Option<String>,
    pub models: Option<Vec<ModelConfig>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChunkingPatch {
    pub max_tokens: Option<usize>,
    pub min_tokens: Option<usize>,
    pub overlap_sentences: Option<usize>,
    pub max_keywords: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StoragePatch {
    pub data_dir: Option<PathBuf>,
    pub persist: Option<bool>,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|err| DocseekError::Config(format!("invalid {key} value {value}: {err}"))),
        Err(_) => Ok(None),
    }
}

fn env_f32(key: &str) -> Result<Option<f32>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<f32>()
            .map(Some)
            .map_err(|err| DocseekError::Config(format!("invalid {key} value {value}: {err}"))),
        Err(_) => Ok(None),
    }
}
