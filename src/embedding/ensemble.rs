//! Concurrent multi-model embedding with fallback and vector fusion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use super::{
    CompositeEmbedding, EmbeddingBackend, EmbeddingVector, FusionStrategy, HashEmbedder,
    ModelOutcome, ModelStatus, Specialization, build_backend,
};
use crate::cancel::CancelToken;
use crate::config::{EmbeddingConfig, ModelConfig};
use crate::error::{DocseekError, Result};
use crate::search::similarity::{l2_norm, l2_normalize};

/// Texts per timeout window when a batch goes to a backend in one call.
const BATCH_TIMEOUT_SPAN: usize = 32;

/// Token count at which a text counts as fully long-form.
const LONG_TEXT_TOKENS: f32 = 256.0;

const CODE_KEYWORDS: &[&str] = &[
    "fn", "let", "def", "class", "return", "import", "const", "struct", "impl", "function",
    "var", "pub", "async", "await", "enum", "match", "elif", "lambda", "#include",
];

struct Member {
    name: String,
    weight: f32,
    specialization: Specialization,
    timeout: Duration,
    backend: Arc<dyn EmbeddingBackend>,
}

/// Per-model result of one scheduling round. `vectors[i]` is `None` when the
/// model failed or returned a degenerate vector for text `i`.
struct ModelRun {
    outcome: ModelOutcome,
    vectors: Vec<Option<Vec<f32>>>,
}

struct Contribution<'a> {
    name: &'a str,
    weight: f32,
    specialization: Specialization,
    vector: &'a [f32],
}

/// Calls every enabled model concurrently (bounded by a shared semaphore)
/// and fuses the survivors.
pub struct EmbeddingEnsemble {
    members: Vec<Member>,
    skipped: Vec<String>,
    fallback: HashEmbedder,
    fallback_timeout: Duration,
    strategy: FusionStrategy,
    dims: usize,
    semaphore: Arc<Semaphore>,
}

impl std::fmt::Debug for EmbeddingEnsemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingEnsemble")
            .field("models", &self.model_names().collect::<Vec<_>>())
            .field("skipped", &self.skipped)
            .field("strategy", &self.strategy)
            .field("dims", &self.dims)
            .finish_non_exhaustive()
    }
}

impl EmbeddingEnsemble {
    /// Build every enabled model from config.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let mut backends = Vec::new();
        for model in config.models.iter().filter(|m| m.enabled) {
            let backend: Arc<dyn EmbeddingBackend> = Arc::from(build_backend(model, config.dims)?);
            backends.push((model.clone(), backend));
        }
        Self::with_backends(config, backends)
    }

    /// Use caller-supplied backends for the enabled models. Disabled entries
    /// of `config.models` are reported as skipped.
    pub fn with_backends(
        config: &EmbeddingConfig,
        backends: Vec<(ModelConfig, Arc<dyn EmbeddingBackend>)>,
    ) -> Result<Self> {
        if config.dims == 0 {
            return Err(DocseekError::Config(
                "embedding.dims must be greater than 0".to_string(),
            ));
        }

        let default_timeout = Duration::from_millis(config.timeout_ms.max(1));
        let mut members = Vec::with_capacity(backends.len());
        for (model, backend) in backends {
            if !model.enabled {
                continue;
            }
            if backend.dims() != config.dims {
                return Err(DocseekError::Config(format!(
                    "embedding model '{}' produces {} dims, ensemble expects {}",
                    model.name,
                    backend.dims(),
                    config.dims
                )));
            }
            members.push(Member {
                timeout: model
                    .timeout_ms
                    .map_or(default_timeout, |ms| Duration::from_millis(ms.max(1))),
                name: model.name,
                weight: model.weight.max(0.0),
                specialization: model.specialization,
                backend,
            });
        }

        if members.is_empty() {
            return Err(DocseekError::Config(
                "embedding ensemble has no enabled models".to_string(),
            ));
        }

        let skipped = config
            .models
            .iter()
            .filter(|m| !m.enabled)
            .map(|m| m.name.clone())
            .collect();

        Ok(Self {
            members,
            skipped,
            fallback: HashEmbedder::new(&config.fallback, config.dims),
            fallback_timeout: default_timeout,
            strategy: config.strategy,
            dims: config.dims,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        })
    }

    #[must_use]
    pub const fn dims(&self) -> usize {
        self.dims
    }

    #[must_use]
    pub const fn strategy(&self) -> FusionStrategy {
        self.strategy
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.name.as_str())
    }

    pub async fn embed(&self, text: &str) -> Result<CompositeEmbedding> {
        self.embed_with_cancel(text, &CancelToken::new()).await
    }

    /// Embed one text. Blank text is malformed input.
    pub async fn embed_with_cancel(
        &self,
        text: &str,
        cancel: &CancelToken,
    ) -> Result<CompositeEmbedding> {
        if text.trim().is_empty() {
            return Err(DocseekError::MalformedInput(
                "cannot embed empty text".to_string(),
            ));
        }
        let mut results = self.embed_batch(&[text.to_string()], cancel).await?;
        results
            .pop()
            .unwrap_or_else(|| Err(DocseekError::Internal("empty embedding batch".to_string())))
    }

    /// Embed several texts with one call per model.
    ///
    /// The outer error is cancellation only; each text carries its own result
    /// so one unembeddable text does not fail the batch.
    #[instrument(skip_all, fields(texts = texts.len(), models = self.members.len()))]
    pub async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<Result<CompositeEmbedding>>> {
        cancel.check()?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let runs = self
            .run_models(Arc::new(texts.to_vec()), cancel)
            .await?;

        let mut out = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            let mut outcomes: Vec<ModelOutcome> = self
                .skipped
                .iter()
                .map(|name| ModelOutcome {
                    model: name.clone(),
                    status: ModelStatus::Skipped,
                })
                .collect();

            let mut contributions = Vec::new();
            for (member, run) in self.members.iter().zip(&runs) {
                match run.vectors.get(i).and_then(Option::as_deref) {
                    Some(vector) => {
                        contributions.push(Contribution {
                            name: &member.name,
                            weight: member.weight,
                            specialization: member.specialization,
                            vector,
                        });
                        outcomes.push(run.outcome.clone());
                    }
                    None if run.outcome.is_ok() => outcomes.push(ModelOutcome {
                        model: member.name.clone(),
                        status: ModelStatus::Failed {
                            reason: "degenerate vector".to_string(),
                        },
                    }),
                    None => outcomes.push(run.outcome.clone()),
                }
            }

            if contributions.is_empty() {
                cancel.check()?;
                out.push(self.embed_fallback(text, outcomes).await);
            } else {
                out.push(Ok(self.fuse(text, &contributions, outcomes, false)));
            }
        }
        Ok(out)
    }

    /// Fan out one batch to every member; cancellation aborts pending calls.
    async fn run_models(
        &self,
        texts: Arc<Vec<String>>,
        cancel: &CancelToken,
    ) -> Result<Vec<ModelRun>> {
        let mut set = JoinSet::new();
        for (idx, member) in self.members.iter().enumerate() {
            let backend = Arc::clone(&member.backend);
            let semaphore = Arc::clone(&self.semaphore);
            let texts = Arc::clone(&texts);
            let deadline = batch_timeout(member.timeout, texts.len());
            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (idx, None, Duration::ZERO);
                };
                let started = Instant::now();
                let result = tokio::time::timeout(deadline, backend.embed_batch(&texts)).await;
                (idx, Some(result), started.elapsed())
            });
        }

        let mut runs: Vec<Option<ModelRun>> = self.members.iter().map(|_| None).collect();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    set.abort_all();
                    debug!("Embedding cancelled; pending backend calls aborted");
                    return Err(DocseekError::Cancelled);
                }
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok((idx, result, elapsed))) => {
                        let member = &self.members[idx];
                        let run = match result {
                            Some(result) => self.settle(member, result, elapsed, texts.len()),
                            None => failed_run(&member.name, "scheduler closed".to_string()),
                        };
                        runs[idx] = Some(run);
                    }
                    Some(Err(err)) => warn!(error = %err, "Embedding task failed to complete"),
                },
            }
        }

        Ok(runs
            .into_iter()
            .zip(&self.members)
            .map(|(run, member)| {
                run.unwrap_or_else(|| failed_run(&member.name, "task aborted".to_string()))
            })
            .collect())
    }

    fn settle(
        &self,
        member: &Member,
        result: std::result::Result<Result<Vec<Vec<f32>>>, tokio::time::error::Elapsed>,
        elapsed: Duration,
        expected: usize,
    ) -> ModelRun {
        let vectors = match result {
            Err(_) => {
                let timeout_ms = duration_ms(batch_timeout(member.timeout, expected));
                warn!(model = %member.name, timeout_ms, "Embedding model timed out; dropped");
                return ModelRun {
                    outcome: ModelOutcome {
                        model: member.name.clone(),
                        status: ModelStatus::TimedOut { timeout_ms },
                    },
                    vectors: Vec::new(),
                };
            }
            Ok(Err(err)) => {
                warn!(model = %member.name, error = %err, "Embedding model failed; dropped");
                return failed_run(&member.name, err.to_string());
            }
            Ok(Ok(vectors)) => vectors,
        };

        if vectors.len() != expected {
            let reason = format!("expected {expected} vectors, got {}", vectors.len());
            warn!(model = %member.name, %reason, "Embedding model failed; dropped");
            return failed_run(&member.name, reason);
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            let reason = DocseekError::DimensionMismatch {
                expected: self.dims,
                actual: bad.len(),
            }
            .to_string();
            warn!(model = %member.name, %reason, "Embedding model failed; dropped");
            return failed_run(&member.name, reason);
        }

        ModelRun {
            outcome: ModelOutcome {
                model: member.name.clone(),
                status: ModelStatus::Ok {
                    latency_ms: duration_ms(elapsed),
                },
            },
            vectors: vectors.into_iter().map(unit_or_none).collect(),
        }
    }

    async fn embed_fallback(
        &self,
        text: &str,
        mut outcomes: Vec<ModelOutcome>,
    ) -> Result<CompositeEmbedding> {
        let name = self.fallback.name().to_string();
        warn!(fallback = %name, "All embedding models failed; using fallback");

        let started = Instant::now();
        let vector = match tokio::time::timeout(self.fallback_timeout, self.fallback.embed(text))
            .await
        {
            Ok(Ok(vector)) if vector.len() == self.dims => unit_or_none(vector),
            Ok(Ok(_)) | Err(_) => None,
            Ok(Err(err)) => {
                debug!(error = %err, "Fallback embedding failed");
                None
            }
        };

        let Some(vector) = vector else {
            let reason = outcomes
                .iter()
                .filter_map(|o| match &o.status {
                    ModelStatus::Failed { reason } => Some(format!("{}: {reason}", o.model)),
                    ModelStatus::TimedOut { timeout_ms } => {
                        Some(format!("{}: timed out after {timeout_ms}ms", o.model))
                    }
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(DocseekError::AllModelsFailed {
                fallback: name,
                reason: if reason.is_empty() {
                    "no usable vector".to_string()
                } else {
                    reason
                },
            });
        };

        outcomes.push(ModelOutcome {
            model: name.clone(),
            status: ModelStatus::Ok {
                latency_ms: duration_ms(started.elapsed()),
            },
        });
        let contribution = Contribution {
            name: &name,
            weight: 1.0,
            specialization: Specialization::General,
            vector: &vector,
        };
        Ok(self.fuse(text, &[contribution], outcomes, true))
    }

    fn fuse(
        &self,
        text: &str,
        contributions: &[Contribution<'_>],
        outcomes: Vec<ModelOutcome>,
        used_fallback: bool,
    ) -> CompositeEmbedding {
        let features = TextFeatures::from_text(text);
        let raw: Vec<f32> = contributions
            .iter()
            .map(|c| match self.strategy {
                FusionStrategy::AttentionFusion => c.weight * features.affinity(c.specialization),
                FusionStrategy::WeightedAverage | FusionStrategy::MaxPooling => c.weight,
            })
            .collect();
        let weights = normalize_weights(&raw);

        let mut averaged = vec![0.0f32; self.dims];
        for (c, w) in contributions.iter().zip(&weights) {
            for (acc, x) in averaged.iter_mut().zip(c.vector) {
                *acc += w * x;
            }
        }
        // Components are unit length and weights sum to 1, so this is in [0, 1].
        let coherence = l2_norm(&averaged).min(1.0);

        let mut fused = match self.strategy {
            FusionStrategy::MaxPooling => {
                let mut pooled = vec![f32::NEG_INFINITY; self.dims];
                for c in contributions {
                    for (acc, x) in pooled.iter_mut().zip(c.vector) {
                        *acc = acc.max(*x);
                    }
                }
                pooled
            }
            FusionStrategy::WeightedAverage | FusionStrategy::AttentionFusion => averaged,
        };

        if l2_norm(&fused) == 0.0 || fused.iter().any(|x| !x.is_finite()) {
            let strongest = weights
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map_or(0, |(i, _)| i);
            fused = contributions[strongest].vector.to_vec();
        }
        l2_normalize(&mut fused);

        let post_norm = l2_norm(&fused);
        let stability = coherence * if (post_norm - 1.0).abs() < 1e-3 { 1.0 } else { 0.5 };
        let quality = quality_score(
            contributions.len(),
            self.members.len(),
            &weights,
            stability,
        );

        debug!(
            models = contributions.len(),
            strategy = %self.strategy,
            quality,
            used_fallback,
            "Fused embedding"
        );

        CompositeEmbedding {
            vector: fused,
            components: contributions
                .iter()
                .zip(&weights)
                .map(|(c, w)| EmbeddingVector {
                    model_name: c.name.to_string(),
                    vector: c.vector.to_vec(),
                    weight: *w,
                })
                .collect(),
            strategy: self.strategy,
            quality,
            outcomes,
            used_fallback,
        }
    }
}

/// Simple text signals used to re-weight specialized models.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextFeatures {
    /// Fraction of whitespace tokens that look like code.
    pub code_ratio: f32,
    pub token_count: usize,
    /// Fraction of non-whitespace characters that are digits.
    pub numeric_density: f32,
}

impl TextFeatures {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_text(text: &str) -> Self {
        let words: Vec<&str> = text.split_whitespace().collect();
        let code_like = words.iter().filter(|w| looks_like_code(w)).count();

        let (digits, visible) = text
            .chars()
            .filter(|c| !c.is_whitespace())
            .fold((0usize, 0usize), |(d, v), c| {
                (d + usize::from(c.is_ascii_digit()), v + 1)
            });

        Self {
            code_ratio: if words.is_empty() {
                0.0
            } else {
                code_like as f32 / words.len() as f32
            },
            token_count: words.len(),
            numeric_density: if visible == 0 {
                0.0
            } else {
                digits as f32 / visible as f32
            },
        }
    }

    /// Attention multiplier for a model specialization, in `[0.5, 2.0]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn affinity(&self, specialization: Specialization) -> f32 {
        let length = (self.token_count as f32 / LONG_TEXT_TOKENS).min(1.0);
        match specialization {
            Specialization::General => 1.0,
            Specialization::Code => 0.5 + 2.0 * self.code_ratio.min(0.75),
            Specialization::LongForm => 0.5 + length,
            Specialization::ShortForm => 1.5 - length,
            Specialization::Numeric => 0.5 + 3.0 * self.numeric_density.min(0.5),
        }
    }
}

fn looks_like_code(word: &str) -> bool {
    if CODE_KEYWORDS.contains(&word) {
        return true;
    }
    if word.contains("::") || word.contains("->") || word.contains("=>") {
        return true;
    }
    if word.chars().any(|c| matches!(c, '{' | '}' | ';' | '=' | '<' | '>' | '[' | ']')) {
        return true;
    }
    if word.contains('(') && word.contains(')') {
        return true;
    }
    let has_snake = word.contains('_') && word.chars().any(char::is_alphabetic);
    let has_camel = word
        .chars()
        .zip(word.chars().skip(1))
        .any(|(a, b)| a.is_lowercase() && b.is_uppercase());
    has_snake || has_camel
}

fn normalize_weights(raw: &[f32]) -> Vec<f32> {
    let total: f32 = raw.iter().filter(|w| w.is_finite()).sum();
    if total <= 0.0 {
        #[allow(clippy::cast_precision_loss)]
        let equal = 1.0 / raw.len().max(1) as f32;
        return vec![equal; raw.len()];
    }
    raw.iter()
        .map(|w| if w.is_finite() { w / total } else { 0.0 })
        .collect()
}

/// `0.3 * diversity + 0.3 * entropy + 0.4 * stability`, clamped to `[0, 1]`.
#[allow(clippy::cast_precision_loss)]
fn quality_score(used: usize, enabled: usize, weights: &[f32], stability: f32) -> f32 {
    let diversity = (used as f32 / enabled.max(1) as f32).min(1.0);
    let entropy = if weights.len() <= 1 {
        0.0
    } else {
        let h: f32 = weights
            .iter()
            .filter(|w| **w > 0.0)
            .map(|w| -w * w.ln())
            .sum();
        h / (weights.len() as f32).ln()
    };
    (0.3 * diversity + 0.3 * entropy + 0.4 * stability).clamp(0.0, 1.0)
}

/// Unit-length copy, or `None` for zero or non-finite vectors.
fn unit_or_none(mut vector: Vec<f32>) -> Option<Vec<f32>> {
    if vector.iter().any(|x| !x.is_finite()) || l2_norm(&vector) == 0.0 {
        return None;
    }
    l2_normalize(&mut vector);
    Some(vector)
}

fn failed_run(model: &str, reason: String) -> ModelRun {
    ModelRun {
        outcome: ModelOutcome {
            model: model.to_string(),
            status: ModelStatus::Failed { reason },
        },
        vectors: Vec::new(),
    }
}

fn batch_timeout(base: Duration, texts: usize) -> Duration {
    let windows = u32::try_from(texts.div_ceil(BATCH_TIMEOUT_SPAN).max(1)).unwrap_or(u32::MAX);
    base.saturating_mul(windows)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
