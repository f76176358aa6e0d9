//! Hash embeddings
//!
//! FNV-1a feature hashing over unigrams and bigrams. No model weights,
//! fully deterministic. Each embedder is salted with its model name so
//! several hash models in one ensemble project into different spaces.
//!
//! Tokens come from the shared lexical tokenizer, so stop words and very
//! short tokens never contribute.

use async_trait::async_trait;

use super::EmbeddingBackend;
use crate::error::Result;
use crate::search::similarity::l2_normalize;
use crate::text::tokenize;

/// Signed dimensions written per feature.
const PROBES: u64 = 8;

/// Hash embedder using FNV-1a
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    name: String,
    dim: usize,
    salt: u64,
}

impl HashEmbedder {
    pub fn new(name: impl Into<String>, dim: usize) -> Self {
        let name = name.into();
        let salt = fnv1a_hash(name.as_bytes());
        Self { name, dim, salt }
    }

    /// Embed text into a unit vector. Text without usable tokens gives the
    /// zero vector.
    #[must_use]
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        if self.dim == 0 {
            return Vec::new();
        }

        let tokens = tokenize(text);
        let mut embedding = vec![0.0; self.dim];

        if tokens.is_empty() {
            return embedding;
        }

        for token in &tokens {
            self.accumulate(&mut embedding, token, 1.0);
        }

        for window in tokens.windows(2) {
            let bigram = format!("{} {}", window[0], window[1]);
            self.accumulate(&mut embedding, &bigram, 0.5);
        }

        l2_normalize(&mut embedding);
        embedding
    }

    fn accumulate(&self, embedding: &mut [f32], token: &str, weight: f32) {
        let token_hash = fnv1a_hash_with_salt(fnv1a_hash(token.as_bytes()), self.salt);
        let len = embedding.len();

        for i in 0..PROBES {
            let dim_hash = fnv1a_hash_with_salt(token_hash, i);
            let sign = if dim_hash & 1 == 0 { weight } else { -weight };
            #[allow(clippy::cast_possible_truncation)]
            let dim = ((dim_hash >> 1) as usize) % len;
            embedding[dim] += sign;
        }
    }
}

#[async_trait]
impl EmbeddingBackend for HashEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

fn fnv1a_hash_with_salt(seed: u64, salt: u64) -> u64 {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&seed.to_le_bytes());
    bytes[8..].copy_from_slice(&salt.to_le_bytes());
    fnv1a_hash(&bytes)
}

fn fnv1a_hash(data: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::similarity::{cosine_similarity, l2_norm};

    #[test]
    fn test_fnv1a_hash_known_value() {
        assert_eq!(fnv1a_hash(b"hello"), 0xa430_d846_80aa_bd0b);
    }

    #[test]
    fn test_embedding_dimensions() {
        let embedder = HashEmbedder::new("h", 64);
        assert_eq!(embedder.embed_sync("dishwasher warranty terms").len(), 64);
    }

    #[test]
    fn test_embedding_normalized() {
        let embedder = HashEmbedder::new("h", 128);
        let embedding = embedder.embed_sync("semantic search over document chunks");
        assert!((l2_norm(&embedding) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_embedding_without_tokens_is_zero() {
        let embedder = HashEmbedder::new("h", 32);
        // Short tokens and stop words are filtered out.
        let embedding = embedder.embed_sync("a b of the");
        assert_eq!(l2_norm(&embedding), 0.0);
    }

    #[test]
    fn test_embedding_is_deterministic() {
        let a = HashEmbedder::new("h", 64).embed_sync("same text");
        let b = HashEmbedder::new("h", 64).embed_sync("same text");
        assert_eq!(a, b);
    }

    #[test]
    fn test_salt_changes_projection() {
        let a = HashEmbedder::new("hash-general", 128).embed_sync("dishwasher warranty");
        let b = HashEmbedder::new("hash-code", 128).embed_sync("dishwasher warranty");
        assert_ne!(a, b);
        assert!(cosine_similarity(&a, &b) < 0.9);
    }

    #[test]
    fn test_similarity_prefers_related_text() {
        let embedder = HashEmbedder::new("h", 128);
        let a = embedder.embed_sync("git commit workflow");
        let b = embedder.embed_sync("git commit messages");
        let c = embedder.embed_sync("quantum entanglement photons");

        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[tokio::test]
    async fn test_backend_trait_batch_matches_single() {
        let embedder = HashEmbedder::new("h", 32);
        let texts = vec!["alpha beta".to_string(), "gamma delta".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[1], embedder.embed("gamma delta").await.unwrap());
        assert_eq!(embedder.name(), "h");
    }
}
