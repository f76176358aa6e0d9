//! OpenAI-compatible `/v1/embeddings` client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingBackend;
use crate::error::{DocseekError, Result};

/// Bearer token sent with every request when set.
const API_KEY_ENV: &str = "DOCSEEK_EMBEDDING_API_KEY";

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    name: String,
    url: String,
    model: String,
    dims: usize,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("model", &self.model)
            .field("dims", &self.dims)
            .finish_non_exhaustive()
    }
}

impl HttpEmbedder {
    /// `endpoint` is the server base URL; `/v1/embeddings` is appended unless
    /// already present.
    pub fn new(name: &str, endpoint: &str, model: &str, dims: usize) -> Result<Self> {
        let base = endpoint.trim_end_matches('/');
        if base.is_empty() {
            return Err(DocseekError::Config(format!(
                "embedding.models.{name}.endpoint is empty"
            )));
        }
        if base.starts_with("http://") && !is_loopback(base) {
            tracing::warn!(model = name, "Embedding endpoint uses unencrypted HTTP");
        }

        let url = if base.ends_with("/embeddings") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{base}/embeddings")
        } else {
            format!("{base}/v1/embeddings")
        };

        // Per-call deadlines are enforced by the ensemble.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| DocseekError::Config(format!("embedding http client: {err}")))?;

        Ok(Self {
            name: name.to_string(),
            url,
            model: model.to_string(),
            dims,
            api_key: std::env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty()),
            client,
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn backend_error(&self, reason: impl Into<String>) -> DocseekError {
        DocseekError::EmbeddingBackend {
            model: self.name.clone(),
            reason: reason.into(),
        }
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| self.backend_error(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.backend_error(format!("HTTP {status}")));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| self.backend_error(format!("invalid response body: {err}")))?;

        if parsed.data.len() != texts.len() {
            return Err(self.backend_error(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        parsed
            .data
            .sort_by_key(|datum| datum.index.unwrap_or(usize::MAX));

        parsed
            .data
            .into_iter()
            .map(|datum| {
                if datum.embedding.len() == self.dims {
                    Ok(datum.embedding)
                } else {
                    Err(self.backend_error(format!(
                        "dimension mismatch: expected {}, got {}",
                        self.dims,
                        datum.embedding.len()
                    )))
                }
            })
            .collect()
    }
}

fn is_loopback(url: &str) -> bool {
    let rest = url.trim_start_matches("http://");
    if rest.starts_with("[::1]") {
        return true;
    }
    let host = rest.split(['/', ':']).next().unwrap_or_default();
    matches!(host, "localhost" | "127.0.0.1")
}

#[async_trait]
impl EmbeddingBackend for HttpEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| self.backend_error("empty response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn url_is_normalized() {
        let a = HttpEmbedder::new("m", "http://localhost:8080/", "m", 3).unwrap();
        assert_eq!(a.url(), "http://localhost:8080/v1/embeddings");
        let b = HttpEmbedder::new("m", "https://api.example.com/v1", "m", 3).unwrap();
        assert_eq!(b.url(), "https://api.example.com/v1/embeddings");
        assert!(HttpEmbedder::new("m", "", "m", 3).is_err());
    }

    #[tokio::test]
    async fn embed_parses_openai_response() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200)
                    .json_body(json!({ "data": [{ "index": 0, "embedding": [0.1, 0.2, 0.3] }] }));
            })
            .await;

        let embedder = HttpEmbedder::new("remote", &server.base_url(), "mini", 3).unwrap();
        let vector = embedder.embed("dishwasher").await.unwrap();

        mock.assert_async().await;
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn batch_is_reordered_by_index() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200).json_body(json!({
                    "data": [
                        { "index": 1, "embedding": [0.0, 1.0] },
                        { "index": 0, "embedding": [1.0, 0.0] }
                    ]
                }));
            })
            .await;

        let embedder = HttpEmbedder::new("remote", &server.base_url(), "mini", 2).unwrap();
        let vectors = embedder
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn server_error_is_backend_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(503);
            })
            .await;

        let embedder = HttpEmbedder::new("remote", &server.base_url(), "mini", 3).unwrap();
        let err = embedder.embed("x").await.unwrap_err();
        assert!(matches!(err, DocseekError::EmbeddingBackend { .. }));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_backend_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200)
                    .json_body(json!({ "data": [{ "embedding": [0.1, 0.2] }] }));
            })
            .await;

        let embedder = HttpEmbedder::new("remote", &server.base_url(), "mini", 3).unwrap();
        let err = embedder.embed("x").await.unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }
}
