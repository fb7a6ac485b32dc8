//! Embedder — an HTTP/JSON client against a local (or remote) inference
//! endpoint's embeddings API. Replaces the in-process ONNX pipeline this
//! codebase's lineage otherwise uses for embeddings: the inference runs
//! out-of-process here, so the client's job is request batching, a query
//! cache, and mapping transport failures onto the `transient` error class.

use std::sync::Mutex;

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::error::{self, ErrorKind};

const DEFAULT_ENDPOINT: &str = "http://localhost:11434";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const QUERY_CACHE_CAPACITY: usize = 100;
const MIN_BATCH_SIZE: usize = 1;
const MAX_BATCH_SIZE: usize = 1000;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedder request failed: {0}")]
    Transport(String),
    #[error("embedder returned a dimensionality mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid embedder configuration: {0}")]
    Config(String),
}

impl From<EmbedderError> for error::Error {
    fn from(e: EmbedderError) -> Self {
        let kind = match &e {
            EmbedderError::Transport(_) => ErrorKind::Transient,
            EmbedderError::DimensionMismatch { .. } => ErrorKind::Fatal,
            EmbedderError::Config(_) => ErrorKind::Fatal,
        };
        error::Error::with_source(kind, e.to_string(), e)
    }
}

#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub endpoint: String,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        EmbedderConfig {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 384,
            batch_size: 50,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// An embedding vector, double precision to match the HTTP wire format.
pub type Embedding = Vec<f64>;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, cancel: &CancelToken) -> Result<Embedding, error::Error>;
    async fn embed_batch(&self, texts: &[String], cancel: &CancelToken) -> Result<Vec<Embedding>, error::Error>;
    fn dimensions(&self) -> usize;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f64>>,
}

/// The default [`Embedder`]: a JSON/HTTP client with a bounded query cache,
/// in the spirit of the lazy-initialized, cache-fronted embedding clients
/// elsewhere in this codebase's lineage — the transport is HTTP rather than
/// an in-process model session.
pub struct HttpEmbedder {
    config: EmbedderConfig,
    client: reqwest::Client,
    query_cache: Mutex<LruCache<String, Embedding>>,
}

impl HttpEmbedder {
    pub fn new(config: EmbedderConfig) -> Result<Self, error::Error> {
        if config.dimensions == 0 {
            return Err(EmbedderError::Config("embedding dimensions must be > 0".to_string()).into());
        }
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&config.batch_size) {
            return Err(EmbedderError::Config(format!(
                "batch_size must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}"
            ))
            .into());
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbedderError::Config(e.to_string()))?;
        Ok(HttpEmbedder {
            config,
            client,
            query_cache: Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(QUERY_CACHE_CAPACITY).unwrap(),
            )),
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Embedding>, error::Error> {
        let url = format!("{}/api/embeddings", self.config.endpoint.trim_end_matches('/'));
        let body = EmbedRequest {
            model: &self.config.model,
            input: texts,
        };
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedderError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EmbedderError::Transport(format!(
                "embedder endpoint returned {}",
                response.status()
            ))
            .into());
        }
        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbedderError::Transport(e.to_string()))?;
        for vec in &parsed.embeddings {
            if vec.len() != self.config.dimensions {
                return Err(EmbedderError::DimensionMismatch {
                    expected: self.config.dimensions,
                    actual: vec.len(),
                }
                .into());
            }
        }
        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str, cancel: &CancelToken) -> Result<Embedding, error::Error> {
        cancel.check()?;
        if let Some(cached) = self.query_cache.lock().expect("embedder cache mutex poisoned").get(text) {
            return Ok(cached.clone());
        }
        let mut result = self.request(std::slice::from_ref(&text.to_string())).await?;
        let embedding = result.pop().ok_or_else(|| EmbedderError::Transport("empty embedder response".to_string()))?;
        self.query_cache
            .lock()
            .expect("embedder cache mutex poisoned")
            .put(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String], cancel: &CancelToken) -> Result<Vec<Embedding>, error::Error> {
        cancel.check()?;
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size) {
            cancel.check()?;
            let embeddings = self.request(chunk).await?;
            if embeddings.len() != chunk.len() {
                return Err(EmbedderError::Transport(format!(
                    "embedder returned {} embeddings for {} inputs",
                    embeddings.len(),
                    chunk.len()
                ))
                .into());
            }
            out.extend(embeddings);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_dimensions() {
        let config = EmbedderConfig {
            dimensions: 0,
            ..Default::default()
        };
        assert!(HttpEmbedder::new(config).is_err());
    }

    #[test]
    fn rejects_batch_size_out_of_bounds() {
        let config = EmbedderConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(HttpEmbedder::new(config).is_err());

        let config = EmbedderConfig {
            batch_size: MAX_BATCH_SIZE + 1,
            ..Default::default()
        };
        assert!(HttpEmbedder::new(config).is_err());
    }

    #[tokio::test]
    async fn embed_query_via_mock_endpoint_is_cached() {
        let server = httpmock::MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::POST).path("/api/embeddings");
            then.status(200)
                .json_body(serde_json::json!({ "embeddings": [[0.1, 0.2, 0.3]] }));
        });
        let config = EmbedderConfig {
            endpoint: server.base_url(),
            dimensions: 3,
            ..Default::default()
        };
        let embedder = HttpEmbedder::new(config).unwrap();
        let cancel = CancelToken::never();
        let first = embedder.embed("hello", &cancel).await.unwrap();
        let second = embedder.embed("hello", &cancel).await.unwrap();
        assert_eq!(first, second);
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_a_fatal_error() {
        let server = httpmock::MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::POST).path("/api/embeddings");
            then.status(200)
                .json_body(serde_json::json!({ "embeddings": [[0.1, 0.2]] }));
        });
        let config = EmbedderConfig {
            endpoint: server.base_url(),
            dimensions: 3,
            ..Default::default()
        };
        let embedder = HttpEmbedder::new(config).unwrap();
        let cancel = CancelToken::never();
        let err = embedder.embed("hello", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[tokio::test]
    async fn transport_failure_is_transient() {
        let config = EmbedderConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            dimensions: 3,
            timeout_secs: 1,
            ..Default::default()
        };
        let embedder = HttpEmbedder::new(config).unwrap();
        let cancel = CancelToken::never();
        let err = embedder.embed("hello", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }
}
