//! VectorBackend — cosine-similarity storage for note embeddings.
//!
//! The default implementation is a simple in-memory flat store with
//! brute-force scoring. There's no recall/latency target beyond ranked
//! results, so this deliberately skips the kind of self-referential,
//! unsafe-lifetime machinery an ANN index implementation tends to need.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::error::{self, ErrorKind};
use crate::id::Identifier;
use crate::semantic::embedder::Embedding;

#[derive(Error, Debug)]
pub enum VectorError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("vector backend is not enabled")]
    NotEnabled,
}

impl From<VectorError> for error::Error {
    fn from(e: VectorError) -> Self {
        let kind = match &e {
            VectorError::DimensionMismatch { .. } => ErrorKind::Validation,
            VectorError::NotEnabled => ErrorKind::NotFound,
        };
        error::Error::with_source(kind, e.to_string(), e)
    }
}

#[derive(Debug, Clone)]
pub struct IndexRequest {
    pub id: Identifier,
    pub embedding: Embedding,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: Identifier,
    pub score: f64,
    pub metadata: HashMap<String, String>,
}

/// Cosine similarity `dot(a,b) / (||a|| * ||b||)`. Zero-vector on either
/// side, or a dimension mismatch, yields `0.0` rather than panicking or
/// silently mis-scoring via a shorter zip.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn index(&self, request: IndexRequest, cancel: &CancelToken) -> Result<(), error::Error>;
    async fn index_batch(&self, requests: Vec<IndexRequest>, cancel: &CancelToken) -> Result<(), error::Error>;
    async fn search(
        &self,
        query: &Embedding,
        limit: usize,
        threshold: f64,
        cancel: &CancelToken,
    ) -> Result<Vec<SearchResult>, error::Error>;
    async fn get(&self, id: Identifier, cancel: &CancelToken) -> Result<Embedding, error::Error>;
    async fn delete(&self, id: Identifier, cancel: &CancelToken) -> Result<(), error::Error>;
    async fn delete_batch(&self, ids: &[Identifier], cancel: &CancelToken) -> Result<(), error::Error>;
    async fn close(&self) -> Result<(), error::Error> {
        Ok(())
    }
}

struct Entry {
    embedding: Embedding,
    metadata: HashMap<String, String>,
}

#[derive(Default)]
pub struct InMemoryVectorBackend {
    entries: RwLock<HashMap<Identifier, Entry>>,
    dimensions: Option<usize>,
}

impl InMemoryVectorBackend {
    pub fn new(dimensions: usize) -> Self {
        InMemoryVectorBackend {
            entries: RwLock::new(HashMap::new()),
            dimensions: Some(dimensions),
        }
    }

    fn check_dimensions(&self, embedding: &Embedding) -> Result<(), error::Error> {
        if let Some(expected) = self.dimensions {
            if embedding.len() != expected {
                return Err(VectorError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                }
                .into());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VectorBackend for InMemoryVectorBackend {
    async fn index(&self, request: IndexRequest, cancel: &CancelToken) -> Result<(), error::Error> {
        cancel.check()?;
        self.check_dimensions(&request.embedding)?;
        self.entries.write().expect("vector backend lock poisoned").insert(
            request.id,
            Entry {
                embedding: request.embedding,
                metadata: request.metadata,
            },
        );
        Ok(())
    }

    async fn index_batch(&self, requests: Vec<IndexRequest>, cancel: &CancelToken) -> Result<(), error::Error> {
        for request in requests {
            cancel.check()?;
            self.index(request, cancel).await?;
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &Embedding,
        limit: usize,
        threshold: f64,
        cancel: &CancelToken,
    ) -> Result<Vec<SearchResult>, error::Error> {
        cancel.check()?;
        let entries = self.entries.read().expect("vector backend lock poisoned");
        let mut results: Vec<SearchResult> = entries
            .iter()
            .map(|(id, entry)| SearchResult {
                id: *id,
                score: cosine_similarity(query, &entry.embedding),
                metadata: entry.metadata.clone(),
            })
            .filter(|r| r.score >= threshold)
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.id.cmp(&b.id)));
        results.truncate(limit);
        Ok(results)
    }

    async fn get(&self, id: Identifier, cancel: &CancelToken) -> Result<Embedding, error::Error> {
        cancel.check()?;
        self.entries
            .read()
            .expect("vector backend lock poisoned")
            .get(&id)
            .map(|e| e.embedding.clone())
            .ok_or_else(|| error::Error::not_found(format!("no embedding for {id}")))
    }

    async fn delete(&self, id: Identifier, cancel: &CancelToken) -> Result<(), error::Error> {
        cancel.check()?;
        self.entries.write().expect("vector backend lock poisoned").remove(&id);
        Ok(())
    }

    async fn delete_batch(&self, ids: &[Identifier], cancel: &CancelToken) -> Result<(), error::Error> {
        cancel.check()?;
        let mut entries = self.entries.write().expect("vector backend lock poisoned");
        for id in ids {
            entries.remove(id);
        }
        Ok(())
    }
}

/// Satisfies [`VectorBackend`] with no-op writes and `not-enabled` reads,
/// for profiles with semantic search disabled.
#[derive(Default)]
pub struct NoneVectorBackend;

#[async_trait]
impl VectorBackend for NoneVectorBackend {
    async fn index(&self, _request: IndexRequest, _cancel: &CancelToken) -> Result<(), error::Error> {
        Ok(())
    }

    async fn index_batch(&self, _requests: Vec<IndexRequest>, _cancel: &CancelToken) -> Result<(), error::Error> {
        Ok(())
    }

    async fn search(
        &self,
        _query: &Embedding,
        _limit: usize,
        _threshold: f64,
        _cancel: &CancelToken,
    ) -> Result<Vec<SearchResult>, error::Error> {
        Err(VectorError::NotEnabled.into())
    }

    async fn get(&self, _id: Identifier, _cancel: &CancelToken) -> Result<Embedding, error::Error> {
        Err(VectorError::NotEnabled.into())
    }

    async fn delete(&self, _id: Identifier, _cancel: &CancelToken) -> Result<(), error::Error> {
        Ok(())
    }

    async fn delete_batch(&self, _ids: &[Identifier], _cancel: &CancelToken) -> Result<(), error::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_handles_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_similarity_handles_dimension_mismatch() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[tokio::test]
    async fn search_excludes_results_below_threshold() {
        let backend = InMemoryVectorBackend::new(2);
        let cancel = CancelToken::never();
        backend
            .index(
                IndexRequest {
                    id: Identifier::generate_at(1),
                    embedding: vec![1.0, 0.0],
                    metadata: HashMap::new(),
                },
                &cancel,
            )
            .await
            .unwrap();
        backend
            .index(
                IndexRequest {
                    id: Identifier::generate_at(2),
                    embedding: vec![0.0, 1.0],
                    metadata: HashMap::new(),
                },
                &cancel,
            )
            .await
            .unwrap();
        let results = backend.search(&vec![1.0, 0.0], 10, 0.5, &cancel).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn indexing_wrong_dimension_is_rejected() {
        let backend = InMemoryVectorBackend::new(2);
        let cancel = CancelToken::never();
        let err = backend
            .index(
                IndexRequest {
                    id: Identifier::generate_at(1),
                    embedding: vec![1.0, 0.0, 0.0],
                    metadata: HashMap::new(),
                },
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn none_backend_rejects_search_as_not_enabled() {
        let backend = NoneVectorBackend;
        let cancel = CancelToken::never();
        let err = backend.search(&vec![1.0], 10, 0.0, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
