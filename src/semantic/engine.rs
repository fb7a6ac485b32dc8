//! SemanticEngine — composes an [`Embedder`], a [`VectorBackend`], and an
//! [`EmbeddingCache`] into the note-level operations the vault calls:
//! indexing a note's content and searching by natural-language query.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::error::{self, ErrorKind};
use crate::id::Identifier;
use crate::semantic::cache::EmbeddingCache;
use crate::semantic::embedder::Embedder;
use crate::semantic::vector::{IndexRequest, SearchResult, VectorBackend};

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;
const DEFAULT_THRESHOLD: f64 = 0.0;

pub struct NoteContent {
    pub id: Identifier,
    pub content_hash: String,
    pub text: String,
    pub metadata: HashMap<String, String>,
}

pub struct SemanticEngine {
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorBackend>,
    cache: EmbeddingCache,
}

impl SemanticEngine {
    pub fn new(embedder: Arc<dyn Embedder>, vector: Arc<dyn VectorBackend>, cache: EmbeddingCache) -> Self {
        SemanticEngine { embedder, vector, cache }
    }

    async fn embedding_for(&self, content_hash: &str, text: &str, cancel: &CancelToken) -> Result<Vec<f64>, error::Error> {
        if let Some(cached) = self.cache.get(content_hash) {
            return Ok(cached);
        }
        let embedding = self.embedder.embed(text, cancel).await?;
        self.cache.set(content_hash.to_string(), embedding.clone());
        Ok(embedding)
    }

    pub async fn index_note(&self, note: NoteContent, cancel: &CancelToken) -> Result<(), error::Error> {
        cancel.check()?;
        let embedding = self.embedding_for(&note.content_hash, &note.text, cancel).await?;
        self.vector
            .index(
                IndexRequest {
                    id: note.id,
                    embedding,
                    metadata: note.metadata,
                },
                cancel,
            )
            .await
    }

    /// Indexes a batch of notes. Cache misses are embedded in one batched
    /// request; cache hits never reach the embedder. A count mismatch
    /// between inputs and embedder output is an embedder-level fatal error
    /// already raised by `embed_batch`, not re-checked here.
    pub async fn index_notes(&self, notes: Vec<NoteContent>, cancel: &CancelToken) -> Result<(), error::Error> {
        let mut pending_texts = Vec::new();
        let mut pending_indices = Vec::new();
        let mut embeddings: Vec<Option<Vec<f64>>> = Vec::with_capacity(notes.len());

        for note in &notes {
            cancel.check()?;
            if let Some(cached) = self.cache.get(&note.content_hash) {
                embeddings.push(Some(cached));
            } else {
                pending_indices.push(embeddings.len());
                pending_texts.push(note.text.clone());
                embeddings.push(None);
            }
        }

        if !pending_texts.is_empty() {
            let fresh = self.embedder.embed_batch(&pending_texts, cancel).await?;
            for (slot, embedding) in pending_indices.into_iter().zip(fresh) {
                self.cache.set(notes[slot].content_hash.clone(), embedding.clone());
                embeddings[slot] = Some(embedding);
            }
        }

        let requests = notes
            .into_iter()
            .zip(embeddings)
            .map(|(note, embedding)| IndexRequest {
                id: note.id,
                embedding: embedding.expect("every slot filled from cache or embed_batch"),
                metadata: note.metadata,
            })
            .collect();
        self.vector.index_batch(requests, cancel).await
    }

    pub async fn delete_note(&self, id: Identifier, cancel: &CancelToken) -> Result<(), error::Error> {
        self.vector.delete(id, cancel).await
    }

    pub async fn delete_notes(&self, ids: &[Identifier], cancel: &CancelToken) -> Result<(), error::Error> {
        self.vector.delete_batch(ids, cancel).await
    }

    /// Embeds `query_text` (through the cache) and searches the vector
    /// backend. An embedder failure propagates as-is — typically
    /// `Transient` — so callers composing this into a ranked search (see
    /// the hybrid ranker) can catch it and degrade to text-only search.
    pub async fn search(
        &self,
        query_text: &str,
        limit: usize,
        threshold: f64,
        cancel: &CancelToken,
    ) -> Result<Vec<SearchResult>, error::Error> {
        cancel.check()?;
        let limit = limit.clamp(1, MAX_LIMIT);
        let threshold = threshold.clamp(0.0, 1.0);
        let embedding = self.embedder.embed(query_text, cancel).await?;
        self.vector.search(&embedding, limit, threshold, cancel).await
    }

    pub fn default_limit(&self) -> usize {
        DEFAULT_LIMIT
    }

    pub fn default_threshold(&self) -> f64 {
        DEFAULT_THRESHOLD
    }
}

/// True if an error from [`SemanticEngine::search`] or an index call should
/// be treated as "semantic search unavailable for now" rather than a hard
/// failure — i.e. whether a caller should degrade gracefully.
pub fn is_degraded(err: &error::Error) -> bool {
    matches!(err.kind(), ErrorKind::Transient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::vector::InMemoryVectorBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubEmbedder {
        dims: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str, _cancel: &CancelToken) -> Result<Vec<f64>, error::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f64; self.dims])
        }

        async fn embed_batch(&self, texts: &[String], _cancel: &CancelToken) -> Result<Vec<Vec<f64>>, error::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f64; self.dims]).collect())
        }

        fn dimensions(&self) -> usize {
            self.dims
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str, _cancel: &CancelToken) -> Result<Vec<f64>, error::Error> {
            Err(error::Error::transient("embedder unreachable"))
        }

        async fn embed_batch(&self, _texts: &[String], _cancel: &CancelToken) -> Result<Vec<Vec<f64>>, error::Error> {
            Err(error::Error::transient("embedder unreachable"))
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    fn engine(embedder: Arc<dyn Embedder>) -> SemanticEngine {
        SemanticEngine::new(
            embedder,
            Arc::new(InMemoryVectorBackend::new(2)),
            EmbeddingCache::new(10, std::time::Duration::from_secs(60)),
        )
    }

    #[tokio::test]
    async fn indexing_reuses_cache_across_notes_with_same_hash() {
        let embedder = Arc::new(StubEmbedder {
            dims: 2,
            calls: AtomicUsize::new(0),
        });
        let engine = engine(embedder.clone());
        let cancel = CancelToken::never();
        engine
            .index_note(
                NoteContent {
                    id: Identifier::generate_at(1),
                    content_hash: "h1".to_string(),
                    text: "hello world".to_string(),
                    metadata: HashMap::new(),
                },
                &cancel,
            )
            .await
            .unwrap();
        engine
            .index_note(
                NoteContent {
                    id: Identifier::generate_at(2),
                    content_hash: "h1".to_string(),
                    text: "hello world".to_string(),
                    metadata: HashMap::new(),
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn search_propagates_embedder_failure_as_degraded() {
        let engine = engine(Arc::new(FailingEmbedder));
        let cancel = CancelToken::never();
        let err = engine.search("query", 10, 0.0, &cancel).await.unwrap_err();
        assert!(is_degraded(&err));
    }

    #[tokio::test]
    async fn batch_indexing_embeds_only_uncached_notes() {
        let embedder = Arc::new(StubEmbedder {
            dims: 2,
            calls: AtomicUsize::new(0),
        });
        let engine = engine(embedder.clone());
        let cancel = CancelToken::never();
        let notes = vec![
            NoteContent {
                id: Identifier::generate_at(1),
                content_hash: "a".to_string(),
                text: "one".to_string(),
                metadata: HashMap::new(),
            },
            NoteContent {
                id: Identifier::generate_at(2),
                content_hash: "b".to_string(),
                text: "two".to_string(),
                metadata: HashMap::new(),
            },
        ];
        engine.index_notes(notes, &cancel).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }
}
