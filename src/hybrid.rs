//! HybridRanker — combines text and semantic search via a weighted linear
//! blend of normalized scores, not the reciprocal-rank fusion this
//! codebase's lineage otherwise uses for multi-source ranking: callers
//! want a tunable, explainable `(w_text, w_vec)` blend instead.

use std::collections::HashMap;

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::id::Identifier;
use crate::semantic::engine::{is_degraded, SemanticEngine};
use crate::text::engine::{Query, SearchHit, TextEngine};
use crate::text::inverted_index::InvertedIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    TextOnly,
    VectorOnly,
    Hybrid,
}

#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub text: f64,
    pub vector: f64,
}

impl Weights {
    /// Normalizes so `text + vector == 1`, falling back to an even split
    /// when both are zero.
    pub fn normalized(self) -> Self {
        let total = self.text + self.vector;
        if total <= 0.0 {
            return Weights { text: 0.5, vector: 0.5 };
        }
        Weights {
            text: self.text / total,
            vector: self.vector / total,
        }
    }

    pub fn for_mode(mode: SearchMode) -> Self {
        match mode {
            SearchMode::TextOnly => Weights { text: 1.0, vector: 0.0 },
            SearchMode::VectorOnly => Weights { text: 0.0, vector: 1.0 },
            SearchMode::Hybrid => Weights { text: 0.5, vector: 0.5 },
        }
    }
}

#[derive(Debug, Clone)]
pub struct HybridHit {
    pub id: Identifier,
    pub text_score: f64,
    pub vector_score: f64,
    pub weights: Weights,
    pub combined: f64,
}

#[derive(Debug, Clone)]
pub struct HybridSearchResult {
    pub hits: Vec<HybridHit>,
    /// Set when the semantic leg failed and the ranker fell back to
    /// `w_vec = 0` for this query.
    pub fallback_to_text: bool,
}

pub struct HybridRanker<'a> {
    text_engine: TextEngine<'a>,
    semantic_engine: Option<&'a SemanticEngine>,
}

impl<'a> HybridRanker<'a> {
    pub fn new(index: &'a InvertedIndex, semantic_engine: Option<&'a SemanticEngine>) -> Self {
        HybridRanker {
            text_engine: TextEngine::new(index),
            semantic_engine,
        }
    }

    pub async fn search(
        &self,
        query_text: &str,
        mode: SearchMode,
        weights: Weights,
        threshold: f64,
        limit: usize,
        backend: &dyn crate::storage::backend::StorageBackend,
        cancel: &CancelToken,
    ) -> Result<HybridSearchResult, Error> {
        let weights = weights.normalized();
        let mut fallback_to_text = false;

        let text_hits = if mode == SearchMode::VectorOnly {
            Vec::new()
        } else {
            let query = Query::new(query_text);
            self.text_engine.search(&query, backend, cancel).await?
        };
        let text_scores = normalize_scores(&text_hits);

        let vector_scores: HashMap<Identifier, f64> = if mode == SearchMode::TextOnly {
            HashMap::new()
        } else {
            match self.semantic_engine {
                None => {
                    fallback_to_text = true;
                    HashMap::new()
                }
                Some(engine) => match engine.search(query_text, limit.max(1), 0.0, cancel).await {
                    Ok(results) => results.into_iter().map(|r| (r.id, r.score)).collect(),
                    Err(e) if is_degraded(&e) => {
                        fallback_to_text = true;
                        HashMap::new()
                    }
                    Err(e) => return Err(e),
                },
            }
        };

        let effective_weights = if fallback_to_text {
            Weights { text: 1.0, vector: 0.0 }
        } else {
            weights
        };

        let mut ids: Vec<Identifier> = text_scores.keys().copied().collect();
        for id in vector_scores.keys() {
            if !text_scores.contains_key(id) {
                ids.push(*id);
            }
        }

        let mut hits: Vec<HybridHit> = ids
            .into_iter()
            .map(|id| {
                let text_score = text_scores.get(&id).copied().unwrap_or(0.0);
                let vector_score = vector_scores.get(&id).copied().unwrap_or(0.0);
                let combined = effective_weights.text * text_score + effective_weights.vector * vector_score;
                HybridHit {
                    id,
                    text_score,
                    vector_score,
                    weights: effective_weights,
                    combined,
                }
            })
            .filter(|hit| hit.combined >= threshold)
            .collect();

        hits.sort_by(|a, b| b.combined.partial_cmp(&a.combined).unwrap_or(std::cmp::Ordering::Equal).then(a.id.cmp(&b.id)));
        hits.truncate(limit);

        Ok(HybridSearchResult { hits, fallback_to_text })
    }
}

/// Normalizes text-search scores into `[0,1]` by dividing by the top-1 raw
/// score, falling back to a divisor of 1.0 when there are no results.
fn normalize_scores(hits: &[SearchHit]) -> HashMap<Identifier, f64> {
    let top = hits.iter().map(|h| h.score).fold(0.0_f64, f64::max);
    let divisor = if top > 0.0 { top } else { 1.0 };
    hits.iter().map(|h| (h.id, h.score / divisor)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_normalize_to_sum_one() {
        let w = Weights { text: 2.0, vector: 2.0 }.normalized();
        assert!((w.text - 0.5).abs() < 1e-9);
        assert!((w.vector - 0.5).abs() < 1e-9);
    }

    #[test]
    fn zero_weights_fall_back_to_even_split() {
        let w = Weights { text: 0.0, vector: 0.0 }.normalized();
        assert!((w.text - 0.5).abs() < 1e-9);
    }

    #[test]
    fn normalize_scores_scales_by_top_hit() {
        let a = Identifier::generate_at(1);
        let b = Identifier::generate_at(2);
        let hits = vec![
            SearchHit { id: a, score: 4.0, snippet: None },
            SearchHit { id: b, score: 2.0, snippet: None },
        ];
        let scores = normalize_scores(&hits);
        assert_eq!(scores[&a], 1.0);
        assert_eq!(scores[&b], 0.5);
    }

    #[test]
    fn normalize_scores_on_empty_input_is_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }
}
