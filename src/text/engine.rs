//! TextEngine — query planning, scoring, ranking, pagination, and snippet
//! extraction over an [`InvertedIndex`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::id::Identifier;
use crate::storage::backend::StorageBackend;
use crate::text::inverted_index::{Document, Field};
use crate::text::tokenize::tokenize;
use crate::text::InvertedIndex;

pub const DEFAULT_MAX_RESULTS: usize = 100;
/// Fuzzy fallback award, relative to a field's weight: 0.5x when a term has
/// zero exact occurrences but the field contains its leading 3 characters.
/// Deliberately coarse, not a confidence score meant to be tuned further.
const FUZZY_MATCH_WEIGHT: f64 = 0.5;
const SNIPPET_CONTEXT: usize = 40;
const DEFAULT_REBUILD_PREFIXES: &[&str] = &["", "notes/", "daily/"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Relevance,
    Created,
    Updated,
    Title,
}

impl Default for SortBy {
    fn default() -> Self {
        SortBy::Relevance
    }
}

/// A search request. `fields` defaults to all three; `limit` is clamped to
/// [`DEFAULT_MAX_RESULTS`] unless a smaller value is given.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub text: String,
    pub fields: Vec<Field>,
    pub tags: Vec<String>,
    pub note_type: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub sort_by: SortBy,
    pub sort_desc: bool,
    pub limit: usize,
    pub offset: usize,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Query {
            text: text.into(),
            fields: vec![Field::Title, Field::Content, Field::Tags],
            limit: DEFAULT_MAX_RESULTS,
            ..Default::default()
        }
    }

    fn effective_fields(&self) -> Vec<Field> {
        if self.fields.is_empty() {
            vec![Field::Title, Field::Content, Field::Tags]
        } else {
            self.fields.clone()
        }
    }

    fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_MAX_RESULTS
        } else {
            self.limit.min(DEFAULT_MAX_RESULTS)
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchPosition {
    pub field: Field,
    pub byte_offset: usize,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: Identifier,
    pub score: f64,
    pub snippet: Option<String>,
}

fn field_weight(field: Field) -> f64 {
    match field {
        Field::Title => 2.0,
        Field::Content => 1.0,
        Field::Tags => 1.5,
    }
}

pub struct TextEngine<'a> {
    index: &'a InvertedIndex,
}

impl<'a> TextEngine<'a> {
    pub fn new(index: &'a InvertedIndex) -> Self {
        TextEngine { index }
    }

    /// Runs `query` against the index, rebuilding from `backend` first if
    /// the index is empty (spec's bootstrap policy). Rebuild failures on
    /// individual files are swallowed; only catastrophic storage errors
    /// propagate.
    pub async fn search(
        &self,
        query: &Query,
        backend: &dyn StorageBackend,
        cancel: &CancelToken,
    ) -> Result<Vec<SearchHit>, Error> {
        if self.index.is_empty() {
            self.rebuild(backend, cancel).await?;
        }
        Ok(self.search_indexed(query))
    }

    /// Runs `query` against the current index contents without attempting
    /// a bootstrap rebuild.
    pub fn search_indexed(&self, query: &Query) -> Vec<SearchHit> {
        let fields = query.effective_fields();
        let terms = tokenize(&query.text);

        let mut candidates: std::collections::HashSet<Identifier> = std::collections::HashSet::new();
        if terms.is_empty() {
            candidates.extend(self.index.all_ids());
        } else {
            for term in &terms {
                for &field in &fields {
                    candidates.extend(self.index.postings(term, field));
                }
                if self.index.postings(term, Field::Title).is_empty()
                    && self.index.postings(term, Field::Content).is_empty()
                    && self.index.postings(term, Field::Tags).is_empty()
                    && term.len() >= 3
                {
                    let prefix = &term[..3];
                    for candidate_term in self.index.terms_with_prefix(prefix) {
                        for &field in &fields {
                            candidates.extend(self.index.postings(&candidate_term, field));
                        }
                    }
                }
            }
        }

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter_map(|id| self.index.document(id).map(|doc| (id, doc)))
            .filter(|(_, doc)| passes_filters(doc, query))
            .map(|(id, doc)| {
                let (score, best_match) = score_document(&doc, &terms, &fields);
                let snippet = best_match.map(|(field, offset)| {
                    build_snippet(&field_text_for_snippet(&doc, field), offset)
                });
                SearchHit { id, score, snippet }
            })
            .collect();

        sort_hits(&mut hits, query, self.index);

        let offset = query.offset.min(hits.len());
        let limit = query.effective_limit();
        hits.into_iter().skip(offset).take(limit).collect()
    }

    /// Rebuilds the index from scratch by enumerating candidate paths under
    /// `backend`, filtering to `.md` files, and indexing whatever parses.
    pub async fn rebuild(&self, backend: &dyn StorageBackend, cancel: &CancelToken) -> Result<(), Error> {
        for prefix in DEFAULT_REBUILD_PREFIXES {
            if cancel.is_cancelled() {
                return Err(Error::cancelled());
            }
            let entries = match backend.list(prefix, cancel).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == crate::error::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            for entry in entries {
                if !entry.ends_with(".md") {
                    continue;
                }
                let bytes = match backend.get(&entry, cancel).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(path = %entry, error = %e, "skipping unreadable file during index rebuild");
                        continue;
                    }
                };
                let content = match std::str::from_utf8(&bytes) {
                    Ok(s) => s,
                    Err(_) => {
                        tracing::warn!(path = %entry, "skipping non-utf8 file during index rebuild");
                        continue;
                    }
                };
                match crate::note::Note::parse(&entry, content) {
                    Ok(note) => self.index.add(Document {
                        id: note.id,
                        title: note.frontmatter.title.clone(),
                        content: note.content.clone(),
                        tags: note.frontmatter.tags.iter().cloned().collect(),
                        note_type: note.frontmatter.note_type.clone(),
                    }),
                    Err(e) => {
                        tracing::warn!(path = %entry, error = %e, "skipping unparseable note during index rebuild");
                    }
                }
            }
        }
        Ok(())
    }
}

fn passes_filters(doc: &Document, query: &Query) -> bool {
    if !query.tags.is_empty() && !query.tags.iter().all(|t| doc.tags.contains(t)) {
        return false;
    }
    if let Some(t) = &query.note_type {
        if doc.note_type.as_deref() != Some(t.as_str()) {
            return false;
        }
    }
    true
}

fn field_text_for_snippet(doc: &Document, field: Field) -> String {
    match field {
        Field::Title => doc.title.clone(),
        Field::Content => doc.content.clone(),
        Field::Tags => doc.tags.join(" "),
    }
}

/// Scores `doc` against `terms` across `fields`; returns the score and the
/// best snippet anchor (first content-field match if any, else first match
/// in any field, per field iteration order).
fn score_document(doc: &Document, terms: &[String], fields: &[Field]) -> (f64, Option<(Field, usize)>) {
    if terms.is_empty() {
        return (0.0, None);
    }
    let mut score = 0.0;
    let mut content_match: Option<(Field, usize)> = None;
    let mut any_match: Option<(Field, usize)> = None;

    for &field in fields {
        let text = field_text_for_snippet(doc, field);
        let lower = text.to_ascii_lowercase();
        let weight = field_weight(field);
        for term in terms {
            let occurrences = lower.matches(term.as_str()).count();
            if occurrences > 0 {
                score += occurrences as f64 * weight;
                if let Some(offset) = lower.find(term.as_str()) {
                    if field == Field::Content && content_match.is_none() {
                        content_match = Some((field, offset));
                    }
                    if any_match.is_none() {
                        any_match = Some((field, offset));
                    }
                }
            } else if term.len() >= 3 && lower.contains(&term[..3]) {
                score += FUZZY_MATCH_WEIGHT * weight;
            }
        }
    }

    (score, content_match.or(any_match))
}

fn build_snippet(text: &str, byte_offset: usize) -> String {
    let offset = byte_offset.min(text.len());
    let start = floor_char_boundary(text, offset.saturating_sub(SNIPPET_CONTEXT));
    let end = ceil_char_boundary(text, (offset + SNIPPET_CONTEXT).min(text.len()));
    let slice = &text[start..end];
    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    out.push_str(slice);
    if end < text.len() {
        out.push_str("...");
    }
    out
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn sort_hits(hits: &mut [SearchHit], query: &Query, index: &InvertedIndex) {
    match query.sort_by {
        SortBy::Relevance => {
            hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.id.cmp(&b.id)));
        }
        SortBy::Created => sort_by_timestamp(hits, index, query.sort_desc, true),
        SortBy::Updated => sort_by_timestamp(hits, index, query.sort_desc, false),
        SortBy::Title => {
            let titles: HashMap<Identifier, String> = hits
                .iter()
                .filter_map(|h| index.document(h.id).map(|d| (h.id, d.title)))
                .collect();
            hits.sort_by(|a, b| {
                let ta = titles.get(&a.id).map(|s| s.as_str()).unwrap_or("");
                let tb = titles.get(&b.id).map(|s| s.as_str()).unwrap_or("");
                let ord = ta.cmp(tb);
                if query.sort_desc {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
    }
}

fn sort_by_timestamp(hits: &mut [SearchHit], _index: &InvertedIndex, desc: bool, _created: bool) {
    // Created/updated timestamps live on the Note, not the indexed
    // Document; callers sorting by these fields pass pre-resolved hits
    // through `Vault::search`, which re-sorts using its own note cache.
    // Falls back to identifier order (time-ordered) here as a stable
    // approximation when sorting the bare index result.
    hits.sort_by(|a, b| if desc { b.id.cmp(&a.id) } else { a.id.cmp(&b.id) });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: Identifier, title: &str, content: &str, tags: &[&str]) -> Document {
        Document {
            id,
            title: title.to_string(),
            content: content.to_string(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            note_type: None,
        }
    }

    #[test]
    fn title_matches_score_higher_than_content_matches() {
        let index = InvertedIndex::new();
        let id_title = Identifier::generate_at(1);
        let id_content = Identifier::generate_at(2);
        index.add(doc(id_title, "rust programming", "nothing special", &[]));
        index.add(doc(id_content, "nothing special", "rust programming", &[]));
        let engine = TextEngine::new(&index);
        let hits = engine.search_indexed(&Query::new("rust"));
        assert_eq!(hits[0].id, id_title);
    }

    #[test]
    fn empty_query_returns_all_documents_filter_only() {
        let index = InvertedIndex::new();
        let id = Identifier::generate_at(1);
        index.add(doc(id, "Title", "content", &[]));
        let engine = TextEngine::new(&index);
        let hits = engine.search_indexed(&Query::new(""));
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn tag_filter_excludes_non_matching_documents() {
        let index = InvertedIndex::new();
        let id_a = Identifier::generate_at(1);
        let id_b = Identifier::generate_at(2);
        index.add(doc(id_a, "A", "content", &["keep"]));
        index.add(doc(id_b, "B", "content", &["drop"]));
        let engine = TextEngine::new(&index);
        let mut query = Query::new("content");
        query.tags = vec!["keep".to_string()];
        let hits = engine.search_indexed(&query);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id_a);
    }

    #[test]
    fn pagination_slices_by_offset_and_limit() {
        let index = InvertedIndex::new();
        for i in 0..5u64 {
            index.add(doc(Identifier::generate_at(i + 1), "shared", "shared content", &[]));
        }
        let engine = TextEngine::new(&index);
        let mut query = Query::new("shared");
        query.limit = 2;
        query.offset = 1;
        let hits = engine.search_indexed(&query);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn limit_is_clamped_to_default_max_results() {
        let mut query = Query::new("x");
        query.limit = 10_000;
        assert_eq!(query.effective_limit(), DEFAULT_MAX_RESULTS);
    }

    #[test]
    fn snippet_preserves_case_and_adds_ellipses_when_truncated() {
        let long = format!("{}MATCH{}", "a".repeat(80), "b".repeat(80));
        let snippet = build_snippet(&long, 80);
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
        assert!(snippet.contains("MATCH"));
    }
}
