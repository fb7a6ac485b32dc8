//! InvertedIndex — term/tag/type postings over the note corpus, held behind
//! a single read-write lock so adds and removes never tear a reader's view.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::id::Identifier;
use crate::text::tokenize::tokenize;

/// A field eligible for text indexing/search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Content,
    Tags,
}

/// The subset of a note's attributes the index needs. Built by the caller
/// (typically the vault) from its `Note` representation.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: Identifier,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub note_type: Option<String>,
}

#[derive(Default)]
struct IndexState {
    // term -> field -> doc_ids
    terms: HashMap<String, HashMap<Field, HashSet<Identifier>>>,
    tags: HashMap<String, HashSet<Identifier>>,
    types: HashMap<String, HashSet<Identifier>>,
    documents: HashMap<Identifier, Document>,
}

pub struct InvertedIndex {
    state: RwLock<IndexState>,
}

impl Default for InvertedIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl InvertedIndex {
    pub fn new() -> Self {
        InvertedIndex {
            state: RwLock::new(IndexState::default()),
        }
    }

    /// Indexes `doc`, first removing any prior version of the same id so
    /// repeated adds are idempotent.
    pub fn add(&self, doc: Document) {
        let mut state = self.state.write().expect("index lock poisoned");
        remove_locked(&mut state, doc.id);

        for term in tokenize(&doc.title) {
            state
                .terms
                .entry(term)
                .or_default()
                .entry(Field::Title)
                .or_default()
                .insert(doc.id);
        }
        for term in tokenize(&doc.content) {
            state
                .terms
                .entry(term)
                .or_default()
                .entry(Field::Content)
                .or_default()
                .insert(doc.id);
        }
        for tag in &doc.tags {
            for term in tokenize(tag) {
                state
                    .terms
                    .entry(term)
                    .or_default()
                    .entry(Field::Tags)
                    .or_default()
                    .insert(doc.id);
            }
            state.tags.entry(tag.clone()).or_default().insert(doc.id);
        }
        if let Some(t) = &doc.note_type {
            state.types.entry(t.clone()).or_default().insert(doc.id);
        }
        state.documents.insert(doc.id, doc);
    }

    /// Removes `id` from every map, garbage-collecting empty sub-maps.
    pub fn remove(&self, id: Identifier) {
        let mut state = self.state.write().expect("index lock poisoned");
        remove_locked(&mut state, id);
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().expect("index lock poisoned").documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("index lock poisoned").documents.len()
    }

    /// Documents whose `field` contains `term` exactly.
    pub fn postings(&self, term: &str, field: Field) -> HashSet<Identifier> {
        let state = self.state.read().expect("index lock poisoned");
        state
            .terms
            .get(term)
            .and_then(|by_field| by_field.get(&field))
            .cloned()
            .unwrap_or_default()
    }

    pub fn by_tag(&self, tag: &str) -> HashSet<Identifier> {
        self.state
            .read()
            .expect("index lock poisoned")
            .tags
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    pub fn by_type(&self, note_type: &str) -> HashSet<Identifier> {
        self.state
            .read()
            .expect("index lock poisoned")
            .types
            .get(note_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn document(&self, id: Identifier) -> Option<Document> {
        self.state.read().expect("index lock poisoned").documents.get(&id).cloned()
    }

    pub fn all_ids(&self) -> Vec<Identifier> {
        self.state.read().expect("index lock poisoned").documents.keys().copied().collect()
    }

    /// Every field that contains `term` starting with its first three
    /// characters, for the text engine's fuzzy fallback.
    pub fn terms_with_prefix(&self, prefix: &str) -> Vec<String> {
        let state = self.state.read().expect("index lock poisoned");
        state
            .terms
            .keys()
            .filter(|t| t.starts_with(prefix))
            .cloned()
            .collect()
    }
}

fn remove_locked(state: &mut IndexState, id: Identifier) {
    if state.documents.remove(&id).is_none() {
        return;
    }
    state.terms.retain(|_, by_field| {
        by_field.retain(|_, ids| {
            ids.remove(&id);
            !ids.is_empty()
        });
        !by_field.is_empty()
    });
    state.tags.retain(|_, ids| {
        ids.remove(&id);
        !ids.is_empty()
    });
    state.types.retain(|_, ids| {
        ids.remove(&id);
        !ids.is_empty()
    });
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
    fn add_then_query_finds_term_in_title() {
        let idx = InvertedIndex::new();
        let id = Identifier::generate_at(1);
        idx.add(doc(id, "Rust Patterns", "body text", &[]));
        assert!(idx.postings("rust", Field::Title).contains(&id));
    }

    #[test]
    fn add_is_idempotent_for_same_id() {
        let idx = InvertedIndex::new();
        let id = Identifier::generate_at(1);
        idx.add(doc(id, "First Title", "body", &["alpha"]));
        idx.add(doc(id, "Second Title", "body", &["beta"]));
        assert!(idx.postings("first", Field::Title).is_empty());
        assert!(idx.postings("second", Field::Title).contains(&id));
        assert!(idx.by_tag("alpha").is_empty());
        assert!(idx.by_tag("beta").contains(&id));
    }

    #[test]
    fn remove_clears_all_maps_for_id() {
        let idx = InvertedIndex::new();
        let id = Identifier::generate_at(1);
        idx.add(doc(id, "Title", "content", &["tag"]));
        idx.remove(id);
        assert!(idx.postings("title", Field::Title).is_empty());
        assert!(idx.by_tag("tag").is_empty());
        assert!(idx.document(id).is_none());
        assert!(idx.is_empty());
    }

    #[test]
    fn tags_are_indexed_as_field_tokens_and_as_tag_keys() {
        let idx = InvertedIndex::new();
        let id = Identifier::generate_at(1);
        idx.add(doc(id, "Title", "content", &["machine-learning"]));
        assert!(idx.postings("machine", Field::Tags).contains(&id));
        assert!(idx.by_tag("machine-learning").contains(&id));
    }
}
