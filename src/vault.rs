//! Vault — the glue that turns storage, the inverted index, the link
//! graph, and an optional semantic engine into note lifecycle operations:
//! create, edit, delete, search, and full-corpus rebuild.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::Profile;
use crate::error::{self, ErrorKind};
use crate::graph::LinkGraph;
use crate::hybrid::{HybridRanker, HybridSearchResult, SearchMode, Weights};
use crate::id::Identifier;
use crate::link::{self, LinkType, Resolver};
use crate::note::Note;
use crate::semantic::cache::EmbeddingCache;
use crate::semantic::embedder::{EmbedderConfig, Embedder, HttpEmbedder};
use crate::semantic::engine::{NoteContent, SemanticEngine};
use crate::storage::backend::StorageBackend;
use crate::storage::cache::{DiskCache, MemoryCache, TieredCache};
use crate::storage::local::LocalBackend;
use crate::storage::s3::{S3Backend, S3Config};
use crate::text::engine::{Query, SearchHit, TextEngine};
use crate::text::inverted_index::{Document, InvertedIndex};

const REBUILD_PREFIXES: &[&str] = &["", "daily/"];

/// Settings that shape note-path layout and indexing policy, derived from
/// a loaded [`Profile`] but kept separate from it so tests can construct a
/// [`Vault`] without a full profile.
pub struct VaultOptions {
    pub notes_dir: String,
    /// Hashtag parsing produces a tag list but, by default, only
    /// `frontmatter.tags` reaches the index. Setting this merges content
    /// hashtags into the tag index too — an explicit per-profile choice
    /// rather than a silent default either way.
    pub merge_content_hashtags: bool,
    pub semantic_batch_size: usize,
}

impl Default for VaultOptions {
    fn default() -> Self {
        VaultOptions {
            notes_dir: "notes".to_string(),
            merge_content_hashtags: false,
            semantic_batch_size: 50,
        }
    }
}

#[derive(Default)]
struct Registry {
    by_title: HashMap<String, Identifier>,
    by_path: HashMap<String, Identifier>,
}

struct RegistryResolver<'a> {
    registry: &'a Registry,
}

impl<'a> Resolver for RegistryResolver<'a> {
    fn resolve_by_title(&self, title: &str) -> Option<Identifier> {
        self.registry.by_title.get(title).copied()
    }

    fn resolve_by_id(&self, id: &str) -> Option<Identifier> {
        Identifier::parse(id).ok()
    }

    fn resolve_by_path(&self, path: &str) -> Option<Identifier> {
        self.registry.by_path.get(path).copied().or_else(|| {
            Path::new(path)
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Identifier::parse(s).ok())
        })
    }
}

/// A named, configured collection of notes with a single storage root and
/// a single active profile's worth of indexing behavior.
pub struct Vault {
    backend: Arc<dyn StorageBackend>,
    index: InvertedIndex,
    graph: LinkGraph,
    semantic: Option<SemanticEngine>,
    registry: RwLock<Registry>,
    options: VaultOptions,
}

fn default_s3_endpoint(region: &str) -> String {
    format!("https://s3.{region}.amazonaws.com")
}

fn build_semantic_engine(profile: &Profile) -> Result<SemanticEngine, error::Error> {
    let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(EmbedderConfig {
        endpoint: profile.vector.embedding.endpoint.clone(),
        model: profile.vector.embedding.model.clone(),
        dimensions: profile.vector.embedding.dimensions,
        batch_size: profile.vector.indexing.batch_size,
        ..EmbedderConfig::default()
    })?);
    let vector = Arc::new(crate::semantic::vector::InMemoryVectorBackend::new(
        profile.vector.embedding.dimensions,
    ));
    let cache = EmbeddingCache::default();
    Ok(SemanticEngine::new(embedder, vector, cache))
}

fn build_backend(profile: &Profile, vault_root: &Path) -> Result<Arc<dyn StorageBackend>, error::Error> {
    match profile.storage.kind.as_str() {
        "s3" => {
            let s3 = &profile.storage.s3;
            let endpoint = s3
                .endpoint
                .clone()
                .unwrap_or_else(|| default_s3_endpoint(&s3.region));
            let memory = MemoryCache::new(
                profile.cache.memory.max_size_mb * 1024 * 1024,
                Duration::from_secs(profile.cache.memory.ttl_minutes * 60),
            );
            let disk = if profile.cache.disk_enabled("s3") {
                let dir = profile
                    .cache
                    .disk
                    .path
                    .clone()
                    .unwrap_or_else(|| vault_root.join(".kbvault").join("cache"));
                Some(DiskCache::new(
                    dir,
                    profile.cache.disk.max_size_mb * 1024 * 1024,
                    Duration::from_secs(profile.cache.disk.ttl_hours * 60 * 60),
                ))
            } else {
                None
            };
            let cache = TieredCache { memory, disk };
            Ok(Arc::new(S3Backend::new(
                S3Config {
                    bucket: s3.bucket.clone(),
                    region: s3.region.clone(),
                    endpoint,
                    access_key_id: s3.access_key_id.clone(),
                    secret_access_key: s3.secret_access_key.clone(),
                },
                cache,
            )))
        }
        _ => {
            let root = profile.storage.path.clone().unwrap_or_else(|| vault_root.to_path_buf());
            Ok(Arc::new(LocalBackend::new(root)?))
        }
    }
}

impl Vault {
    pub fn new(backend: Arc<dyn StorageBackend>, semantic: Option<SemanticEngine>, options: VaultOptions) -> Self {
        Vault {
            backend,
            index: InvertedIndex::new(),
            graph: LinkGraph::new(),
            semantic,
            registry: RwLock::new(Registry::default()),
            options,
        }
    }

    /// Opens a vault rooted at `vault_root` using the storage, cache, and
    /// vector settings of `profile`. Does not touch storage beyond
    /// constructing the backend; callers that need an indexed vault should
    /// call [`Vault::rebuild`] afterward.
    pub fn open(profile: &Profile, vault_root: &Path) -> Result<Self, error::Error> {
        let backend = build_backend(profile, vault_root)?;
        let semantic = if profile.vector.enabled {
            Some(build_semantic_engine(profile)?)
        } else {
            None
        };
        Ok(Vault::new(
            backend,
            semantic,
            VaultOptions {
                notes_dir: profile.vault.notes_dir.clone(),
                merge_content_hashtags: false,
                semantic_batch_size: profile.vector.indexing.batch_size.max(1),
            },
        ))
    }

    fn note_path(&self, id: Identifier) -> String {
        format!("{}/{}.md", self.options.notes_dir.trim_end_matches('/'), id)
    }

    fn tags_for(&self, note: &Note, reg: &Registry) -> Vec<String> {
        let mut tags: std::collections::BTreeSet<String> = note.frontmatter.tags.iter().cloned().collect();
        if self.options.merge_content_hashtags {
            let resolver = RegistryResolver { registry: reg };
            for parsed in link::parse_links(note.id, &note.content, &resolver) {
                if parsed.link_type == LinkType::Hashtag {
                    tags.insert(parsed.link_text);
                }
            }
        }
        tags.into_iter().collect()
    }

    fn note_content_hash(note: &Note) -> String {
        blake3::hash(note.content.as_bytes()).to_hex().to_string()
    }

    fn note_metadata(note: &Note) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        metadata.insert("title".to_string(), note.title.clone());
        if let Some(t) = &note.frontmatter.note_type {
            metadata.insert("type".to_string(), t.clone());
        }
        metadata
    }

    /// Updates the text index, link graph, and title/path registry for
    /// `note`. If a semantic engine is configured, also embeds and indexes
    /// it — failures there are logged and swallowed rather than failing
    /// the write, since semantic indexing is a best-effort enhancement on
    /// top of the durable text/graph state.
    async fn reindex(&self, note: &Note, cancel: &CancelToken) {
        {
            let mut reg = self.registry.write().expect("registry lock poisoned");
            reg.by_title.insert(note.title.clone(), note.id);
            reg.by_path.insert(note.filepath.clone(), note.id);
        }

        self.graph.register_note(note.id, note.title.clone());
        let tags = {
            let reg = self.registry.read().expect("registry lock poisoned");
            let resolver = RegistryResolver { registry: &reg };
            self.graph.set_links(note.id, &note.content, &resolver);
            self.tags_for(note, &reg)
        };

        self.index.add(Document {
            id: note.id,
            title: note.frontmatter.title.clone(),
            content: note.content.clone(),
            tags,
            note_type: note.frontmatter.note_type.clone(),
        });

        if let Some(engine) = &self.semantic {
            let content = NoteContent {
                id: note.id,
                content_hash: Self::note_content_hash(note),
                text: note.content.clone(),
                metadata: Self::note_metadata(note),
            };
            if let Err(e) = engine.index_note(content, cancel).await {
                tracing::warn!(id = %note.id, error = %e, "semantic indexing failed, note remains text-searchable only");
            }
        }
    }

    /// Creates a note: generates an identifier, assembles frontmatter,
    /// serializes, and writes via the storage backend. Indexes on success.
    pub async fn create_note(
        &self,
        title: impl Into<String>,
        content: impl Into<String>,
        cancel: &CancelToken,
    ) -> Result<Note, error::Error> {
        cancel.check()?;
        let id = Identifier::generate();
        let filepath = self.note_path(id);
        let note = Note::new(id, title, content, filepath.clone());
        let raw = note.serialize();
        self.backend.write(&filepath, raw.as_bytes(), None, cancel).await?;
        self.reindex(&note, cancel).await;
        Ok(note)
    }

    /// Re-reads the note's stored content, replaces its body with
    /// `new_content`, recomposes frontmatter with a refreshed
    /// `updated_at`, and writes back. Re-indexes on success.
    pub async fn edit_note(&self, id: Identifier, new_content: &str, cancel: &CancelToken) -> Result<Note, error::Error> {
        cancel.check()?;
        let filepath = self.note_path(id);
        let bytes = self.backend.get(&filepath, cancel).await?;
        let raw = std::str::from_utf8(&bytes)
            .map_err(|e| error::Error::with_source(ErrorKind::Validation, "note content is not valid utf-8", e))?;
        let mut note = Note::parse_with_id(id, &filepath, raw)?;
        note.apply_edit(new_content);
        let serialized = note.serialize();
        self.backend.write(&filepath, serialized.as_bytes(), None, cancel).await?;
        self.reindex(&note, cancel).await;
        Ok(note)
    }

    /// Destroys a note: storage delete, then index remove, graph remove,
    /// and vector delete. A failure partway through leaves the store in a
    /// recoverable inconsistent state; [`Vault::rebuild`] reconciles it.
    pub async fn delete_note(&self, id: Identifier, cancel: &CancelToken) -> Result<(), error::Error> {
        cancel.check()?;
        let filepath = self.note_path(id);
        self.backend.delete(&filepath, cancel).await?;

        self.index.remove(id);
        self.graph.remove_note(id);
        {
            let mut reg = self.registry.write().expect("registry lock poisoned");
            reg.by_path.remove(&filepath);
            reg.by_title.retain(|_, v| *v != id);
        }
        if let Some(engine) = &self.semantic {
            if let Err(e) = engine.delete_note(id, cancel).await {
                tracing::warn!(id = %id, error = %e, "failed to remove note from vector backend");
            }
        }
        Ok(())
    }

    pub async fn search_text(&self, query: &Query, cancel: &CancelToken) -> Result<Vec<SearchHit>, error::Error> {
        TextEngine::new(&self.index).search(query, self.backend.as_ref(), cancel).await
    }

    pub async fn search_hybrid(
        &self,
        query_text: &str,
        mode: SearchMode,
        weights: Weights,
        threshold: f64,
        limit: usize,
        cancel: &CancelToken,
    ) -> Result<HybridSearchResult, error::Error> {
        let ranker = HybridRanker::new(&self.index, self.semantic.as_ref());
        ranker
            .search(query_text, mode, weights, threshold, limit, self.backend.as_ref(), cancel)
            .await
    }

    pub fn graph(&self) -> &LinkGraph {
        &self.graph
    }

    /// Reconciles the text index, link graph, and title/path registry
    /// (plus vector index, if enabled) from the note set found on storage.
    /// Recovers from any partial failure in create/edit/delete.
    pub async fn rebuild(&self, cancel: &CancelToken) -> Result<(), error::Error> {
        let notes = self.load_all_notes(cancel).await?;

        {
            let mut reg = self.registry.write().expect("registry lock poisoned");
            reg.by_title.clear();
            reg.by_path.clear();
            for note in &notes {
                reg.by_title.insert(note.title.clone(), note.id);
                reg.by_path.insert(note.filepath.clone(), note.id);
            }
        }

        let graph_input: Vec<(Identifier, String, String)> = notes
            .iter()
            .map(|n| (n.id, n.title.clone(), n.content.clone()))
            .collect();
        {
            let reg = self.registry.read().expect("registry lock poisoned");
            let resolver = RegistryResolver { registry: &reg };
            self.graph.rebuild(&graph_input, &resolver)?;
        }

        for note in &notes {
            cancel.check()?;
            let tags = {
                let reg = self.registry.read().expect("registry lock poisoned");
                self.tags_for(note, &reg)
            };
            self.index.add(Document {
                id: note.id,
                title: note.frontmatter.title.clone(),
                content: note.content.clone(),
                tags,
                note_type: note.frontmatter.note_type.clone(),
            });
        }

        if let Some(engine) = &self.semantic {
            for chunk in notes.chunks(self.options.semantic_batch_size.max(1)) {
                cancel.check()?;
                let contents = chunk
                    .iter()
                    .map(|note| NoteContent {
                        id: note.id,
                        content_hash: Self::note_content_hash(note),
                        text: note.content.clone(),
                        metadata: Self::note_metadata(note),
                    })
                    .collect();
                if let Err(e) = engine.index_notes(contents, cancel).await {
                    tracing::warn!(error = %e, "semantic reindex batch failed during rebuild");
                }
            }
        }

        Ok(())
    }

    /// Enumerates every `.md` file under the vault's notes directory (and
    /// the legacy bare-root/`daily/` locations for backward compatibility
    /// with pre-profile layouts), parsing whatever is well-formed and
    /// logging the rest.
    async fn load_all_notes(&self, cancel: &CancelToken) -> Result<Vec<Note>, error::Error> {
        let mut notes = Vec::new();
        let mut prefixes: Vec<String> = vec![self.options.notes_dir.trim_end_matches('/').to_string()];
        prefixes.extend(REBUILD_PREFIXES.iter().map(|s| s.to_string()));

        for prefix in prefixes {
            cancel.check()?;
            let entries = match self.backend.list(&prefix, cancel).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            for entry in entries {
                if !entry.ends_with(".md") {
                    continue;
                }
                let bytes = match self.backend.get(&entry, cancel).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(path = %entry, error = %e, "skipping unreadable file during vault rebuild");
                        continue;
                    }
                };
                let content = match std::str::from_utf8(&bytes) {
                    Ok(s) => s,
                    Err(_) => {
                        tracing::warn!(path = %entry, "skipping non-utf8 file during vault rebuild");
                        continue;
                    }
                };
                match Note::parse(&entry, content) {
                    Ok(note) => notes.push(note),
                    Err(e) => {
                        tracing::warn!(path = %entry, error = %e, "skipping unparseable note during vault rebuild");
                    }
                }
            }
        }
        Ok(notes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::LocalBackend;

    fn vault(dir: &Path) -> Vault {
        let backend: Arc<dyn StorageBackend> = Arc::new(LocalBackend::new(dir.to_path_buf()).unwrap());
        Vault::new(backend, None, VaultOptions::default())
    }

    #[tokio::test]
    async fn create_note_is_immediately_text_searchable() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault(dir.path());
        let cancel = CancelToken::never();
        vault.create_note("Rust Notes", "content about async rust", &cancel).await.unwrap();
        let hits = vault.search_text(&Query::new("async"), &cancel).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn wiki_link_between_created_notes_is_tracked_in_the_graph() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault(dir.path());
        let cancel = CancelToken::never();
        let target = vault.create_note("Target Note", "nothing interesting", &cancel).await.unwrap();
        let source = vault
            .create_note("Source Note", "see [[Target Note]] for more", &cancel)
            .await
            .unwrap();
        assert_eq!(vault.graph().outgoing(source.id).len(), 1);
        assert_eq!(vault.graph().incoming(target.id).len(), 1);
    }

    #[tokio::test]
    async fn delete_note_removes_it_from_text_search_and_graph() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault(dir.path());
        let cancel = CancelToken::never();
        let note = vault.create_note("Ephemeral", "some body text", &cancel).await.unwrap();
        vault.delete_note(note.id, &cancel).await.unwrap();
        let hits = vault.search_text(&Query::new("body"), &cancel).await.unwrap();
        assert!(hits.is_empty());
        assert!(vault.graph().outgoing(note.id).is_empty());
    }

    #[tokio::test]
    async fn edit_note_updates_content_and_reindexes() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault(dir.path());
        let cancel = CancelToken::never();
        let note = vault.create_note("Edited", "original body", &cancel).await.unwrap();
        vault.edit_note(note.id, "replaced body", &cancel).await.unwrap();
        assert!(vault.search_text(&Query::new("original"), &cancel).await.unwrap().is_empty());
        assert_eq!(vault.search_text(&Query::new("replaced"), &cancel).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rebuild_reconstructs_index_and_graph_from_storage_alone() {
        let dir = tempfile::tempdir().unwrap();
        {
            let vault = vault(dir.path());
            let cancel = CancelToken::never();
            let target = vault.create_note("Target", "body one", &cancel).await.unwrap();
            vault.create_note("Source", "see [[Target]]", &cancel).await.unwrap();
            let _ = target;
        }
        // Fresh vault instance, with empty in-memory state, rebuilt purely
        // from what's on storage.
        let fresh = vault(dir.path());
        let cancel = CancelToken::never();
        fresh.rebuild(&cancel).await.unwrap();
        assert_eq!(fresh.search_text(&Query::new("body"), &cancel).await.unwrap().len(), 1);
        let stats = fresh.graph().statistics();
        assert_eq!(stats.total_notes, 2);
        assert_eq!(stats.total_edges, 1);
    }

    #[tokio::test]
    async fn content_hashtags_are_merged_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn StorageBackend> = Arc::new(LocalBackend::new(dir.path().to_path_buf()).unwrap());
        let vault = Vault::new(
            backend,
            None,
            VaultOptions {
                merge_content_hashtags: true,
                ..VaultOptions::default()
            },
        );
        let cancel = CancelToken::never();
        let note = vault.create_note("Tagged", "body with #rust hashtag", &cancel).await.unwrap();
        let hits = vault.search_text(&Query::new("rust"), &cancel).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, note.id);
    }
}
