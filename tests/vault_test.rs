//! End-to-end vault tests: note lifecycle, text search, link graph
//! reachability, and hybrid ranking degradation, exercised against a
//! `LocalBackend` over a temp directory.

use std::sync::Arc;

use kbvault::cancel::CancelToken;
use kbvault::hybrid::{SearchMode, Weights};
use kbvault::storage::{LocalBackend, StorageBackend};
use kbvault::text::Query;
use kbvault::vault::{Vault, VaultOptions};

fn vault(root: &std::path::Path) -> Vault {
    let backend: Arc<dyn StorageBackend> = Arc::new(LocalBackend::new(root.to_path_buf()).unwrap());
    Vault::new(backend, None, VaultOptions::default())
}

#[tokio::test]
async fn note_round_trips_through_create_edit_delete() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault(dir.path());
    let cancel = CancelToken::never();

    let note = vault
        .create_note("Project Kickoff", "Initial notes about the project.", &cancel)
        .await
        .unwrap();
    assert_eq!(note.title, "Project Kickoff");

    let edited = vault.edit_note(note.id, "Updated notes after the kickoff call.", &cancel).await.unwrap();
    assert_eq!(edited.content, "Updated notes after the kickoff call.");
    assert!(edited.updated_at >= edited.created_at);

    vault.delete_note(note.id, &cancel).await.unwrap();
    let hits = vault.search_text(&Query::new("kickoff"), &cancel).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn text_search_ranks_title_matches_above_content_only_matches() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault(dir.path());
    let cancel = CancelToken::never();

    vault.create_note("Rust Async Patterns", "notes on futures and tasks", &cancel).await.unwrap();
    vault
        .create_note("Unrelated Title", "a brief mention of rust somewhere in the body", &cancel)
        .await
        .unwrap();

    let hits = vault.search_text(&Query::new("rust"), &cancel).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits[0].score > hits[1].score, "title match should outrank a content-only match");
}

#[tokio::test]
async fn link_graph_tracks_reachability_across_notes() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault(dir.path());
    let cancel = CancelToken::never();

    let a = vault.create_note("A", "start here", &cancel).await.unwrap();
    let b = vault.create_note("B", "see [[A]] and also [[C]]", &cancel).await.unwrap();
    let c = vault.create_note("C", "leaf node, see [[A]]", &cancel).await.unwrap();

    assert_eq!(vault.graph().find_path(b.id, c.id), Some(vec![b.id, c.id]));
    assert_eq!(vault.graph().incoming(a.id).len(), 2);
    assert!(vault.graph().orphans().is_empty());
}

#[tokio::test]
async fn hybrid_search_without_a_semantic_engine_degrades_to_text_only() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault(dir.path());
    let cancel = CancelToken::never();

    vault.create_note("Quarterly Plan", "budget and headcount for next quarter", &cancel).await.unwrap();

    let result = vault
        .search_hybrid("budget", SearchMode::Hybrid, Weights { text: 0.5, vector: 0.5 }, 0.0, 10, &cancel)
        .await
        .unwrap();

    assert!(result.fallback_to_text);
    assert_eq!(result.hits.len(), 1);
}

#[tokio::test]
async fn rebuild_recovers_from_an_index_wiped_between_processes() {
    let dir = tempfile::tempdir().unwrap();
    {
        let vault = vault(dir.path());
        let cancel = CancelToken::never();
        vault.create_note("Persisted", "this note should survive a rebuild", &cancel).await.unwrap();
    }

    let reopened = vault(dir.path());
    let cancel = CancelToken::never();
    reopened.rebuild(&cancel).await.unwrap();

    let hits = reopened.search_text(&Query::new("survive"), &cancel).await.unwrap();
    assert_eq!(hits.len(), 1);
}
