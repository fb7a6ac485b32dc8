//! # kbvault
//!
//! A personal/team knowledge-management engine built around a pluggable
//! text/semantic/hybrid retrieval core over a storage-abstracted corpus of
//! markdown notes, with bidirectional link-graph analysis.
//!
//! ## Layout
//!
//! - [`id`] — time-ordered identifiers
//! - [`note`] — frontmatter parsing and serialization
//! - [`link`] / [`graph`] — link extraction and the bidirectional link graph
//! - [`text`] — the inverted index and text search engine
//! - [`semantic`] — embedding, vector storage, and the semantic search engine
//! - [`hybrid`] — the text/semantic score blender
//! - [`storage`] — the storage backend abstraction (local filesystem, S3)
//! - [`config`] — profile configuration
//! - [`vault`] — note lifecycle operations tying the above together
//!
//! ## Quick Start
//!
//! ```no_run
//! use kbvault::cancel::CancelToken;
//! use kbvault::storage::LocalBackend;
//! use kbvault::vault::{Vault, VaultOptions};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), kbvault::error::Error> {
//! let backend = Arc::new(LocalBackend::new("/tmp/my-vault")?);
//! let vault = Vault::new(backend, None, VaultOptions::default());
//! let cancel = CancelToken::never();
//! let note = vault.create_note("First Note", "hello, vault", &cancel).await?;
//! println!("created {}", note.id);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod graph;
pub mod hybrid;
pub mod id;
pub mod link;
pub mod note;
pub mod semantic;
pub mod storage;
pub mod text;
pub mod vault;

pub use cancel::CancelToken;
pub use error::{Error, ErrorKind};
pub use graph::LinkGraph;
pub use hybrid::{HybridRanker, SearchMode, Weights};
pub use id::Identifier;
pub use note::Note;
pub use vault::Vault;
