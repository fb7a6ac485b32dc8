pub mod cache;
pub mod embedder;
pub mod engine;
pub mod vector;

pub use cache::EmbeddingCache;
pub use embedder::{Embedder, HttpEmbedder};
pub use engine::SemanticEngine;
pub use vector::{InMemoryVectorBackend, NoneVectorBackend, VectorBackend};
