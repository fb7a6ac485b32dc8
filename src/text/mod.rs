pub mod engine;
pub mod inverted_index;
pub mod tokenize;

pub use engine::{Query, SearchHit, SortBy, TextEngine};
pub use inverted_index::{Document, InvertedIndex};
