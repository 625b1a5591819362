//! Lumen Vector crate - embedding services, vector indexes and the search engine.
//!
//! Provides the `VectorIndex` abstraction with in-memory and SQLite-backed
//! implementations, a CLIP embedding service with a mock for testing, and the
//! search engine that validates parameters and shapes results.

pub mod embedding;
pub mod index;
pub mod search;
pub mod sqlite;

pub use embedding::{DynEmbeddingService, EmbeddingService, MockEmbedding, OnnxClipEmbedding};
pub use index::{cosine_distance, IndexHit, MemoryIndex, VectorIndex};
pub use search::{similarity_score, SearchEngine, SearchParams, SearchResult, MAX_K};
pub use sqlite::SqliteIndex;
