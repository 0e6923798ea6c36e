//! Hybrid retrieval over short text documents.
//!
//! Provides a persistent document store with a normalized-vector cache,
//! brute-force cosine search over that cache, a BM25 keyword index, and a
//! weighted blend of the two, all orchestrated by [`Retriever`].
//!
//! # Main types
//!
//! - [`DocumentStore`]: Trait for persisting documents and their normalized vectors.
//! - [`FileDocumentStore`]: JSON Lines backed store.
//! - [`InMemoryDocumentStore`]: Volatile store, also the cache behind the file store.
//! - [`Bm25Index`]: BM25 keyword statistics and scoring.
//! - [`VectorSearchEngine`]: Cosine-similarity ranking over a store.
//! - [`HybridScorer`]: Combines a vector score and a keyword score.
//! - [`Embedder`]: Trait for the external embedding model.
//! - [`LocalEmbedding`]: Deterministic hashing embedder for tests and the CLI.
//! - [`Retriever`]: Facade running add/search/update/delete/reset.

/// BM25 keyword index and tokenizer.
pub mod bm25;
/// Embedder trait and local implementation.
pub mod embedding;
/// Score combination for hybrid search.
pub mod hybrid;
/// Facade over embedder, store, and keyword index.
pub mod retriever;
/// Document store trait and implementations.
pub mod store;
/// Cosine-similarity search over cached vectors.
pub mod vector;

pub use bm25::{tokenize, Bm25Index};
pub use embedding::{Embedder, LocalEmbedding};
pub use hybrid::HybridScorer;
pub use retriever::Retriever;
pub use store::{DocumentStore, FileDocumentStore, InMemoryDocumentStore, ScannedDocument};
pub use vector::{normalize, VectorSearchEngine, NORM_EPSILON};
