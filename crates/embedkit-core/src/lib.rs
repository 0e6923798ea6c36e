//! Core types and error definitions for EmbedKit.
//!
//! This crate provides the foundational types shared across the EmbedKit
//! crates: the unified error type, the persisted document record, search
//! results, and store configuration.
//!
//! # Main types
//!
//! - [`EmbedKitError`]: Unified error enum for every EmbedKit operation.
//! - [`ErrorKind`]: Coarse classification callers branch on.
//! - [`EmbedKitResult`]: Convenience alias for `Result<T, EmbedKitError>`.
//! - [`Document`]: A stored text with its embedding.
//! - [`SearchResult`]: A ranked hit returned by any search path.
//! - [`config::StoreConfig`]: Per-store configuration with documented defaults.

/// Store configuration and search options.
pub mod config;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use config::{Bm25Config, IdfVariant, SearchOptions, StoreConfig};

// --- Error types ---

/// Boxed error used to carry the original cause of an embedder failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for EmbedKit.
#[derive(Debug, thiserror::Error)]
pub enum EmbedKitError {
    /// The caller supplied something the store cannot accept.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The operation targeted a document id that is not in the store.
    #[error("Document not found: {0}")]
    NotFound(Uuid),

    /// The storage medium is unavailable, unwritable, or corrupted.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The embedder could not produce vectors.
    #[error("Embedding error: {0}")]
    Embedding(#[source] BoxError),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),
}

/// Coarse classification of an [`EmbedKitError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Mismatched counts, malformed identifiers, bad vectors.
    InvalidInput,
    /// The target id does not exist.
    NotFound,
    /// Storage unavailable or corrupted. Needs external remediation.
    IoFailure,
    /// The embedder failed. Needs external remediation.
    EmbeddingFailure,
    /// Configuration rejected before any work was done.
    Config,
}

impl EmbedKitError {
    /// Wraps an embedder-side failure, keeping it as the error source.
    pub fn embedding(cause: impl Into<BoxError>) -> Self {
        Self::Embedding(cause.into())
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Storage(_) | Self::Io(_) | Self::Json(_) => ErrorKind::IoFailure,
            Self::Embedding(_) => ErrorKind::EmbeddingFailure,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

/// A convenience `Result` alias using [`EmbedKitError`].
pub type EmbedKitResult<T> = Result<T, EmbedKitError>;

/// Parses a document id from its string form.
pub fn parse_document_id(raw: &str) -> EmbedKitResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|e| EmbedKitError::InvalidInput(format!("malformed document id '{raw}': {e}")))
}

// --- Document types ---

/// A single document persisted in a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier within the store.
    pub id: Uuid,
    /// The document text.
    pub text: String,
    /// Raw embedding as produced by the embedder.
    pub embedding: Vec<f32>,
    /// Set once when the document is first created.
    pub created_at: DateTime<Utc>,
    /// Set every time the text is replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Creates a document with a freshly generated id.
    pub fn new(text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self::with_id(Uuid::new_v4(), text, embedding)
    }

    /// Creates a document with a caller-supplied id.
    pub fn with_id(id: Uuid, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id,
            text: text.into(),
            embedding,
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

/// A ranked hit. Produced by searches, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Id of the matching document.
    pub id: Uuid,
    /// Text of the matching document.
    pub text: String,
    /// Relevance; larger is better. Scale depends on the search path.
    pub score: f32,
    /// Creation time of the matching document.
    pub created_at: DateTime<Utc>,
}

impl SearchResult {
    /// Builds a result from a document and its score.
    pub fn from_document(document: &Document, score: f32) -> Self {
        Self {
            id: document.id,
            text: document.text.clone(),
            score,
            created_at: document.created_at,
        }
    }
}
