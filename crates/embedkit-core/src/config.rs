use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{EmbedKitError, EmbedKitResult};

/// File name of the JSON Lines record file inside a store directory.
pub const DOCUMENTS_FILE: &str = "documents.jsonl";

/// Which inverse-document-frequency formula the keyword index uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdfVariant {
    /// `ln((N - df + 0.5) / (df + 0.5))`. Negative once a term is in more
    /// than half of the documents, so very common terms pull scores down.
    Classic,
    /// `ln(1 + (N - df + 0.5) / (df + 0.5))`. Never negative.
    #[default]
    Smoothed,
}

/// BM25 parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Config {
    /// Term-frequency saturation.
    #[serde(default = "default_k1")]
    pub k1: f32,
    /// Document-length normalization, in `[0, 1]`.
    #[serde(default = "default_b")]
    pub b: f32,
    /// IDF formula.
    #[serde(default)]
    pub idf: IdfVariant,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
            idf: IdfVariant::default(),
        }
    }
}

/// Configuration of one named store instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store name; also the directory name under `root_dir`.
    #[serde(default = "default_store_name")]
    pub name: String,
    /// Overrides the default root directory (`./data`).
    #[serde(default)]
    pub root_dir: Option<PathBuf>,
    /// Embedding dimension. Taken from the embedder when unset.
    #[serde(default)]
    pub dimension: Option<usize>,
    /// Result count used when a search does not specify one.
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Minimum score used when a search does not specify one.
    #[serde(default)]
    pub default_threshold: Option<f32>,
    /// Weight of the vector score in hybrid search, in `[0, 1]`.
    #[serde(default = "default_hybrid_weight")]
    pub hybrid_weight: f32,
    /// Keyword index parameters.
    #[serde(default)]
    pub bm25: Bm25Config,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: default_store_name(),
            root_dir: None,
            dimension: None,
            default_limit: default_limit(),
            default_threshold: None,
            hybrid_weight: default_hybrid_weight(),
            bm25: Bm25Config::default(),
        }
    }
}

impl StoreConfig {
    /// Creates a default configuration for the named store.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the root directory. Chainable builder method.
    pub fn with_root_dir(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(root_dir.into());
        self
    }

    /// Sets the embedding dimension. Chainable builder method.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    /// Root directory holding every store.
    pub fn root_dir(&self) -> PathBuf {
        self.root_dir.clone().unwrap_or_else(default_root_dir)
    }

    /// Path of the record file backing this store.
    pub fn storage_path(&self) -> EmbedKitResult<PathBuf> {
        validate_store_name(&self.name)?;
        Ok(self.root_dir().join(&self.name).join(DOCUMENTS_FILE))
    }

    /// Rejects values the engine cannot work with.
    pub fn validate(&self) -> EmbedKitResult<()> {
        validate_store_name(&self.name)?;
        if self.dimension == Some(0) {
            return Err(EmbedKitError::Config(
                "dimension must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.hybrid_weight) {
            return Err(EmbedKitError::Config(format!(
                "hybrid_weight must be within [0, 1], got {}",
                self.hybrid_weight
            )));
        }
        if !self.bm25.k1.is_finite() || self.bm25.k1 < 0.0 {
            return Err(EmbedKitError::Config(format!(
                "bm25.k1 must be non-negative, got {}",
                self.bm25.k1
            )));
        }
        if !(0.0..=1.0).contains(&self.bm25.b) {
            return Err(EmbedKitError::Config(format!(
                "bm25.b must be within [0, 1], got {}",
                self.bm25.b
            )));
        }
        Ok(())
    }
}

/// Per-call search parameters. Unset fields fall back to [`StoreConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SearchOptions {
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Results scoring strictly below this are dropped.
    pub threshold: Option<f32>,
    /// Vector weight for hybrid search.
    pub weight: Option<f32>,
}

impl SearchOptions {
    /// Options with every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the result limit. Chainable builder method.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the minimum score. Chainable builder method.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Sets the hybrid vector weight. Chainable builder method.
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = Some(weight);
        self
    }
}

fn validate_store_name(name: &str) -> EmbedKitResult<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(EmbedKitError::InvalidInput(
            "store name cannot be empty".to_string(),
        ));
    }
    if trimmed != name || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(EmbedKitError::InvalidInput(format!(
            "store name '{name}' is not a plain directory name"
        )));
    }
    Ok(())
}

fn default_store_name() -> String {
    "default".to_string()
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_limit() -> usize {
    10
}

fn default_hybrid_weight() -> f32 {
    0.5
}

fn default_k1() -> f32 {
    1.2
}

fn default_b() -> f32 {
    0.75
}
