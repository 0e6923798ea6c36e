//! Configuration file loading.
//!
//! The `embedkit.toml` file is optional. Every field has a default, and the
//! global command-line flags take precedence over the file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use embedkit_core::StoreConfig;
use serde::Deserialize;
use tracing::debug;

/// Dimension of the local embedder when neither the file nor a flag sets one.
pub const DEFAULT_DIMENSION: usize = 256;

/// Contents of `embedkit.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub store: StoreConfig,
}

/// Values given on the command line.
#[derive(Debug, Default)]
pub struct Overrides {
    pub store: Option<String>,
    pub root: Option<PathBuf>,
    pub dimension: Option<usize>,
}

impl CliConfig {
    /// Read `path`, falling back to defaults when the file does not exist.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read config file '{}': {e}",
                    path.display()
                ))
            }
        };
        toml::from_str(&raw).with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    /// Merge the flags into the store configuration.
    ///
    /// The returned config always carries a dimension, which is also the
    /// dimension of the local embedder.
    pub fn resolve(self, overrides: Overrides) -> StoreConfig {
        let mut store = self.store;
        if let Some(name) = overrides.store {
            store.name = name;
        }
        if let Some(root) = overrides.root {
            store.root_dir = Some(root);
        }
        let dimension = overrides
            .dimension
            .or(store.dimension)
            .unwrap_or(DEFAULT_DIMENSION);
        store.with_dimension(dimension)
    }
}
