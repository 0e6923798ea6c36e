use std::sync::Arc;

use embedkit_core::{Document, EmbedKitError, EmbedKitResult, SearchResult};
use tracing::debug;

use crate::store::DocumentStore;

/// Guard added to the L2 norm so zero vectors normalize to zero vectors.
pub const NORM_EPSILON: f32 = 1e-9;

/// Scale a vector to unit length: `v / (||v|| + ε)`.
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm + NORM_EPSILON;
    vector.iter().map(|x| x / denom).collect()
}

/// Dot product of two equally sized vectors.
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Rejects empty vectors, wrong dimensions, and non-finite components.
pub(crate) fn check_vector(vector: &[f32], dimension: usize) -> EmbedKitResult<()> {
    if vector.is_empty() {
        return Err(EmbedKitError::InvalidInput("empty vector".to_string()));
    }
    if vector.len() != dimension {
        return Err(EmbedKitError::InvalidInput(format!(
            "vector has dimension {}, store expects {dimension}",
            vector.len()
        )));
    }
    if let Some(pos) = vector.iter().position(|x| !x.is_finite()) {
        return Err(EmbedKitError::InvalidInput(format!(
            "vector component {pos} is not finite"
        )));
    }
    Ok(())
}

/// Sort by score descending, ties by ascending id.
pub(crate) fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
}

/// Brute-force cosine-similarity search over a store's normalized vectors.
///
/// Every query is a linear scan, `O(n·D)`. Both sides are unit vectors, so
/// the dot product is the cosine similarity.
pub struct VectorSearchEngine {
    store: Arc<dyn DocumentStore>,
}

impl VectorSearchEngine {
    /// Create an engine reading from `store`.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Return up to `limit` documents most similar to `query`.
    ///
    /// Results scoring strictly below `threshold` are dropped. Equal scores
    /// are ordered by ascending document id.
    pub async fn search(
        &self,
        query: &[f32],
        limit: usize,
        threshold: Option<f32>,
    ) -> EmbedKitResult<Vec<SearchResult>> {
        let scored = self.score_all(query).await?;
        let candidates = scored.len();

        let mut hits: Vec<(Arc<Document>, f32)> = scored
            .into_iter()
            .filter(|(_, score)| threshold.map_or(true, |t| *score >= t))
            .collect();
        hits.sort_by(|(a, x), (b, y)| y.total_cmp(x).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit);

        let results: Vec<SearchResult> = hits
            .iter()
            .map(|(document, score)| SearchResult::from_document(document, *score))
            .collect();

        debug!(candidates, returned = results.len(), ?threshold, "vector search");
        Ok(results)
    }

    /// Cosine similarity of `query` against every stored document, unordered.
    ///
    /// Documents are shared with the store, not copied.
    pub async fn score_all(&self, query: &[f32]) -> EmbedKitResult<Vec<(Arc<Document>, f32)>> {
        check_vector(query, self.store.dimension())?;
        let query = normalize(query);

        let snapshot = self.store.scan().await?;
        Ok(snapshot
            .into_iter()
            .map(|entry| {
                let score = dot(&query, &entry.normalized);
                (entry.document, score)
            })
            .collect())
    }
}
