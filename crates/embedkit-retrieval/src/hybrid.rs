/// Raw BM25 scores are divided by this before clamping to `[0, 1]`.
pub const KEYWORD_SCALE: f32 = 10.0;

/// Blends a cosine similarity with a BM25 score.
///
/// ```text
/// score = w * vector + (1 - w) * clamp(keyword / 10, 0, 1)
/// ```
///
/// - `weight = 1.0`: pure vector
/// - `weight = 0.0`: pure keyword
/// - `weight = 0.5`: equal blend (default)
///
/// The keyword scale is a fixed heuristic and is not calibrated per corpus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridScorer {
    weight: f32,
}

impl HybridScorer {
    /// Create a scorer; `weight` is clamped to `[0, 1]`.
    pub fn new(weight: f32) -> Self {
        Self::default().with_weight(weight)
    }

    /// Set the vector weight. Chainable builder method.
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = if weight.is_nan() {
            0.5
        } else {
            weight.clamp(0.0, 1.0)
        };
        self
    }

    /// The vector weight in use.
    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// Combine one vector score and one raw keyword score.
    pub fn combine(&self, vector_score: f32, keyword_score: f32) -> f32 {
        let keyword = (keyword_score / KEYWORD_SCALE).clamp(0.0, 1.0);
        self.weight * vector_score + (1.0 - self.weight) * keyword
    }
}

impl Default for HybridScorer {
    fn default() -> Self {
        Self { weight: 0.5 }
    }
}
