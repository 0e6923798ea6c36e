use std::collections::BTreeMap;

use async_trait::async_trait;
use embedkit_core::{EmbedKitError, EmbedKitResult};

use crate::bm25::tokenize;
use crate::vector::normalize;

/// Turns text into fixed-length vectors.
///
/// Failures are [`EmbedKitError::Embedding`] with the underlying cause kept
/// as the error source, so callers can tell a broken model from bad input.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text.
    async fn embed(&self, text: &str) -> EmbedKitResult<Vec<f32>>;

    /// Embed several texts, returning one vector per text in input order.
    ///
    /// The default embeds one text at a time and stops at the first failure.
    /// Backends with a native batch call should override it.
    async fn embed_batch(&self, texts: &[&str]) -> EmbedKitResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Length of every vector this embedder returns.
    fn dimension(&self) -> usize;
}

/// Weight of an adjacent token pair relative to a single occurrence of a token.
const BIGRAM_WEIGHT: f32 = 0.5;

/// Offline embedder based on signed feature hashing.
///
/// Every token and every adjacent token pair is hashed to one component and
/// added with a hash-derived sign, so unrelated features tend to cancel
/// instead of piling up. Token counts are damped as `1 + ln(tf)`. Tokens are
/// produced by the keyword tokenizer, so case and accents do not matter.
///
/// Text with no tokens at all (empty, blank or punctuation only) is an
/// embedding failure.
pub struct LocalEmbedding {
    dimension: usize,
}

impl LocalEmbedding {
    /// Embedder producing `dimension`-component vectors. Zero is raised to one.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Add `weight` to the component `key` hashes to, with the hash's sign.
    fn accumulate(&self, vector: &mut [f32], key: &[&str], weight: f32) {
        let hash = fnv1a64(key);
        let slot = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[slot] += sign * weight;
    }
}

impl Default for LocalEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for LocalEmbedding {
    async fn embed(&self, text: &str) -> EmbedKitResult<Vec<f32>> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Err(EmbedKitError::embedding("text has no indexable tokens"));
        }

        let mut unigrams: BTreeMap<&str, u32> = BTreeMap::new();
        for token in &tokens {
            *unigrams.entry(token.as_str()).or_default() += 1;
        }
        let mut bigrams: BTreeMap<(&str, &str), u32> = BTreeMap::new();
        for pair in tokens.windows(2) {
            *bigrams
                .entry((pair[0].as_str(), pair[1].as_str()))
                .or_default() += 1;
        }

        let mut vector = vec![0.0f32; self.dimension];
        for (token, tf) in unigrams {
            self.accumulate(&mut vector, &[token], 1.0 + (tf as f32).ln());
        }
        for ((first, second), tf) in bigrams {
            self.accumulate(&mut vector, &[first, second], BIGRAM_WEIGHT * tf as f32);
        }

        Ok(normalize(&vector))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// 64-bit FNV-1a over `parts`, with a separator byte between parts.
fn fnv1a64(parts: &[&str]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hash ^= 0xff;
            hash = hash.wrapping_mul(PRIME);
        }
        for &byte in part.as_bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(PRIME);
        }
    }
    hash
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::vector::dot;
    use embedkit_core::ErrorKind;

    #[tokio::test]
    async fn test_vectors_have_the_configured_length() {
        for dimension in [1, 7, 384] {
            let embedder = LocalEmbedding::new(dimension);
            assert_eq!(embedder.dimension(), dimension);
            assert_eq!(embedder.embed("tidal pools").await.unwrap().len(), dimension);
        }
        assert_eq!(LocalEmbedding::new(0).dimension(), 1);
        assert_eq!(LocalEmbedding::default().dimension(), 256);
    }

    #[tokio::test]
    async fn test_text_without_tokens_is_an_embedding_failure() {
        let embedder = LocalEmbedding::new(16);
        for text in ["", "   \n\t", "?!", "-- ... --"] {
            let err = embedder.embed(text).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::EmbeddingFailure, "input {text:?}");
        }
    }

    #[tokio::test]
    async fn test_vectors_are_unit_length() {
        let embedder = LocalEmbedding::new(32);
        let v = embedder
            .embed("the the the quick quick fox, the fox")
            .await
            .unwrap();
        let norm = dot(&v, &v).sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm {norm}");
    }

    #[tokio::test]
    async fn test_case_and_accents_are_folded() {
        let embedder = LocalEmbedding::new(64);
        assert_eq!(
            embedder.embed("Café Crème").await.unwrap(),
            embedder.embed("cafe creme").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_word_order_matters_through_pairs() {
        let embedder = LocalEmbedding::new(512);
        let forward = embedder.embed("dog bites man").await.unwrap();
        let reversed = embedder.embed("man bites dog").await.unwrap();
        assert_ne!(forward, reversed);
        assert!(dot(&forward, &reversed) > 0.5, "same words, different pairs");
    }

    #[tokio::test]
    async fn test_shared_vocabulary_scores_higher_than_disjoint() {
        let embedder = LocalEmbedding::default();
        let query = embedder.embed("ocean tide charts").await.unwrap();
        let related = embedder.embed("tide charts for the ocean coast").await.unwrap();
        let unrelated = embedder.embed("sourdough starter feeding").await.unwrap();

        let near = dot(&query, &related);
        let far = dot(&query, &unrelated);
        assert!(near > far, "related {near} vs unrelated {far}");
        assert!(near > 0.4);
    }

    #[tokio::test]
    async fn test_separate_instances_agree() {
        let a = LocalEmbedding::new(96);
        let b = LocalEmbedding::new(96);
        assert_eq!(
            a.embed("reproducible output").await.unwrap(),
            b.embed("reproducible output").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_batch_keeps_input_order() {
        let embedder = LocalEmbedding::new(48);
        let texts = ["granite quarry", "basalt columns cool slowly", "granite quarry"];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), texts.len());
        for (text, vector) in texts.iter().zip(&batch) {
            assert_eq!(vector, &embedder.embed(text).await.unwrap());
        }
        assert_eq!(batch[0], batch[2]);
    }

    #[tokio::test]
    async fn test_batch_fails_as_a_whole() {
        let embedder = LocalEmbedding::new(8);
        let err = embedder.embed_batch(&["fine", "!!!", "also fine"]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmbeddingFailure);
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_pair_hash_differs_from_joined_token() {
        assert_ne!(fnv1a64(&["ab", "c"]), fnv1a64(&["abc"]));
        assert_ne!(fnv1a64(&["ab", "c"]), fnv1a64(&["a", "bc"]));
    }
}
