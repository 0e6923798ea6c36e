use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use embedkit_core::{
    Document, EmbedKitError, EmbedKitResult, SearchOptions, SearchResult, StoreConfig,
};
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bm25::Bm25Index;
use crate::embedding::Embedder;
use crate::hybrid::HybridScorer;
use crate::store::{DocumentStore, FileDocumentStore};
use crate::vector::{check_vector, sort_results, VectorSearchEngine};

/// Entry point for adding, searching and maintaining one store instance.
///
/// Keeps three things coherent across every mutation: the persisted
/// documents, their normalized vectors and the BM25 statistics. Mutations
/// embed first, then hold the keyword index write guard across the store
/// write and the index update. Searches hold the read guard.
///
/// A mutation dropped between its store write and its index update leaves
/// the index marked stale. The next search or mutation rebuilds it from the
/// store.
pub struct Retriever {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    vectors: VectorSearchEngine,
    keywords: RwLock<Bm25Index>,
    index_stale: AtomicBool,
    config: StoreConfig,
}

impl Retriever {
    /// Open the file-backed store described by `config`.
    pub async fn open(config: StoreConfig, embedder: Arc<dyn Embedder>) -> EmbedKitResult<Self> {
        config.validate()?;
        let dimension = resolve_dimension(&config, embedder.as_ref())?;
        let store = FileDocumentStore::new(config.storage_path()?, dimension);
        Self::with_store(Arc::new(store), embedder, config).await
    }

    /// Build a retriever over an existing store.
    ///
    /// Prepares and loads the store, then rebuilds the keyword index from
    /// the stored documents.
    pub async fn with_store(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        config: StoreConfig,
    ) -> EmbedKitResult<Self> {
        config.validate()?;
        let dimension = resolve_dimension(&config, embedder.as_ref())?;
        if store.dimension() != dimension {
            warn!(
                store = %config.name,
                store_dimension = store.dimension(),
                dimension,
                "Rejected store with mismatched dimension"
            );
            return Err(EmbedKitError::Config(format!(
                "store '{}' holds {}-dimensional vectors, embedder produces {dimension}",
                config.name,
                store.dimension()
            )));
        }

        store.create_if_needed().await?;
        store.load().await?;

        let mut index = Bm25Index::with_params(config.bm25);
        fill_index(&mut index, store.as_ref()).await?;

        info!(
            store = %config.name,
            dimension,
            documents = index.document_count(),
            "Opened retriever"
        );

        Ok(Self {
            vectors: VectorSearchEngine::new(Arc::clone(&store)),
            store,
            embedder,
            keywords: RwLock::new(index),
            index_stale: AtomicBool::new(false),
            config,
        })
    }

    /// Configuration this retriever was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Embedding dimension of the store.
    pub fn dimension(&self) -> usize {
        self.store.dimension()
    }

    /// Add a batch of texts, returning their ids in input order.
    ///
    /// When `ids` is given it must have one id per text. The batch is
    /// embedded in one call and persisted as one unit: either every document
    /// is stored and indexed or none is.
    pub async fn add_documents(
        &self,
        texts: &[&str],
        ids: Option<&[Uuid]>,
    ) -> EmbedKitResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = match ids {
            Some(ids) if ids.len() != texts.len() => {
                return Err(EmbedKitError::InvalidInput(format!(
                    "got {} ids for {} texts",
                    ids.len(),
                    texts.len()
                )))
            }
            Some(ids) => ids.to_vec(),
            None => texts.iter().map(|_| Uuid::new_v4()).collect(),
        };

        let mut seen = HashSet::with_capacity(ids.len());
        if let Some(dup) = ids.iter().find(|id| !seen.insert(**id)) {
            return Err(EmbedKitError::InvalidInput(format!(
                "document {dup} appears twice in the batch"
            )));
        }

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.embed_checked(texts).await?;
        let documents: Vec<Document> = ids
            .iter()
            .zip(texts)
            .zip(embeddings)
            .map(|((id, text), embedding)| Document::with_id(*id, *text, embedding))
            .collect();

        let mut index = self.keywords.write().await;
        let was_stale = self.begin_mutation();
        self.finish_mutation(
            &mut index,
            was_stale,
            self.store.save_all(documents).await,
        )
        .await?;
        if !was_stale {
            for (id, text) in ids.iter().zip(texts) {
                index.add_document(*id, text);
            }
        }

        debug!(count = ids.len(), total = index.document_count(), "Added documents");
        Ok(ids)
    }

    /// Add a single text.
    pub async fn add_document(&self, text: &str) -> EmbedKitResult<Uuid> {
        let ids = self.add_documents(&[text], None).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| EmbedKitError::Storage("document was not stored".to_string()))
    }

    /// Embed `query` and run a vector search.
    pub async fn search_text(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> EmbedKitResult<Vec<SearchResult>> {
        let embedding = self.embed_query(query).await?;
        self.search_vector(&embedding, options).await
    }

    /// Cosine-similarity search with a caller-supplied vector.
    pub async fn search_vector(
        &self,
        vector: &[f32],
        options: SearchOptions,
    ) -> EmbedKitResult<Vec<SearchResult>> {
        let _index = self.index_read().await?;
        self.vectors
            .search(vector, self.limit(&options), self.threshold(&options))
            .await
    }

    /// BM25 search. Only documents with a positive score are returned.
    pub async fn search_keyword(
        &self,
        query: &str,
        limit: Option<usize>,
    ) -> EmbedKitResult<Vec<SearchResult>> {
        let limit = limit.unwrap_or(self.config.default_limit);
        let index = self.index_read().await?;
        let hits = index.search(query, limit);

        let mut results = Vec::with_capacity(hits.len());
        for (id, score) in hits {
            if let Some(document) = self.store.get(id).await? {
                results.push(SearchResult::from_document(&document, score));
            }
        }

        debug!(query, returned = results.len(), "keyword search");
        Ok(results)
    }

    /// Blend vector similarity and BM25 for every document.
    ///
    /// Scores follow [`HybridScorer::combine`] with the weight from
    /// `options`, falling back to the configured hybrid weight. Threshold,
    /// limit and ordering behave as in vector search.
    pub async fn search_hybrid(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> EmbedKitResult<Vec<SearchResult>> {
        let embedding = self.embed_query(query).await?;
        let scorer = HybridScorer::new(options.weight.unwrap_or(self.config.hybrid_weight));
        let threshold = self.threshold(&options);

        let index = self.index_read().await?;
        let keyword_scores = index.score_all(query);
        let mut results: Vec<SearchResult> = self
            .vectors
            .score_all(&embedding)
            .await?
            .into_iter()
            .map(|(document, similarity)| {
                let keyword = keyword_scores.get(&document.id).copied().unwrap_or(0.0);
                SearchResult::from_document(&document, scorer.combine(similarity, keyword))
            })
            .filter(|r| threshold.map_or(true, |t| r.score >= t))
            .collect();
        drop(index);

        sort_results(&mut results);
        results.truncate(self.limit(&options));

        debug!(
            query,
            weight = scorer.weight(),
            returned = results.len(),
            "hybrid search"
        );
        Ok(results)
    }

    /// Replace the text of an existing document, re-embedding it.
    pub async fn update_document(&self, id: Uuid, new_text: &str) -> EmbedKitResult<Document> {
        if self.store.get(id).await?.is_none() {
            return Err(EmbedKitError::NotFound(id));
        }
        let embedding = self.embed_query(new_text).await?;

        let mut index = self.keywords.write().await;
        let was_stale = self.begin_mutation();
        let updated = self
            .finish_mutation(
                &mut index,
                was_stale,
                self.store
                    .update(Document::with_id(id, new_text, embedding))
                    .await,
            )
            .await?;
        if !was_stale {
            index.add_document(id, &updated.text);
        }

        debug!(%id, "Updated document");
        Ok(updated)
    }

    /// Delete documents by id. Nothing is deleted if any id is absent.
    pub async fn delete_documents(&self, ids: &[Uuid]) -> EmbedKitResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut index = self.keywords.write().await;
        let was_stale = self.begin_mutation();
        self.finish_mutation(&mut index, was_stale, self.store.delete_many(ids).await)
            .await?;
        if !was_stale {
            for id in ids {
                index.remove_document(*id);
            }
        }

        debug!(count = ids.len(), remaining = index.document_count(), "Deleted documents");
        Ok(())
    }

    /// Delete every document. Irreversible.
    pub async fn reset(&self) -> EmbedKitResult<()> {
        let mut index = self.keywords.write().await;
        let was_stale = self.begin_mutation();
        if let Err(e) = self.store.reset().await {
            self.index_stale.store(was_stale, Ordering::Release);
            return Err(e);
        }
        index.clear();
        self.index_stale.store(false, Ordering::Release);

        info!(store = %self.config.name, "Reset store");
        Ok(())
    }

    /// Fetch one document.
    pub async fn get_document(&self, id: Uuid) -> EmbedKitResult<Option<Document>> {
        self.store.get(id).await
    }

    /// Every stored document.
    pub async fn list_documents(&self) -> EmbedKitResult<Vec<Document>> {
        self.store.get_all_documents().await
    }

    /// Number of stored documents.
    pub async fn count(&self) -> EmbedKitResult<usize> {
        self.store.count().await
    }

    /// Embed texts without storing anything.
    pub async fn embed(&self, texts: &[&str]) -> EmbedKitResult<Vec<Vec<f32>>> {
        self.embedder.embed_batch(texts).await
    }

    /// Mark the index stale for the span of a store write. Returns whether
    /// it already was.
    fn begin_mutation(&self) -> bool {
        self.index_stale.swap(true, Ordering::AcqRel)
    }

    /// Settle the stale flag after the store write returned `outcome`.
    ///
    /// A stale index is rebuilt from the store, in which case the caller
    /// skips its own index update.
    async fn finish_mutation<T>(
        &self,
        index: &mut Bm25Index,
        was_stale: bool,
        outcome: EmbedKitResult<T>,
    ) -> EmbedKitResult<T> {
        let value = match outcome {
            Ok(value) => value,
            Err(e) => {
                self.index_stale.store(was_stale, Ordering::Release);
                return Err(e);
            }
        };
        if was_stale {
            warn!(store = %self.config.name, "Rebuilding keyword index after an interrupted write");
            fill_index(index, self.store.as_ref()).await?;
        }
        self.index_stale.store(false, Ordering::Release);
        Ok(value)
    }

    /// Read guard on an index that matches the store.
    async fn index_read(&self) -> EmbedKitResult<RwLockReadGuard<'_, Bm25Index>> {
        if self.index_stale.load(Ordering::Acquire) {
            let mut index = self.keywords.write().await;
            if self.index_stale.load(Ordering::Acquire) {
                warn!(store = %self.config.name, "Rebuilding keyword index after an interrupted write");
                fill_index(&mut index, self.store.as_ref()).await?;
                self.index_stale.store(false, Ordering::Release);
            }
        }
        Ok(self.keywords.read().await)
    }

    fn limit(&self, options: &SearchOptions) -> usize {
        options.limit.unwrap_or(self.config.default_limit)
    }

    fn threshold(&self, options: &SearchOptions) -> Option<f32> {
        options.threshold.or(self.config.default_threshold)
    }

    async fn embed_query(&self, text: &str) -> EmbedKitResult<Vec<f32>> {
        let mut embeddings = self.embed_checked(&[text]).await?;
        embeddings
            .pop()
            .ok_or_else(|| EmbedKitError::embedding("embedder returned no vector"))
    }

    /// Batch embedding with the count and every vector checked.
    async fn embed_checked(&self, texts: &[&str]) -> EmbedKitResult<Vec<Vec<f32>>> {
        let embeddings = self.embedder.embed_batch(texts).await?;
        if embeddings.len() != texts.len() {
            return Err(EmbedKitError::embedding(format!(
                "embedder returned {} vectors for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }
        let dimension = self.store.dimension();
        for embedding in &embeddings {
            check_vector(embedding, dimension).map_err(EmbedKitError::embedding)?;
        }
        Ok(embeddings)
    }
}

/// Replace the contents of `index` with every document in `store`.
async fn fill_index(index: &mut Bm25Index, store: &dyn DocumentStore) -> EmbedKitResult<()> {
    index.clear();
    for document in store.get_all_documents().await? {
        index.add_document(document.id, &document.text);
    }
    Ok(())
}

/// Dimension from the config, else from the embedder. The two must agree.
fn resolve_dimension(config: &StoreConfig, embedder: &dyn Embedder) -> EmbedKitResult<usize> {
    match config.dimension {
        Some(dimension) if dimension != embedder.dimension() => {
            Err(EmbedKitError::Config(format!(
                "configured dimension {dimension} does not match embedder dimension {}",
                embedder.dimension()
            )))
        }
        Some(dimension) => Ok(dimension),
        None => Ok(embedder.dimension()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::embedding::LocalEmbedding;
    use crate::store::InMemoryDocumentStore;
    use async_trait::async_trait;
    use embedkit_core::ErrorKind;

    const DIM: usize = 64;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> EmbedKitResult<Vec<f32>> {
            Err(EmbedKitError::embedding(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "model offline",
            )))
        }

        fn dimension(&self) -> usize {
            DIM
        }
    }

    /// Returns one vector fewer than asked for.
    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        async fn embed(&self, _text: &str) -> EmbedKitResult<Vec<f32>> {
            Ok(vec![1.0; DIM])
        }

        async fn embed_batch(&self, texts: &[&str]) -> EmbedKitResult<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0; DIM]; texts.len().saturating_sub(1)])
        }

        fn dimension(&self) -> usize {
            DIM
        }
    }

    /// Writes through to an in-memory store, then stalls before returning.
    struct StallingStore {
        inner: InMemoryDocumentStore,
        stall: AtomicBool,
    }

    impl StallingStore {
        async fn pause(&self) {
            if self.stall.load(Ordering::Acquire) {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            }
        }
    }

    #[async_trait]
    impl DocumentStore for StallingStore {
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
        async fn create_if_needed(&self) -> EmbedKitResult<()> {
            Ok(())
        }
        async fn load(&self) -> EmbedKitResult<()> {
            Ok(())
        }
        async fn save_all(&self, documents: Vec<Document>) -> EmbedKitResult<()> {
            self.inner.save_all(documents).await?;
            self.pause().await;
            Ok(())
        }
        async fn update(&self, document: Document) -> EmbedKitResult<Document> {
            let updated = self.inner.update(document).await?;
            self.pause().await;
            Ok(updated)
        }
        async fn delete_many(&self, ids: &[Uuid]) -> EmbedKitResult<()> {
            self.inner.delete_many(ids).await?;
            self.pause().await;
            Ok(())
        }
        async fn get(&self, id: Uuid) -> EmbedKitResult<Option<Document>> {
            self.inner.get(id).await
        }
        async fn get_all_documents(&self) -> EmbedKitResult<Vec<Document>> {
            self.inner.get_all_documents().await
        }
        async fn get_normalized_embedding(
            &self,
            id: Uuid,
        ) -> EmbedKitResult<Option<Arc<[f32]>>> {
            self.inner.get_normalized_embedding(id).await
        }
        async fn scan(&self) -> EmbedKitResult<Vec<crate::store::ScannedDocument>> {
            self.inner.scan().await
        }
        async fn count(&self) -> EmbedKitResult<usize> {
            self.inner.count().await
        }
        async fn reset(&self) -> EmbedKitResult<()> {
            self.inner.reset().await
        }
    }

    async fn stalling_retriever() -> (Retriever, Arc<StallingStore>) {
        let store = Arc::new(StallingStore {
            inner: InMemoryDocumentStore::new(DIM),
            stall: AtomicBool::new(false),
        });
        let retriever = Retriever::with_store(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::new(LocalEmbedding::new(DIM)),
            StoreConfig::default(),
        )
        .await
        .unwrap();
        (retriever, store)
    }

    async fn retriever_with(embedder: Arc<dyn Embedder>) -> Retriever {
        let store = Arc::new(InMemoryDocumentStore::new(DIM));
        Retriever::with_store(store, embedder, StoreConfig::default())
            .await
            .unwrap()
    }

    async fn local_retriever() -> Retriever {
        retriever_with(Arc::new(LocalEmbedding::new(DIM))).await
    }

    #[tokio::test]
    async fn test_add_returns_ids_in_order() {
        let retriever = local_retriever().await;
        let given = [Uuid::new_v4(), Uuid::new_v4()];
        let ids = retriever
            .add_documents(&["first text", "second text"], Some(&given))
            .await
            .unwrap();
        assert_eq!(ids, given);
        assert_eq!(retriever.count().await.unwrap(), 2);

        let stored = retriever.get_document(given[1]).await.unwrap().unwrap();
        assert_eq!(stored.text, "second text");
        assert_eq!(stored.embedding.len(), DIM);
    }

    #[tokio::test]
    async fn test_add_validates_ids() {
        let retriever = local_retriever().await;

        let mismatch = retriever
            .add_documents(&["a", "b"], Some(&[Uuid::new_v4()]))
            .await
            .unwrap_err();
        assert_eq!(mismatch.kind(), ErrorKind::InvalidInput);

        let id = Uuid::new_v4();
        let dup = retriever
            .add_documents(&["a", "b"], Some(&[id, id]))
            .await
            .unwrap_err();
        assert_eq!(dup.kind(), ErrorKind::InvalidInput);

        retriever.add_documents(&["a"], Some(&[id])).await.unwrap();
        let existing = retriever
            .add_documents(&["again"], Some(&[id]))
            .await
            .unwrap_err();
        assert_eq!(existing.kind(), ErrorKind::InvalidInput);
        assert_eq!(retriever.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_empty_batch_skips_embedder() {
        let retriever = retriever_with(Arc::new(FailingEmbedder)).await;
        let ids = retriever.add_documents(&[], None).await.unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_failing_embedder_leaves_store_unchanged() {
        let retriever = retriever_with(Arc::new(FailingEmbedder)).await;

        let err = retriever
            .add_documents(&["one", "two"], None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmbeddingFailure);
        let source = std::error::Error::source(&err).expect("cause is kept");
        let io = source.downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(io.kind(), std::io::ErrorKind::ConnectionRefused);

        assert_eq!(retriever.count().await.unwrap(), 0);
        assert_eq!(retriever.keywords.read().await.document_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_vector_count_is_embedding_failure() {
        let retriever = retriever_with(Arc::new(ShortEmbedder)).await;
        let err = retriever.add_documents(&["a", "b"], None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmbeddingFailure);
        assert_eq!(retriever.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_config_error() {
        let store = Arc::new(InMemoryDocumentStore::new(8));
        let result = Retriever::with_store(
            store,
            Arc::new(LocalEmbedding::new(DIM)),
            StoreConfig::default(),
        )
        .await;
        assert_eq!(result.err().unwrap().kind(), ErrorKind::Config);

        let store = Arc::new(InMemoryDocumentStore::new(DIM));
        let result = Retriever::with_store(
            store,
            Arc::new(LocalEmbedding::new(DIM)),
            StoreConfig::default().with_dimension(DIM + 1),
        )
        .await;
        assert_eq!(result.err().unwrap().kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_search_text_finds_matching_document() {
        let retriever = local_retriever().await;
        let ids = retriever
            .add_documents(
                &["rust borrow checker", "chocolate cake recipe"],
                None,
            )
            .await
            .unwrap();

        let results = retriever
            .search_text("rust borrow checker", SearchOptions::new().with_limit(1))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, ids[0]);
        assert!((results[0].score - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_config_defaults_apply_to_searches() {
        let store = Arc::new(InMemoryDocumentStore::new(DIM));
        let config = StoreConfig {
            default_limit: 2,
            ..StoreConfig::default()
        };
        let retriever = Retriever::with_store(store, Arc::new(LocalEmbedding::new(DIM)), config)
            .await
            .unwrap();
        retriever
            .add_documents(&["red fox", "red wine", "red car", "red door"], None)
            .await
            .unwrap();

        let results = retriever.search_text("red", SearchOptions::new()).await.unwrap();
        assert_eq!(results.len(), 2);
        let keyword = retriever.search_keyword("red", None).await.unwrap();
        assert_eq!(keyword.len(), 2);
    }

    #[tokio::test]
    async fn test_update_moves_keyword_hits() {
        let retriever = local_retriever().await;
        let id = retriever.add_document("the old harbor").await.unwrap();
        let before = retriever.get_document(id).await.unwrap().unwrap();

        let updated = retriever
            .update_document(id, "a new lighthouse")
            .await
            .unwrap();
        assert_eq!(updated.created_at, before.created_at);
        assert!(updated.updated_at.is_some());
        assert_ne!(updated.embedding, before.embedding);

        assert!(retriever.search_keyword("harbor", None).await.unwrap().is_empty());
        let hits = retriever.search_keyword("lighthouse", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);
        assert_eq!(hits[0].text, "a new lighthouse");
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let retriever = retriever_with(Arc::new(FailingEmbedder)).await;
        let err = retriever
            .update_document(Uuid::new_v4(), "anything")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "checked before embedding");
    }

    #[tokio::test]
    async fn test_delete_retracts_keywords() {
        let retriever = local_retriever().await;
        let ids = retriever
            .add_documents(&["solar panels", "solar wind"], None)
            .await
            .unwrap();

        retriever.delete_documents(&ids[..1]).await.unwrap();
        let hits = retriever.search_keyword("solar", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, ids[1]);
        assert_eq!(retriever.keywords.read().await.document_frequency("panels"), 0);

        let err = retriever
            .delete_documents(&[ids[1], Uuid::new_v4()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(retriever.count().await.unwrap(), 1);
        assert_eq!(retriever.search_keyword("wind", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let retriever = local_retriever().await;
        retriever
            .add_documents(&["alpha", "beta"], None)
            .await
            .unwrap();
        retriever.reset().await.unwrap();

        assert_eq!(retriever.count().await.unwrap(), 0);
        assert!(retriever.search_keyword("alpha", None).await.unwrap().is_empty());
        assert_eq!(retriever.keywords.read().await.average_document_length(), 0.0);
    }

    #[tokio::test]
    async fn test_hybrid_weight_extremes() {
        let retriever = local_retriever().await;
        retriever
            .add_documents(&["quantum computing basics", "gardening tips"], None)
            .await
            .unwrap();

        let vector = retriever
            .search_text("quantum computing", SearchOptions::new())
            .await
            .unwrap();
        let hybrid = retriever
            .search_hybrid("quantum computing", SearchOptions::new().with_weight(1.0))
            .await
            .unwrap();
        assert_eq!(vector.len(), hybrid.len());
        for (v, h) in vector.iter().zip(&hybrid) {
            assert_eq!(v.id, h.id);
            assert!((v.score - h.score).abs() < 1e-6);
        }

        let keyword_only = retriever
            .search_hybrid("quantum computing", SearchOptions::new().with_weight(0.0))
            .await
            .unwrap();
        assert_eq!(keyword_only[0].text, "quantum computing basics");
        assert!(keyword_only[0].score > 0.0);
        assert_eq!(keyword_only[1].score, 0.0, "no shared terms");
    }

    #[tokio::test]
    async fn test_embed_does_not_persist() {
        let retriever = local_retriever().await;
        let vectors = retriever.embed(&["one", "two"]).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|v| v.len() == DIM));
        assert_eq!(retriever.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_add_is_indexed_on_next_search() {
        let (retriever, store) = stalling_retriever().await;
        retriever.add_document("steady lantern").await.unwrap();

        store.stall.store(true, Ordering::Release);
        let attempt = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            retriever.add_document("drifting lantern"),
        )
        .await;
        assert!(attempt.is_err());
        store.stall.store(false, Ordering::Release);

        // The store kept the write; the keyword index catches up.
        assert_eq!(retriever.count().await.unwrap(), 2);
        let hits = retriever.search_keyword("lantern", None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(retriever.keywords.read().await.document_count(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_delete_is_retracted_on_next_mutation() {
        let (retriever, store) = stalling_retriever().await;
        let ids = retriever
            .add_documents(&["copper kettle", "copper wire"], None)
            .await
            .unwrap();

        store.stall.store(true, Ordering::Release);
        let attempt = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            retriever.delete_documents(&ids[..1]),
        )
        .await;
        assert!(attempt.is_err());
        store.stall.store(false, Ordering::Release);

        retriever.add_document("copper pan").await.unwrap();
        let index = retriever.keywords.read().await;
        assert_eq!(index.document_count(), 2);
        assert_eq!(index.document_frequency("kettle"), 0);
        assert_eq!(index.document_frequency("pan"), 1);
    }

    #[tokio::test]
    async fn test_failed_store_write_keeps_index_fresh() {
        let retriever = local_retriever().await;
        let id = retriever.add_document("first").await.unwrap();
        let err = retriever
            .add_documents(&["again"], Some(&[id]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(!retriever.index_stale.load(Ordering::Acquire));
    }
}
