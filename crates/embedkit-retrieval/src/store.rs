use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use embedkit_core::{Document, EmbedKitError, EmbedKitResult};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::vector::{check_vector, normalize};

/// A stored document paired with its cached unit vector.
///
/// Both halves are shared with the store, so a scan copies no vectors.
#[derive(Debug, Clone)]
pub struct ScannedDocument {
    /// The stored document.
    pub document: Arc<Document>,
    /// `document.embedding / (||document.embedding|| + ε)`.
    pub normalized: Arc<[f32]>,
}

/// Trait for document storage backends.
///
/// A store owns the documents of one store instance and the normalized
/// vector cache derived from them. Each method is atomic: readers never see
/// a document without its cache entry. Deleting or updating an absent id is
/// always [`EmbedKitError::NotFound`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Embedding dimension every document must have.
    fn dimension(&self) -> usize;

    /// Prepare the backing medium. Idempotent.
    async fn create_if_needed(&self) -> EmbedKitResult<()>;

    /// Replace the in-memory state with the contents of the medium.
    async fn load(&self) -> EmbedKitResult<()>;

    /// Persist a new document and cache its normalized vector.
    async fn save(&self, document: Document) -> EmbedKitResult<()> {
        self.save_all(vec![document]).await
    }

    /// Persist a batch of new documents as one unit.
    async fn save_all(&self, documents: Vec<Document>) -> EmbedKitResult<()>;

    /// Replace text and embedding of an existing document.
    ///
    /// The stored `created_at` is kept and `updated_at` is set. Returns the
    /// document as stored.
    async fn update(&self, document: Document) -> EmbedKitResult<Document>;

    /// Delete a document and its cache entry.
    async fn delete(&self, id: Uuid) -> EmbedKitResult<()> {
        self.delete_many(&[id]).await
    }

    /// Delete several documents. Fails without deleting anything if any id
    /// is absent.
    async fn delete_many(&self, ids: &[Uuid]) -> EmbedKitResult<()>;

    /// Fetch one document.
    async fn get(&self, id: Uuid) -> EmbedKitResult<Option<Document>>;

    /// Every stored document.
    async fn get_all_documents(&self) -> EmbedKitResult<Vec<Document>>;

    /// Cached unit vector of a document.
    async fn get_normalized_embedding(&self, id: Uuid) -> EmbedKitResult<Option<Arc<[f32]>>>;

    /// Consistent snapshot of every document with its cached vector.
    async fn scan(&self) -> EmbedKitResult<Vec<ScannedDocument>>;

    /// Number of stored documents.
    async fn count(&self) -> EmbedKitResult<usize>;

    /// Delete every document and cache entry.
    async fn reset(&self) -> EmbedKitResult<()>;
}

#[derive(Debug, Default)]
struct StoreState {
    documents: Vec<Arc<Document>>,
    normalized: HashMap<Uuid, Arc<[f32]>>,
}

impl StoreState {
    /// Build a state from `documents`, validating them like a batch save.
    fn from_documents(documents: Vec<Document>, dimension: usize) -> EmbedKitResult<Self> {
        let mut state = Self::default();
        state.check_new(&documents, dimension)?;
        state.insert_all(documents);
        Ok(state)
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.documents.iter().position(|d| d.id == id)
    }

    fn check_new(&self, documents: &[Document], dimension: usize) -> EmbedKitResult<()> {
        let mut batch_ids = HashSet::with_capacity(documents.len());
        for document in documents {
            check_vector(&document.embedding, dimension).map_err(|e| {
                EmbedKitError::InvalidInput(format!("document {}: {e}", document.id))
            })?;
            if !batch_ids.insert(document.id) || self.normalized.contains_key(&document.id) {
                return Err(EmbedKitError::InvalidInput(format!(
                    "document {} already exists",
                    document.id
                )));
            }
        }
        Ok(())
    }

    fn insert_all(&mut self, documents: Vec<Document>) {
        for document in documents {
            let normalized: Arc<[f32]> = normalize(&document.embedding).into();
            self.normalized.insert(document.id, normalized);
            self.documents.push(Arc::new(document));
        }
    }

    fn prepare_update(&self, document: Document, dimension: usize) -> EmbedKitResult<Document> {
        let pos = self
            .position(document.id)
            .ok_or(EmbedKitError::NotFound(document.id))?;
        check_vector(&document.embedding, dimension)?;
        Ok(Document {
            created_at: self.documents[pos].created_at,
            updated_at: Some(Utc::now()),
            ..document
        })
    }

    fn replace(&mut self, document: Document) {
        if let Some(pos) = self.position(document.id) {
            let normalized: Arc<[f32]> = normalize(&document.embedding).into();
            self.normalized.insert(document.id, normalized);
            self.documents[pos] = Arc::new(document);
        }
    }

    fn check_ids(&self, ids: &[Uuid]) -> EmbedKitResult<()> {
        match ids.iter().find(|id| !self.normalized.contains_key(id)) {
            Some(missing) => Err(EmbedKitError::NotFound(*missing)),
            None => Ok(()),
        }
    }

    fn remove_all(&mut self, ids: &[Uuid]) {
        let ids: HashSet<&Uuid> = ids.iter().collect();
        self.documents.retain(|d| !ids.contains(&d.id));
        self.normalized.retain(|id, _| !ids.contains(id));
    }
}

/// In-memory document store.
/// Documents and the normalized cache share one lock.
pub struct InMemoryDocumentStore {
    dimension: usize,
    state: RwLock<StoreState>,
}

impl InMemoryDocumentStore {
    /// Create an empty store for vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: RwLock::new(StoreState::default()),
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn create_if_needed(&self) -> EmbedKitResult<()> {
        Ok(())
    }

    async fn load(&self) -> EmbedKitResult<()> {
        Ok(())
    }

    async fn save_all(&self, documents: Vec<Document>) -> EmbedKitResult<()> {
        let mut state = self.state.write().await;
        state.check_new(&documents, self.dimension)?;
        state.insert_all(documents);
        Ok(())
    }

    async fn update(&self, document: Document) -> EmbedKitResult<Document> {
        let mut state = self.state.write().await;
        let updated = state.prepare_update(document, self.dimension)?;
        state.replace(updated.clone());
        Ok(updated)
    }

    async fn delete_many(&self, ids: &[Uuid]) -> EmbedKitResult<()> {
        let mut state = self.state.write().await;
        state.check_ids(ids)?;
        state.remove_all(ids);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> EmbedKitResult<Option<Document>> {
        let state = self.state.read().await;
        Ok(state
            .position(id)
            .map(|pos| state.documents[pos].as_ref().clone()))
    }

    async fn get_all_documents(&self) -> EmbedKitResult<Vec<Document>> {
        let state = self.state.read().await;
        Ok(state.documents.iter().map(|d| d.as_ref().clone()).collect())
    }

    async fn get_normalized_embedding(&self, id: Uuid) -> EmbedKitResult<Option<Arc<[f32]>>> {
        Ok(self.state.read().await.normalized.get(&id).cloned())
    }

    async fn scan(&self) -> EmbedKitResult<Vec<ScannedDocument>> {
        let state = self.state.read().await;
        Ok(state
            .documents
            .iter()
            .filter_map(|document| {
                state.normalized.get(&document.id).map(|normalized| ScannedDocument {
                    document: Arc::clone(document),
                    normalized: Arc::clone(normalized),
                })
            })
            .collect())
    }

    async fn count(&self) -> EmbedKitResult<usize> {
        Ok(self.state.read().await.documents.len())
    }

    async fn reset(&self) -> EmbedKitResult<()> {
        *self.state.write().await = StoreState::default();
        Ok(())
    }
}

/// File-backed document store that persists documents as JSONL on disk.
///
/// The whole store is held in memory. New documents are appended; updates
/// and deletes rewrite the file through a temporary file and a rename.
/// Writers hold the state write lock across the file write and change
/// memory right after it, without yielding in between.
///
/// A write that is dropped while its file I/O is in flight may still reach
/// the disk. The write gate remembers this, and the next writer reloads the
/// file before doing anything else. A torn last line left by such a write,
/// or by a crash, is cut off on load.
pub struct FileDocumentStore {
    path: PathBuf,
    inner: InMemoryDocumentStore,
    /// Serializes writers. `true` while the file may hold changes memory lacks.
    write_gate: Mutex<bool>,
}

/// How the record file ends.
#[derive(Debug, PartialEq, Eq)]
enum Tail {
    /// Ends with a newline, or is empty.
    Clean,
    /// The last record is complete but has no trailing newline.
    Unterminated,
    /// The last line is a partial record starting at this byte offset.
    Torn(usize),
}

impl FileDocumentStore {
    /// Create a store backed by the JSONL file at `path`.
    ///
    /// Nothing is read or created until [`DocumentStore::create_if_needed`]
    /// and [`DocumentStore::load`] are called.
    pub fn new(path: PathBuf, dimension: usize) -> Self {
        Self {
            path,
            inner: InMemoryDocumentStore::new(dimension),
            write_gate: Mutex::new(false),
        }
    }

    /// Path of the record file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Take the write gate, reloading first if an earlier write was interrupted.
    async fn lock_synced(&self) -> EmbedKitResult<MutexGuard<'_, bool>> {
        let mut gate = self.write_gate.lock().await;
        if *gate {
            warn!(path = %self.path.display(), "Reloading document store after an interrupted write");
            self.reload().await?;
            *gate = false;
        }
        Ok(gate)
    }

    /// Read the file into memory, cutting off a torn last line.
    async fn reload(&self) -> EmbedKitResult<usize> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(EmbedKitError::Storage(format!(
                    "Failed to read document store: {e}"
                )))
            }
        };

        let (documents, tail) = decode_lines(&data)?;
        let count = documents.len();
        let fresh = StoreState::from_documents(documents, self.inner.dimension)
            .map_err(|e| EmbedKitError::Storage(format!("Corrupted document store: {e}")))?;

        match tail {
            Tail::Clean => {}
            Tail::Unterminated => self.append_bytes(b"\n").await?,
            Tail::Torn(valid_len) => {
                warn!(
                    path = %self.path.display(),
                    discarded = data.len() - valid_len,
                    "Discarding partial record at end of document store"
                );
                self.truncate(valid_len as u64).await?;
            }
        }

        *self.inner.state.write().await = fresh;
        Ok(count)
    }

    /// Append `data` to the file. On failure the file is cut back to its
    /// previous length.
    async fn append_bytes(&self, data: &[u8]) -> EmbedKitResult<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| EmbedKitError::Storage(format!("Failed to open document store: {e}")))?;
        let original_len = file
            .metadata()
            .await
            .map_err(|e| EmbedKitError::Storage(format!("Failed to stat document store: {e}")))?
            .len();

        let written: std::io::Result<()> = async {
            file.write_all(data).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            if let Err(rollback) = file.set_len(original_len).await {
                warn!(error = %rollback, "Failed to roll back partial append");
            }
            return Err(EmbedKitError::Storage(format!(
                "Failed to write documents: {e}"
            )));
        }
        Ok(())
    }

    async fn truncate(&self, len: u64) -> EmbedKitResult<()> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await
            .map_err(|e| EmbedKitError::Storage(format!("Failed to open document store: {e}")))?;
        file.set_len(len)
            .await
            .map_err(|e| EmbedKitError::Storage(format!("Failed to truncate document store: {e}")))
    }

    /// Replace the entire file with `data`.
    async fn rewrite_file(&self, data: &str) -> EmbedKitResult<()> {
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, data.as_bytes())
            .await
            .map_err(|e| EmbedKitError::Storage(format!("Failed to write document store: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| EmbedKitError::Storage(format!("Failed to replace document store: {e}")))?;
        Ok(())
    }
}

fn encode_lines<'a>(documents: impl IntoIterator<Item = &'a Document>) -> EmbedKitResult<String> {
    let mut data = String::new();
    for document in documents {
        let line = serde_json::to_string(document)?;
        data.push_str(&line);
        data.push('\n');
    }
    Ok(data)
}

/// Parse JSONL records. Only the final, unterminated line may be partial.
fn decode_lines(data: &str) -> EmbedKitResult<(Vec<Document>, Tail)> {
    let mut documents = Vec::new();
    let mut offset = 0;
    let mut tail = Tail::Clean;

    for (lineno, line) in data.split_inclusive('\n').enumerate() {
        let start = offset;
        offset += line.len();
        let terminated = line.ends_with('\n');
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Document>(line) {
            Ok(document) => {
                documents.push(document);
                if !terminated {
                    tail = Tail::Unterminated;
                }
            }
            Err(_) if !terminated => tail = Tail::Torn(start),
            Err(e) => {
                return Err(EmbedKitError::Storage(format!(
                    "Invalid record on line {}: {e}",
                    lineno + 1
                )))
            }
        }
    }
    Ok((documents, tail))
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn create_if_needed(&self) -> EmbedKitResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                EmbedKitError::Storage(format!(
                    "Failed to create store directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        Ok(())
    }

    async fn load(&self) -> EmbedKitResult<()> {
        let mut gate = self.write_gate.lock().await;
        *gate = true;
        let count = self.reload().await?;
        *gate = false;

        info!(path = %self.path.display(), count, "Loaded document store");
        Ok(())
    }

    async fn save_all(&self, documents: Vec<Document>) -> EmbedKitResult<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let mut gate = self.lock_synced().await?;
        let mut state = self.inner.state.write().await;
        state.check_new(&documents, self.inner.dimension)?;

        let data = encode_lines(&documents)?;
        *gate = true;
        self.append_bytes(data.as_bytes()).await?;
        let count = documents.len();
        state.insert_all(documents);
        *gate = false;

        debug!(count, "Appended documents");
        Ok(())
    }

    async fn update(&self, document: Document) -> EmbedKitResult<Document> {
        let mut gate = self.lock_synced().await?;
        let mut state = self.inner.state.write().await;
        let updated = state.prepare_update(document, self.inner.dimension)?;

        let data = encode_lines(state.documents.iter().map(|d| {
            if d.id == updated.id {
                &updated
            } else {
                &**d
            }
        }))?;
        *gate = true;
        self.rewrite_file(&data).await?;
        state.replace(updated.clone());
        *gate = false;

        debug!(id = %updated.id, "Updated document");
        Ok(updated)
    }

    async fn delete_many(&self, ids: &[Uuid]) -> EmbedKitResult<()> {
        let mut gate = self.lock_synced().await?;
        let mut state = self.inner.state.write().await;
        state.check_ids(ids)?;

        let doomed: HashSet<&Uuid> = ids.iter().collect();
        let data = encode_lines(
            state
                .documents
                .iter()
                .filter(|d| !doomed.contains(&d.id))
                .map(Arc::as_ref),
        )?;
        *gate = true;
        self.rewrite_file(&data).await?;
        state.remove_all(ids);
        *gate = false;

        debug!(count = ids.len(), "Deleted documents");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> EmbedKitResult<Option<Document>> {
        self.inner.get(id).await
    }

    async fn get_all_documents(&self) -> EmbedKitResult<Vec<Document>> {
        self.inner.get_all_documents().await
    }

    async fn get_normalized_embedding(&self, id: Uuid) -> EmbedKitResult<Option<Arc<[f32]>>> {
        self.inner.get_normalized_embedding(id).await
    }

    async fn scan(&self) -> EmbedKitResult<Vec<ScannedDocument>> {
        self.inner.scan().await
    }

    async fn count(&self) -> EmbedKitResult<usize> {
        self.inner.count().await
    }

    async fn reset(&self) -> EmbedKitResult<()> {
        let mut gate = self.write_gate.lock().await;
        let mut state = self.inner.state.write().await;

        *gate = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(EmbedKitError::Storage(format!(
                    "Failed to clear document store: {e}"
                )))
            }
        }
        *state = StoreState::default();
        *gate = false;

        info!(path = %self.path.display(), "Reset document store");
        Ok(())
    }
}
