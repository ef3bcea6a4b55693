//! Indexing orchestrator.
//!
//! The pipeline drives one repository root through discovery, change
//! detection, chunking, embedding and vector-store synchronization, while
//! reporting progress and honoring cooperative cancellation. A run moves
//! through `idle → starting → indexing → {completed | error | cancelled}`
//! and always returns to idle, releasing the busy flag.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::{check, Cancelled};
use crate::chunker::{Chunker, LineChunker};
use crate::config::IndexSettings;
use crate::discovery::{FileDiscovery, WalkDiscovery};
use crate::embeddings::{provider_from_settings, EmbeddingError, EmbeddingProvider};
use crate::meta::{MetaError, MetaStore};
use crate::progress::{IndexStatus, IndexingProgress, ListenerId, ProgressBroadcaster};
use crate::store::{
    point_id, Point, PointFilter, PointPayload, QdrantStore, StoreError, VectorStore,
};

/// Errors terminating an indexing operation.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("an indexing run is already in progress")]
    Busy,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("file discovery failed: {0}")]
    Discovery(String),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Meta(#[from] MetaError),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for PipelineError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Keep store cancellations distinct from store failures.
fn store_err(err: StoreError) -> PipelineError {
    match err {
        StoreError::Cancelled => PipelineError::Cancelled,
        other => PipelineError::Store(other),
    }
}

/// Counters describing one indexing operation.
#[derive(Debug, Default, Clone)]
pub struct IndexSummary {
    /// Candidate files considered.
    pub files_seen: usize,
    /// Files chunked, embedded and upserted.
    pub files_indexed: usize,
    /// Files skipped because their content hash was unchanged.
    pub files_skipped: usize,
    /// Files skipped because they could not be read.
    pub files_failed: usize,
    /// Points written to the vector store.
    pub chunks_indexed: usize,
    /// Chunks dropped after embedding soft failures.
    pub chunks_dropped: usize,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
}

/// Orchestrates indexing for a single repository root.
pub struct IndexPipeline {
    repo_id: String,
    root: PathBuf,
    collection: String,
    embeddings: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    chunker: Arc<dyn Chunker>,
    discovery: Arc<dyn FileDiscovery>,
    meta: Arc<MetaStore>,
    /// VCS commit at indexing time, stamped into point payloads if known.
    commit: Option<String>,
    progress: ProgressBroadcaster,
    running: AtomicBool,
    // Vector length reported by the provider, cached after the first probe.
    dimension: AtomicUsize,
    current_run: Mutex<Option<CancellationToken>>,
}

impl IndexPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo_id: String,
        root: PathBuf,
        collection: String,
        embeddings: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        chunker: Arc<dyn Chunker>,
        discovery: Arc<dyn FileDiscovery>,
        meta: Arc<MetaStore>,
    ) -> Self {
        Self {
            repo_id,
            root,
            collection,
            embeddings,
            store,
            chunker,
            discovery,
            meta,
            commit: None,
            progress: ProgressBroadcaster::new(),
            running: AtomicBool::new(false),
            dimension: AtomicUsize::new(0),
            current_run: Mutex::new(None),
        }
    }

    /// Wire up a pipeline from validated settings: embedding backend and
    /// Qdrant store selected by configuration, default chunker, walker
    /// discovery and host-scoped metadata.
    pub fn from_settings(settings: &IndexSettings) -> Result<Self, PipelineError> {
        settings
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let embeddings = provider_from_settings(&settings.embedding, settings.retry.policy());
        let store = Arc::new(
            QdrantStore::connect(&settings.store.url, settings.store.api_key.as_deref())
                .map_err(store_err)?,
        );
        let discovery = Arc::new(
            WalkDiscovery::new(settings.root_path.clone(), &settings.discovery)
                .map_err(|e| PipelineError::Config(e.to_string()))?,
        );
        let meta = Arc::new(MetaStore::open_default()?);

        Ok(Self::new(
            settings.repo_id.clone(),
            settings.root_path.clone(),
            settings.collection.clone(),
            embeddings,
            store,
            Arc::new(LineChunker::default()),
            discovery,
            meta,
        ))
    }

    /// Stamp point payloads with the commit the tree is at.
    pub fn with_commit(mut self, commit: Option<String>) -> Self {
        self.commit = commit;
        self
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn meta(&self) -> &MetaStore {
        &self.meta
    }

    /// Register a progress listener.
    pub fn subscribe_progress(
        &self,
        listener: impl Fn(&IndexingProgress) + Send + Sync + 'static,
    ) -> ListenerId {
        self.progress.subscribe(listener)
    }

    /// Remove a progress listener.
    pub fn unsubscribe_progress(&self, id: ListenerId) -> bool {
        self.progress.unsubscribe(id)
    }

    /// Whether a full run is currently in flight.
    pub fn is_indexing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request cancellation of the current run, if any. Takes effect at the
    /// next check point; in-flight service calls are aborted.
    pub fn stop(&self) {
        let guard = self.current_run.lock().expect("run lock poisoned");
        if let Some(token) = guard.as_ref() {
            info!("stop requested, cancelling indexing run");
            token.cancel();
        }
    }

    /// Run a full indexing pass.
    ///
    /// At most one run per pipeline instance; a second caller gets
    /// [`PipelineError::Busy`] and must retry later.
    pub async fn start(&self) -> Result<IndexSummary, PipelineError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PipelineError::Busy);
        }

        let token = CancellationToken::new();
        *self.current_run.lock().expect("run lock poisoned") = Some(token.clone());

        let result = self.run(&token).await;

        *self.current_run.lock().expect("run lock poisoned") = None;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run(&self, token: &CancellationToken) -> Result<IndexSummary, PipelineError> {
        let start = Instant::now();
        info!("starting indexing run for {} at {:?}", self.repo_id, self.root);
        self.emit(0, 0, None, IndexStatus::Starting, None);

        let dimension = match self.resolve_dimension(token).await {
            Ok(d) => d,
            Err(e) => return self.fail(0, 0, e),
        };

        if let Err(e) = self
            .store
            .ensure_collection(&self.collection, dimension, token)
            .await
            .map_err(store_err)
        {
            return self.fail(0, 0, e);
        }

        let files = match self.discovery.discover() {
            Ok(files) => files,
            Err(e) => return self.fail(0, 0, PipelineError::Discovery(e.to_string())),
        };
        let total = files.len();
        info!("{total} candidate files");

        let mut summary = IndexSummary::default();
        let mut run_hashes: BTreeMap<String, String> = BTreeMap::new();

        for (processed, path) in files.iter().enumerate() {
            if token.is_cancelled() {
                return self.fail(processed, total, PipelineError::Cancelled);
            }

            let rel = self.rel_path(path);
            match self.index_one(path, &rel, token, &mut summary).await {
                Ok(Some(hash)) => {
                    run_hashes.insert(rel.clone(), hash);
                }
                Ok(None) => {}
                Err(e) => return self.fail(processed, total, e),
            }
            self.emit(processed + 1, total, Some(rel), IndexStatus::Indexing, None);
        }

        if let Err(e) = self.meta.update(&self.repo_id, &run_digest(&run_hashes)) {
            return self.fail(total, total, PipelineError::Meta(e));
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        info!("indexing completed: {summary:?}");
        self.emit(total, total, None, IndexStatus::Completed, None);
        Ok(summary)
    }

    /// Re-index a single file; one iteration of the full run's inner loop.
    /// Used by the incremental sync path, applying the same filters.
    pub async fn update_file(
        &self,
        path: &Path,
        token: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if !self.discovery.matches(path) {
            debug!("{path:?} excluded from indexing, ignoring update");
            return Ok(());
        }

        let dimension = self.resolve_dimension(token).await?;
        self.store
            .ensure_collection(&self.collection, dimension, token)
            .await
            .map_err(store_err)?;

        let rel = self.rel_path(path);
        let mut summary = IndexSummary::default();
        self.index_one(path, &rel, token, &mut summary).await?;
        debug!("incremental update of {rel}: {summary:?}");
        Ok(())
    }

    /// Drop a deleted file's points and metadata so they do not linger in
    /// future search results.
    pub async fn remove_file(
        &self,
        path: &Path,
        token: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let rel = self.rel_path(path);
        info!("removing {rel} from index");
        self.store
            .delete_by_filter(
                &self.collection,
                PointFilter::file(&self.repo_id, &rel),
                token,
            )
            .await
            .map_err(store_err)?;
        self.meta.remove_file(&self.repo_id, &rel)?;
        Ok(())
    }

    /// Delete points for files that are on record but no longer pass
    /// discovery, i.e. files newly covered by ignore patterns.
    pub async fn purge_excluded(&self, token: &CancellationToken) -> Result<usize, PipelineError> {
        let discovered: HashSet<String> = self
            .discovery
            .discover()
            .map_err(|e| PipelineError::Discovery(e.to_string()))?
            .iter()
            .map(|p| self.rel_path(p))
            .collect();

        let mut removed = 0;
        for file in self.meta.files_for_repo(&self.repo_id) {
            check(token)?;
            if !discovered.contains(&file) {
                info!("purging {file}: no longer a candidate");
                self.store
                    .delete_by_filter(
                        &self.collection,
                        PointFilter::file(&self.repo_id, &file),
                        token,
                    )
                    .await
                    .map_err(store_err)?;
                self.meta.remove_file(&self.repo_id, &file)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Index one file: hash, dedup, chunk, embed, upsert, record.
    ///
    /// Returns the file's content hash, or `None` when the file was skipped
    /// as unreadable. Soft failures (one chunk failing to embed, the file
    /// failing to read) never escape; store failures and cancellation do.
    async fn index_one(
        &self,
        path: &Path,
        rel: &str,
        token: &CancellationToken,
        summary: &mut IndexSummary,
    ) -> Result<Option<String>, PipelineError> {
        summary.files_seen += 1;
        check(token)?;

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to read {rel}: {e}, skipping");
                summary.files_failed += 1;
                return Ok(None);
            }
        };
        let hash = content_hash(&bytes);

        let prior = self.meta.file_hash(&self.repo_id, rel);
        if prior.as_deref() == Some(hash.as_str()) {
            debug!("{rel} unchanged, skipping");
            summary.files_skipped += 1;
            return Ok(Some(hash));
        }

        let text = String::from_utf8_lossy(&bytes);
        let chunks = self.chunker.chunk(rel, &text);
        debug!("{rel}: {} chunks", chunks.len());

        let mut points = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            check(token)?;
            match self.embeddings.embed(&chunk.content, token).await {
                Ok(Some(vector)) => points.push(Point {
                    id: point_id(&self.repo_id, rel, chunk.line_start),
                    vector,
                    payload: PointPayload {
                        file_path: rel.to_string(),
                        content: chunk.content.clone(),
                        line_start: chunk.line_start,
                        line_end: chunk.line_end,
                        repo_id: self.repo_id.clone(),
                        commit: self.commit.clone(),
                        kind: "code".to_string(),
                    },
                }),
                Ok(None) => {
                    warn!("dropping chunk {} after failed embedding", chunk.id);
                    summary.chunks_dropped += 1;
                }
                Err(EmbeddingError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => {
                    warn!("dropping chunk {}: {e}", chunk.id);
                    summary.chunks_dropped += 1;
                }
            }
        }

        // Last cancellation check for this file. Past this point the
        // delete + upsert pair runs to completion so that a file's chunk
        // set is replaced as a unit, never observed half-written.
        check(token)?;
        let commit_token = CancellationToken::new();

        if prior.is_some() {
            self.store
                .delete_by_filter(
                    &self.collection,
                    PointFilter::file(&self.repo_id, rel),
                    &commit_token,
                )
                .await
                .map_err(store_err)?;
        }
        if !points.is_empty() {
            summary.chunks_indexed += points.len();
            self.store
                .upsert(&self.collection, points, &commit_token)
                .await
                .map_err(store_err)?;
        }

        self.meta.record_file(&self.repo_id, rel, &hash)?;
        summary.files_indexed += 1;
        Ok(Some(hash))
    }

    async fn resolve_dimension(&self, token: &CancellationToken) -> Result<usize, PipelineError> {
        let cached = self.dimension.load(Ordering::SeqCst);
        if cached != 0 {
            return Ok(cached);
        }

        let dimension = self
            .embeddings
            .detect_dimension(token)
            .await
            .map_err(|e| match e {
                EmbeddingError::Cancelled => PipelineError::Cancelled,
                other => PipelineError::Config(format!("embedding provider unusable: {other}")),
            })?;
        self.dimension.store(dimension, Ordering::SeqCst);
        Ok(dimension)
    }

    fn emit(
        &self,
        current: usize,
        total: usize,
        current_file: Option<String>,
        status: IndexStatus,
        message: Option<String>,
    ) {
        self.progress.emit(&IndexingProgress {
            current,
            total,
            current_file,
            status,
            message,
        });
    }

    fn fail(
        &self,
        current: usize,
        total: usize,
        err: PipelineError,
    ) -> Result<IndexSummary, PipelineError> {
        match &err {
            PipelineError::Cancelled => {
                info!("indexing run cancelled after {current} files");
                self.emit(current, total, None, IndexStatus::Cancelled, None);
            }
            other => {
                warn!("indexing run failed: {other}");
                self.emit(
                    current,
                    total,
                    None,
                    IndexStatus::Error,
                    Some(other.to_string()),
                );
            }
        }
        Err(err)
    }

    fn rel_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// SHA256 hex digest of raw file bytes, used for change detection only.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Digest summarizing a completed run: the sorted per-file change list.
fn run_digest(hashes: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (path, hash) in hashes {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(hash.as_bytes());
        hasher.update([b'\n']);
    }
    hex::encode(hasher.finalize())
}
