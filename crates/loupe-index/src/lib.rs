//! Incremental semantic indexing and similarity search for a source tree.
//!
//! This crate provides:
//! - Change detection via content hashes, so unchanged files never hit the
//!   embedding service twice
//! - Embedding generation over pluggable HTTP backends, with bounded
//!   retry/backoff and cooperative cancellation
//! - Vector storage in Qdrant (or in-process for tests/embedded use) with
//!   idempotent, per-file-atomic upserts
//! - An orchestrating pipeline with progress reporting and partial-failure
//!   recovery
//! - A debounced file watcher feeding single-file updates back through the
//!   pipeline
//! - A query path applying score thresholds and path-glob filters

pub mod cancel;
pub mod chunker;
pub mod config;
pub mod discovery;
pub mod embeddings;
pub mod meta;
pub mod pipeline;
pub mod progress;
pub mod query;
pub mod retry;
pub mod store;
pub mod watcher;

// Re-exports
pub use cancel::Cancelled;
pub use chunker::{Chunk, Chunker, LineChunker};
pub use self::config::{EmbeddingBackend, IndexSettings, SettingsError};
pub use discovery::{FileDiscovery, PathFilters, WalkDiscovery};
pub use embeddings::{
    CloudEmbeddings, EmbeddingError, EmbeddingProvider, LocalEmbeddings, FALLBACK_DIMENSIONS,
};
pub use meta::{MetaError, MetaStore, RepoIndexState};
pub use pipeline::{content_hash, IndexPipeline, IndexSummary, PipelineError};
pub use progress::{IndexStatus, IndexingProgress, ListenerId, ProgressBroadcaster};
pub use query::{QueryError, SearchResult, Searcher};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use store::{
    point_id, MemoryStore, Point, PointFilter, PointPayload, QdrantStore, SearchHit, StoreError,
    VectorStore,
};
pub use watcher::{FileEvent, FileWatcher, SyncService, WatcherConfig, WatcherError};

/// Default vector store collection name.
pub const DEFAULT_COLLECTION: &str = "loupe-code";
