//! Vector store trait and implementations.
//!
//! A vector store is a durable collection of `(id, vector, payload)` points
//! supporting idempotent upserts, cosine-similarity search and filtered
//! deletes. Backends: Qdrant over the network (self-hosted or cloud, the
//! latter authenticated with an API key) and an in-process memory store.

pub mod memory;
pub mod qdrant;

pub use memory::MemoryStore;
pub use qdrant::QdrantStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cancel::Cancelled;

/// Metadata stored with each vector point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    /// Path of the source file, relative to the indexed root.
    pub file_path: String,

    /// The chunk text this point embeds.
    pub content: String,

    /// Starting line number (1-indexed).
    pub line_start: usize,

    /// Ending line number (1-indexed).
    pub line_end: usize,

    /// Repository the point belongs to.
    pub repo_id: String,

    /// VCS commit id at indexing time, if known.
    pub commit: Option<String>,

    /// Kind of indexed content, e.g. "code".
    pub kind: String,
}

/// A point to upsert into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Deterministic identifier, see [`point_id`].
    pub id: String,

    /// Embedding vector.
    pub vector: Vec<f32>,

    /// Payload metadata.
    pub payload: PointPayload,
}

/// A search hit, ordered by descending similarity score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub payload: PointPayload,
}

/// Payload filter for search and delete operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointFilter {
    pub repo_id: Option<String>,
    pub file_path: Option<String>,
}

impl PointFilter {
    /// Match every point of a repository.
    pub fn repo(repo_id: impl Into<String>) -> Self {
        Self {
            repo_id: Some(repo_id.into()),
            file_path: None,
        }
    }

    /// Match every point of one file within a repository.
    pub fn file(repo_id: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            repo_id: Some(repo_id.into()),
            file_path: Some(file_path.into()),
        }
    }

    /// Client-side evaluation of the filter against a payload.
    pub fn matches(&self, payload: &PointPayload) -> bool {
        if let Some(repo_id) = &self.repo_id {
            if &payload.repo_id != repo_id {
                return false;
            }
        }
        if let Some(file_path) = &self.file_path {
            if &payload.file_path != file_path {
                return false;
            }
        }
        true
    }
}

/// Errors from vector store operations.
///
/// Network-class failures are distinguished from authentication failures
/// and other API errors; retrying is the caller's decision.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("vector store unreachable: {0}")]
    Unreachable(String),

    #[error("vector store authentication failed: {0}")]
    Auth(String),

    #[error("vector store error ({code}): {message}")]
    Api { code: String, message: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for StoreError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Trait for vector store backends.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if absent; "already exists" races are success.
    async fn ensure_collection(
        &self,
        name: &str,
        vector_size: usize,
        token: &CancellationToken,
    ) -> Result<(), StoreError>;

    /// Insert or replace points; idempotent per point id.
    async fn upsert(
        &self,
        collection: &str,
        points: Vec<Point>,
        token: &CancellationToken,
    ) -> Result<(), StoreError>;

    /// Top-`limit` hits by descending similarity, optionally filtered.
    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<PointFilter>,
        token: &CancellationToken,
    ) -> Result<Vec<SearchHit>, StoreError>;

    /// Delete every point matching the filter.
    async fn delete_by_filter(
        &self,
        collection: &str,
        filter: PointFilter,
        token: &CancellationToken,
    ) -> Result<(), StoreError>;
}

/// Deterministic point id for a chunk, so re-indexing the same chunk
/// overwrites its point instead of duplicating it.
pub fn point_id(repo_id: &str, file_path: &str, line_start: usize) -> String {
    let name = format!("{repo_id}:{file_path}:{line_start}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(repo: &str, path: &str) -> PointPayload {
        PointPayload {
            file_path: path.to_string(),
            content: String::new(),
            line_start: 1,
            line_end: 1,
            repo_id: repo.to_string(),
            commit: None,
            kind: "code".to_string(),
        }
    }

    #[test]
    fn point_ids_are_deterministic_and_distinct() {
        let a = point_id("repo", "src/a.rs", 1);
        let b = point_id("repo", "src/a.rs", 1);
        assert_eq!(a, b);

        assert_ne!(a, point_id("repo", "src/a.rs", 42));
        assert_ne!(a, point_id("repo", "src/b.rs", 1));
        assert_ne!(a, point_id("other", "src/a.rs", 1));

        // Valid UUID, accepted by stores that require UUID point ids.
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn filter_matches_repo_and_file() {
        let p = payload("repo", "src/a.rs");

        assert!(PointFilter::default().matches(&p));
        assert!(PointFilter::repo("repo").matches(&p));
        assert!(!PointFilter::repo("other").matches(&p));
        assert!(PointFilter::file("repo", "src/a.rs").matches(&p));
        assert!(!PointFilter::file("repo", "src/b.rs").matches(&p));
        assert!(!PointFilter::file("other", "src/a.rs").matches(&p));
    }
}
