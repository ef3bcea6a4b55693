//! Query path.
//!
//! Embeds a query string once, runs a similarity search against the vector
//! store, and post-filters the hits by score threshold and an optional
//! path glob. Bypasses the orchestrator entirely.

use std::sync::Arc;

use globset::Glob;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SearchSettings;
use crate::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::store::{PointFilter, SearchHit, StoreError, VectorStore};

/// Errors surfaced by [`Searcher::search`].
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("invalid path filter {pattern:?}: {message}")]
    Filter { pattern: String, message: String },

    #[error(transparent)]
    Store(StoreError),

    #[error("operation cancelled")]
    Cancelled,
}

/// One similarity hit mapped for consumers.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub file_path: String,
    pub content: String,
    pub line_start: usize,
    pub line_end: usize,
    /// Store-native similarity score, higher is better.
    pub score: f32,
}

impl SearchResult {
    fn from_hit(hit: SearchHit) -> Self {
        Self {
            file_path: hit.payload.file_path,
            content: hit.payload.content,
            line_start: hit.payload.line_start,
            line_end: hit.payload.line_end,
            score: hit.score,
        }
    }
}

/// Answers similarity queries against an indexed repository.
pub struct Searcher {
    embeddings: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    collection: String,
    repo_id: String,
    settings: SearchSettings,
}

impl Searcher {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        collection: String,
        repo_id: String,
        settings: SearchSettings,
    ) -> Self {
        Self {
            embeddings,
            store,
            collection,
            repo_id,
            settings,
        }
    }

    /// Search for content similar to `query`.
    ///
    /// Trivial queries (shorter than the configured minimum after trimming)
    /// return an empty result set: "no search", not an error. A failed
    /// query embedding also returns empty results, with a warning, rather
    /// than failing the caller.
    pub async fn search(
        &self,
        query: &str,
        path_glob: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Vec<SearchResult>, QueryError> {
        let trimmed = query.trim();
        if trimmed.len() < self.settings.min_query_len {
            debug!("query too short ({} chars), not searching", trimmed.len());
            return Ok(Vec::new());
        }

        let matcher = path_glob
            .map(|pattern| {
                Glob::new(pattern)
                    .map(|g| g.compile_matcher())
                    .map_err(|e| QueryError::Filter {
                        pattern: pattern.to_string(),
                        message: e.to_string(),
                    })
            })
            .transpose()?;

        let vector = match self.embeddings.embed(trimmed, token).await {
            Ok(Some(vector)) => vector,
            Ok(None) => {
                warn!("query embedding failed, returning no results");
                return Ok(Vec::new());
            }
            Err(EmbeddingError::Cancelled) => return Err(QueryError::Cancelled),
            Err(e) => {
                warn!("query embedding failed ({e}), returning no results");
                return Ok(Vec::new());
            }
        };

        let hits = self
            .store
            .search(
                &self.collection,
                vector,
                self.settings.limit,
                Some(PointFilter::repo(&self.repo_id)),
                token,
            )
            .await
            .map_err(|e| match e {
                StoreError::Cancelled => QueryError::Cancelled,
                other => QueryError::Store(other),
            })?;

        let threshold = self.settings.score_threshold;
        let results: Vec<SearchResult> = hits
            .into_iter()
            .filter(|hit| hit.score >= threshold)
            .filter(|hit| {
                matcher
                    .as_ref()
                    .map_or(true, |m| m.is_match(&hit.payload.file_path))
            })
            .map(SearchResult::from_hit)
            .collect();

        debug!("query returned {} results", results.len());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Point, PointPayload};
    use async_trait::async_trait;

    struct FixedEmbeddings {
        vector: Option<Vec<f32>>,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbeddings {
        async fn embed(
            &self,
            _text: &str,
            _token: &CancellationToken,
        ) -> Result<Option<Vec<f32>>, EmbeddingError> {
            Ok(self.vector.clone())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn point(id: &str, vector: Vec<f32>, path: &str) -> Point {
        Point {
            id: id.to_string(),
            vector,
            payload: PointPayload {
                file_path: path.to_string(),
                content: format!("content {id}"),
                line_start: 1,
                line_end: 2,
                repo_id: "repo".to_string(),
                commit: None,
                kind: "code".to_string(),
            },
        }
    }

    /// Unit vector at angle giving the wanted cosine against [1, 0].
    fn vector_with_score(score: f32) -> Vec<f32> {
        vec![score, (1.0 - score * score).sqrt()]
    }

    async fn searcher_with_points(
        query_vector: Option<Vec<f32>>,
        settings: SearchSettings,
    ) -> Searcher {
        let store = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        store.ensure_collection("c", 2, &token).await.unwrap();
        store
            .upsert(
                "c",
                vec![
                    point("high", vector_with_score(0.9), "src/high.rs"),
                    point("mid", vector_with_score(0.7), "src/mid.rs"),
                    point("low", vector_with_score(0.3), "lib/low.rs"),
                ],
                &token,
            )
            .await
            .unwrap();

        Searcher::new(
            Arc::new(FixedEmbeddings {
                vector: query_vector,
            }),
            store,
            "c".to_string(),
            "repo".to_string(),
            settings,
        )
    }

    #[tokio::test]
    async fn threshold_drops_low_scores_in_descending_order() {
        let settings = SearchSettings {
            limit: 10,
            score_threshold: 0.5,
            min_query_len: 3,
        };
        let searcher = searcher_with_points(Some(vec![1.0, 0.0]), settings).await;
        let token = CancellationToken::new();

        let results = searcher.search("find the thing", None, &token).await.unwrap();
        let paths: Vec<&str> = results.iter().map(|r| r.file_path.as_str()).collect();
        assert_eq!(paths, vec!["src/high.rs", "src/mid.rs"]);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn short_query_is_no_search() {
        let searcher =
            searcher_with_points(Some(vec![1.0, 0.0]), SearchSettings::default()).await;
        let token = CancellationToken::new();

        let results = searcher.search("  a ", None, &token).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn failed_query_embedding_returns_empty() {
        let searcher = searcher_with_points(None, SearchSettings::default()).await;
        let token = CancellationToken::new();

        let results = searcher.search("find the thing", None, &token).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn glob_filter_narrows_paths() {
        let settings = SearchSettings {
            limit: 10,
            score_threshold: 0.0,
            min_query_len: 3,
        };
        let searcher = searcher_with_points(Some(vec![1.0, 0.0]), settings).await;
        let token = CancellationToken::new();

        let results = searcher
            .search("find the thing", Some("src/**"), &token)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.file_path.starts_with("src/")));
    }

    #[tokio::test]
    async fn bad_glob_is_an_error() {
        let searcher =
            searcher_with_points(Some(vec![1.0, 0.0]), SearchSettings::default()).await;
        let token = CancellationToken::new();

        let out = searcher.search("find the thing", Some("["), &token).await;
        assert!(matches!(out, Err(QueryError::Filter { .. })));
    }
}
