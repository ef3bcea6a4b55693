//! In-process vector store.
//!
//! Holds collections in a HashMap and scores searches with cosine
//! similarity. Used by the integration tests and by embedded setups that
//! have no vector database to talk to.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Point, PointFilter, SearchHit, StoreError, VectorStore};
use crate::cancel::check;

#[derive(Default)]
struct Collection {
    vector_size: usize,
    points: HashMap<String, Point>,
}

/// Vector store held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vector size the collection was created with, if it exists.
    pub async fn vector_size(&self, collection: &str) -> Option<usize> {
        let collections = self.collections.read().await;
        collections.get(collection).map(|c| c.vector_size)
    }

    /// Number of points currently stored in the collection.
    pub async fn point_count(&self, collection: &str) -> usize {
        let collections = self.collections.read().await;
        collections.get(collection).map_or(0, |c| c.points.len())
    }

    /// All points of a collection, sorted by id for stable comparison.
    pub async fn points(&self, collection: &str) -> Vec<Point> {
        let collections = self.collections.read().await;
        let mut points: Vec<Point> = collections
            .get(collection)
            .map(|c| c.points.values().cloned().collect())
            .unwrap_or_default();
        points.sort_by(|a, b| a.id.cmp(&b.id));
        points
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(
        &self,
        name: &str,
        vector_size: usize,
        token: &CancellationToken,
    ) -> Result<(), StoreError> {
        check(token)?;
        let mut collections = self.collections.write().await;
        match collections.get(name) {
            Some(existing) => {
                if existing.vector_size != vector_size {
                    warn!(
                        "collection {name} already exists with {} dimensions (requested {})",
                        existing.vector_size, vector_size
                    );
                }
            }
            None => {
                debug!("creating in-memory collection {name} with {vector_size} dimensions");
                collections.insert(
                    name.to_string(),
                    Collection {
                        vector_size,
                        points: HashMap::new(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        points: Vec<Point>,
        token: &CancellationToken,
    ) -> Result<(), StoreError> {
        check(token)?;
        let mut collections = self.collections.write().await;
        let target = collections.entry(collection.to_string()).or_default();
        for point in points {
            target.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<PointFilter>,
        token: &CancellationToken,
    ) -> Result<Vec<SearchHit>, StoreError> {
        check(token)?;
        let collections = self.collections.read().await;
        let Some(target) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<SearchHit> = target
            .points
            .values()
            .filter(|p| filter.as_ref().map_or(true, |f| f.matches(&p.payload)))
            .map(|p| SearchHit {
                id: p.id.clone(),
                score: cosine_similarity(&vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_by_filter(
        &self,
        collection: &str,
        filter: PointFilter,
        token: &CancellationToken,
    ) -> Result<(), StoreError> {
        check(token)?;
        let mut collections = self.collections.write().await;
        if let Some(target) = collections.get_mut(collection) {
            let before = target.points.len();
            target.points.retain(|_, p| !filter.matches(&p.payload));
            debug!(
                "deleted {} points from {collection}",
                before - target.points.len()
            );
        }
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
