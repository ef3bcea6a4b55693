//! Qdrant vector database backend.
//!
//! Covers both deployment kinds behind one client: a self-hosted server
//! reached by URL, or a cloud cluster reached by URL plus API key.

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Qdrant, QdrantError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Point, PointFilter, PointPayload, SearchHit, StoreError, VectorStore};
use crate::cancel::or_cancel;

/// Vector store backed by a Qdrant server.
pub struct QdrantStore {
    client: Qdrant,
}

impl QdrantStore {
    /// Connect to a Qdrant server.
    ///
    /// `api_key` is required for cloud clusters and ignored by most
    /// self-hosted deployments.
    pub fn connect(url: &str, api_key: Option<&str>) -> Result<Self, StoreError> {
        info!("connecting to Qdrant at {url}");

        let mut builder = Qdrant::from_url(url).skip_compatibility_check();
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }

        let client = builder.build().map_err(map_qdrant_err)?;
        Ok(Self { client })
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(map_qdrant_err)?;
        Ok(collections.collections.iter().any(|c| c.name == name))
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(
        &self,
        name: &str,
        vector_size: usize,
        token: &CancellationToken,
    ) -> Result<(), StoreError> {
        let exists = or_cancel(self.collection_exists(name), token)
            .await
            .map_err(StoreError::from)??;
        if exists {
            debug!("collection {name} already exists");
            return Ok(());
        }

        info!("creating collection {name} with {vector_size} dimensions");
        let create = self.client.create_collection(
            CreateCollectionBuilder::new(name)
                .vectors_config(VectorParamsBuilder::new(vector_size as u64, Distance::Cosine)),
        );

        match or_cancel(create, token).await.map_err(StoreError::from)? {
            Ok(_) => Ok(()),
            // A concurrent caller may have created it between the existence
            // check and the create call; that race is success.
            Err(e) => {
                if or_cancel(self.collection_exists(name), token)
                    .await
                    .map_err(StoreError::from)??
                {
                    debug!("collection {name} created concurrently");
                    Ok(())
                } else {
                    Err(map_qdrant_err(e))
                }
            }
        }
    }

    async fn upsert(
        &self,
        collection: &str,
        points: Vec<Point>,
        token: &CancellationToken,
    ) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }

        debug!("upserting {} points into {collection}", points.len());

        let qdrant_points: Vec<PointStruct> = points
            .into_iter()
            .map(|p| PointStruct::new(p.id, p.vector, payload_to_qdrant_map(&p.payload)))
            .collect();

        let upsert = self
            .client
            .upsert_points(UpsertPointsBuilder::new(collection, qdrant_points));

        or_cancel(upsert, token)
            .await
            .map_err(StoreError::from)?
            .map_err(map_qdrant_err)?;
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
        debug!("searching {collection} for {limit} nearest points");

        let mut builder =
            SearchPointsBuilder::new(collection, vector, limit as u64).with_payload(true);

        if let Some(f) = filter {
            let conditions = filter_conditions(&f);
            if !conditions.is_empty() {
                builder = builder.filter(Filter::must(conditions));
            }
        }

        let results = or_cancel(self.client.search_points(builder), token)
            .await
            .map_err(StoreError::from)?
            .map_err(map_qdrant_err)?;

        let hits = results
            .result
            .into_iter()
            .map(|p| {
                let id = p
                    .id
                    .map(|id| match id.point_id_options {
                        Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u)) => u,
                        Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => {
                            n.to_string()
                        }
                        None => String::new(),
                    })
                    .unwrap_or_default();

                SearchHit {
                    id,
                    score: p.score,
                    payload: qdrant_map_to_payload(&p.payload),
                }
            })
            .collect();

        Ok(hits)
    }

    async fn delete_by_filter(
        &self,
        collection: &str,
        filter: PointFilter,
        token: &CancellationToken,
    ) -> Result<(), StoreError> {
        let conditions = filter_conditions(&filter);
        if conditions.is_empty() {
            return Err(StoreError::Api {
                code: "InvalidArgument".to_string(),
                message: "refusing to delete with an empty filter".to_string(),
            });
        }

        debug!("deleting points from {collection} matching {filter:?}");

        let delete = self.client.delete_points(
            DeletePointsBuilder::new(collection).points(Filter::must(conditions)),
        );

        or_cancel(delete, token)
            .await
            .map_err(StoreError::from)?
            .map_err(map_qdrant_err)?;
        Ok(())
    }
}

fn filter_conditions(filter: &PointFilter) -> Vec<Condition> {
    let mut conditions = Vec::new();
    if let Some(repo_id) = &filter.repo_id {
        conditions.push(Condition::matches("repo_id", repo_id.clone()));
    }
    if let Some(file_path) = &filter.file_path {
        conditions.push(Condition::matches("file_path", file_path.clone()));
    }
    conditions
}

/// Classify a client error into the store failure taxonomy.
fn map_qdrant_err(err: QdrantError) -> StoreError {
    match err {
        QdrantError::ResponseError { status } => {
            let code = format!("{:?}", status.code());
            let message = status.message().to_string();
            match code.as_str() {
                "Unauthenticated" | "PermissionDenied" => StoreError::Auth(message),
                "Unavailable" | "DeadlineExceeded" => StoreError::Unreachable(message),
                _ => StoreError::Api { code, message },
            }
        }
        other => {
            let message = other.to_string();
            let lower = message.to_lowercase();
            if lower.contains("connect") || lower.contains("transport") || lower.contains("dns") {
                StoreError::Unreachable(message)
            } else {
                StoreError::Api {
                    code: "Client".to_string(),
                    message,
                }
            }
        }
    }
}

/// Convert a payload to Qdrant's map representation.
fn payload_to_qdrant_map(
    payload: &PointPayload,
) -> HashMap<String, qdrant_client::qdrant::Value> {
    let mut map: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();

    map.insert("file_path".to_string(), payload.file_path.clone().into());
    map.insert("content".to_string(), payload.content.clone().into());
    map.insert("line_start".to_string(), (payload.line_start as i64).into());
    map.insert("line_end".to_string(), (payload.line_end as i64).into());
    map.insert("repo_id".to_string(), payload.repo_id.clone().into());
    map.insert("kind".to_string(), payload.kind.clone().into());

    if let Some(commit) = &payload.commit {
        map.insert("commit".to_string(), commit.clone().into());
    }

    map
}

/// Convert Qdrant's map representation back to a payload.
fn qdrant_map_to_payload(
    map: &HashMap<String, qdrant_client::qdrant::Value>,
) -> PointPayload {
    PointPayload {
        file_path: extract_string(map.get("file_path")),
        content: extract_string(map.get("content")),
        line_start: extract_integer(map.get("line_start")) as usize,
        line_end: extract_integer(map.get("line_end")) as usize,
        repo_id: extract_string(map.get("repo_id")),
        commit: map.get("commit").and_then(extract_string_opt),
        kind: extract_string(map.get("kind")),
    }
}

fn extract_string(value: Option<&qdrant_client::qdrant::Value>) -> String {
    value.and_then(extract_string_opt).unwrap_or_default()
}

fn extract_string_opt(value: &qdrant_client::qdrant::Value) -> Option<String> {
    if let Some(qdrant_client::qdrant::value::Kind::StringValue(s)) = &value.kind {
        Some(s.clone())
    } else {
        None
    }
}

fn extract_integer(value: Option<&qdrant_client::qdrant::Value>) -> i64 {
    value
        .and_then(|v| {
            if let Some(qdrant_client::qdrant::value::Kind::IntegerValue(i)) = &v.kind {
                Some(*i)
            } else {
                None
            }
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> PointPayload {
        PointPayload {
            file_path: "src/main.rs".to_string(),
            content: "fn main() {}".to_string(),
            line_start: 1,
            line_end: 10,
            repo_id: "repo".to_string(),
            commit: Some("abc123".to_string()),
            kind: "code".to_string(),
        }
    }

    #[test]
    fn payload_round_trip() {
        let original = sample_payload();
        let map = payload_to_qdrant_map(&original);
        let restored = qdrant_map_to_payload(&map);
        assert_eq!(restored, original);
    }

    #[test]
    fn payload_round_trip_without_commit() {
        let original = PointPayload {
            commit: None,
            ..sample_payload()
        };
        let map = payload_to_qdrant_map(&original);
        assert!(!map.contains_key("commit"));

        let restored = qdrant_map_to_payload(&map);
        assert_eq!(restored.commit, None);
    }

    #[test]
    fn filter_conditions_cover_set_fields() {
        assert!(filter_conditions(&PointFilter::default()).is_empty());
        assert_eq!(filter_conditions(&PointFilter::repo("r")).len(), 1);
        assert_eq!(filter_conditions(&PointFilter::file("r", "p")).len(), 2);
    }

    #[test]
    fn empty_map_yields_defaults() {
        let map: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();
        let payload = qdrant_map_to_payload(&map);
        assert!(payload.file_path.is_empty());
        assert_eq!(payload.line_start, 0);
        assert!(payload.commit.is_none());
    }
}
