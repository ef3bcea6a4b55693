//! Cloud key-based embedding backend.
//!
//! Speaks the batched `{"model", "input": [..]}` contract used by hosted
//! embedding APIs, authenticated with a bearer key. Only single-text
//! requests are issued by the pipeline; responses are index-sorted since
//! the wire format allows reordering.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{EmbeddingError, EmbeddingProvider, REQUEST_TIMEOUT};
use crate::cancel::or_cancel;
use crate::retry::{retry_with_backoff, RetryPolicy};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1/embeddings";
const DEFAULT_MODEL: &str = "qwen/qwen3-embedding-8b";

#[derive(Serialize)]
struct CloudEmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct CloudEmbeddingResponse {
    data: Vec<CloudEmbeddingData>,
}

#[derive(Deserialize)]
struct CloudEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Embedding provider backed by a hosted, key-authenticated API.
pub struct CloudEmbeddings {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
    retry: RetryPolicy,
}

impl CloudEmbeddings {
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Set a custom endpoint (useful for testing or proxies).
    pub fn with_base_url(mut self, url: String) -> Self {
        if !url.is_empty() {
            self.base_url = url;
        }
        self
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = CloudEmbeddingRequest {
            model: self.model.clone(),
            input: vec![text.to_string()],
        };

        let response = self
            .client
            .post(&self.base_url)
            .timeout(REQUEST_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: CloudEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        data.into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding returned".to_string()))
    }
}

#[async_trait]
impl EmbeddingProvider for CloudEmbeddings {
    async fn embed(
        &self,
        text: &str,
        token: &CancellationToken,
    ) -> Result<Option<Vec<f32>>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        debug!("embedding {} chars via {}", text.len(), self.base_url);

        let result = retry_with_backoff(
            &self.retry,
            token,
            "cloud embedding request",
            EmbeddingError::is_transient,
            || async {
                or_cancel(self.request_embedding(text), token)
                    .await
                    .map_err(EmbeddingError::from)?
            },
        )
        .await;

        match result {
            Ok(vector) => Ok(Some(vector)),
            Err(EmbeddingError::Cancelled) => Err(EmbeddingError::Cancelled),
            Err(e) => {
                warn!("embedding failed after retries: {e}");
                Ok(None)
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let provider = CloudEmbeddings::new("test-key".to_string(), None);
        assert_eq!(provider.model_name(), DEFAULT_MODEL);
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn custom_model_and_base_url() {
        let provider = CloudEmbeddings::new("k".to_string(), Some("custom/model".to_string()))
            .with_base_url("http://localhost:8080/embeddings".to_string());
        assert_eq!(provider.model_name(), "custom/model");
        assert_eq!(provider.base_url, "http://localhost:8080/embeddings");
    }

    #[test]
    fn empty_base_url_override_keeps_default() {
        let provider = CloudEmbeddings::new("k".to_string(), None).with_base_url(String::new());
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }

    #[tokio::test]
    async fn empty_input_is_a_caller_error() {
        let provider = CloudEmbeddings::new("k".to_string(), None);
        let token = CancellationToken::new();
        let out = provider.embed("", &token).await;
        assert!(matches!(out, Err(EmbeddingError::EmptyInput)));
    }
}
