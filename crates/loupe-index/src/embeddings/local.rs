//! Local HTTP embedding service backend.
//!
//! Speaks the single-prompt contract of self-hosted embedding servers:
//! `POST {base_url}/embeddings` with `{"model", "prompt"}`, answered by
//! `{"embedding": [..]}`. Non-2xx responses carry a textual error body.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{EmbeddingError, EmbeddingProvider, REQUEST_TIMEOUT};
use crate::cancel::or_cancel;
use crate::retry::{retry_with_backoff, RetryPolicy};

#[derive(Serialize)]
struct LocalEmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct LocalEmbeddingResponse {
    embedding: Vec<f32>,
}

/// Embedding provider backed by a local HTTP service.
pub struct LocalEmbeddings {
    base_url: String,
    model: String,
    client: Client,
    retry: RetryPolicy,
}

impl LocalEmbeddings {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = LocalEmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(self.endpoint())
            .timeout(REQUEST_TIMEOUT)
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

        let parsed: LocalEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if parsed.embedding.is_empty() {
            return Err(EmbeddingError::InvalidResponse(
                "empty embedding vector".to_string(),
            ));
        }

        Ok(parsed.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddings {
    async fn embed(
        &self,
        text: &str,
        token: &CancellationToken,
    ) -> Result<Option<Vec<f32>>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        debug!("embedding {} chars via {}", text.len(), self.endpoint());

        let result = retry_with_backoff(
            &self.retry,
            token,
            "local embedding request",
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
    use crate::embeddings::FALLBACK_DIMENSIONS;
    use std::time::Duration;

    fn unreachable_provider() -> LocalEmbeddings {
        // Nothing listens on port 1; connections fail immediately.
        LocalEmbeddings::new("http://127.0.0.1:1".to_string(), "test-model".to_string())
            .with_retry(RetryPolicy {
                max_attempts: 1,
                initial_delay: Duration::from_millis(1),
            })
    }

    #[test]
    fn endpoint_joins_base_url() {
        let provider = LocalEmbeddings::new(
            "http://localhost:11434/api/".to_string(),
            "nomic-embed-text".to_string(),
        );
        assert_eq!(provider.endpoint(), "http://localhost:11434/api/embeddings");
        assert_eq!(provider.model_name(), "nomic-embed-text");
    }

    #[tokio::test]
    async fn empty_input_is_a_caller_error() {
        let provider = unreachable_provider();
        let token = CancellationToken::new();
        let out = provider.embed("   ", &token).await;
        assert!(matches!(out, Err(EmbeddingError::EmptyInput)));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_soft_failure() {
        let provider = unreachable_provider();
        let token = CancellationToken::new();
        let out = provider.embed("some text", &token).await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn cancelled_token_is_not_a_soft_failure() {
        let provider = unreachable_provider();
        let token = CancellationToken::new();
        token.cancel();
        let out = provider.embed("some text", &token).await;
        assert!(matches!(out, Err(EmbeddingError::Cancelled)));
    }

    #[tokio::test]
    async fn probe_failure_falls_back_to_default_dimension() {
        let provider = unreachable_provider();
        let token = CancellationToken::new();
        let dim = provider.detect_dimension(&token).await.unwrap();
        assert_eq!(dim, FALLBACK_DIMENSIONS);
    }
}
