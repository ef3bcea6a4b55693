//! Embedding provider trait and implementations.
//!
//! This module defines the interface for turning text into fixed-length
//! vectors and provides one implementation per backend kind: a local HTTP
//! embedding service ([`LocalEmbeddings`]) and a cloud key-based API
//! ([`CloudEmbeddings`]). The backend is selected by configuration at
//! construction time.

mod cloud;
mod local;

pub use cloud::CloudEmbeddings;
pub use local::LocalEmbeddings;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cancel::Cancelled;
use crate::config::{EmbeddingBackend, EmbeddingSettings};
use crate::retry::RetryPolicy;

/// Dimension used when the probe request fails.
pub const FALLBACK_DIMENSIONS: usize = 768;

/// Fixed text embedded once to discover the backend's vector length.
pub const PROBE_TEXT: &str = "dimension probe";

/// Per-request timeout, independent of run-level cancellation.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur during embedding generation.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding input must not be empty")]
    EmptyInput,

    #[error("operation cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl EmbeddingError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<Cancelled> for EmbeddingError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Trait for embedding providers.
///
/// `embed` retries transient failures internally; once the retry budget is
/// spent it reports `Ok(None)` (soft failure) so the caller can drop a
/// single chunk without aborting the run. Cancellation is the one condition
/// surfaced as an error, so callers can tell "skip this chunk" apart from
/// "abort the run".
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single non-empty text.
    async fn embed(
        &self,
        text: &str,
        token: &CancellationToken,
    ) -> Result<Option<Vec<f32>>, EmbeddingError>;

    /// Discover the backend's vector length by embedding a probe string.
    ///
    /// Falls back to [`FALLBACK_DIMENSIONS`] when the probe fails.
    async fn detect_dimension(&self, token: &CancellationToken) -> Result<usize, EmbeddingError> {
        match self.embed(PROBE_TEXT, token).await {
            Ok(Some(vector)) if !vector.is_empty() => Ok(vector.len()),
            Err(EmbeddingError::Cancelled) => Err(EmbeddingError::Cancelled),
            Ok(_) | Err(_) => {
                warn!(
                    "dimension probe failed for {}, falling back to {} dimensions",
                    self.model_name(),
                    FALLBACK_DIMENSIONS
                );
                Ok(FALLBACK_DIMENSIONS)
            }
        }
    }

    /// Model identifier used by this provider.
    fn model_name(&self) -> &str;
}

/// Build a provider from settings.
pub fn provider_from_settings(
    settings: &EmbeddingSettings,
    retry: RetryPolicy,
) -> Arc<dyn EmbeddingProvider> {
    match settings.backend {
        EmbeddingBackend::Local => Arc::new(
            LocalEmbeddings::new(settings.base_url.clone(), settings.model.clone())
                .with_retry(retry),
        ),
        EmbeddingBackend::Cloud => Arc::new(
            CloudEmbeddings::new(
                settings.api_key.clone().unwrap_or_default(),
                Some(settings.model.clone()),
            )
            .with_base_url(settings.base_url.clone())
            .with_retry(retry),
        ),
    }
}
