//! Pipeline configuration.
//!
//! Settings are plain serde structs with defaults, loadable from a file
//! and/or `LOUPE_*` environment variables, and validated before a run.
//! Ownership of where the values come from (settings UI, editor state)
//! stays with the embedding host; this module only deserializes and checks
//! them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Errors producing usable settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which embedding backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Self-hosted HTTP embedding service.
    Local,
    /// Hosted key-authenticated API.
    Cloud,
}

/// Embedding provider settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Local,
            base_url: "http://localhost:11434/api".to_string(),
            api_key: None,
            model: "nomic-embed-text".to_string(),
        }
    }
}

/// Vector store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub url: String,
    pub api_key: Option<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
        }
    }
}

/// Candidate-file discovery settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Include globs, relative to the root. Empty means everything.
    pub include: Vec<String>,
    /// Exclude globs, relative to the root.
    pub exclude: Vec<String>,
    /// File extensions considered indexable.
    pub extensions: Vec<String>,
    /// Hard cap on candidate files per run.
    pub max_files: usize,
    /// Whether to honor .gitignore files.
    pub respect_gitignore: bool,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            extensions: vec![
                "rs".to_string(),
                "py".to_string(),
                "js".to_string(),
                "ts".to_string(),
                "go".to_string(),
                "java".to_string(),
                "md".to_string(),
            ],
            max_files: 5000,
            respect_gitignore: true,
        }
    }
}

/// Query path settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Maximum number of results to return.
    pub limit: usize,
    /// Hits scoring below this are dropped client-side.
    pub score_threshold: f32,
    /// Trimmed queries shorter than this are treated as "no search".
    pub min_query_len: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            limit: 10,
            score_threshold: 0.4,
            min_query_len: 3,
        }
    }
}

/// Incremental sync settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Quiet period after the last file event before processing, in ms.
    pub debounce_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

impl WatchSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Retry settings for the network clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
        }
    }
}

/// Complete configuration for one indexed repository root.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Identifier of the repository root; scopes metadata and point payloads.
    pub repo_id: String,
    /// Directory to index.
    pub root_path: PathBuf,
    /// Vector store collection holding this codebase's points.
    pub collection: String,
    pub embedding: EmbeddingSettings,
    pub store: StoreSettings,
    pub discovery: DiscoverySettings,
    pub search: SearchSettings,
    pub watch: WatchSettings,
    pub retry: RetrySettings,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            repo_id: String::new(),
            root_path: PathBuf::from("."),
            collection: crate::DEFAULT_COLLECTION.to_string(),
            embedding: EmbeddingSettings::default(),
            store: StoreSettings::default(),
            discovery: DiscoverySettings::default(),
            search: SearchSettings::default(),
            watch: WatchSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl IndexSettings {
    /// Load settings from an optional file plus `LOUPE_*` environment
    /// variables (nested fields separated by `__`).
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix("LOUPE").separator("__"));

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check the settings before any heavy work.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.repo_id.trim().is_empty() {
            return Err(SettingsError::Invalid("repo_id must not be empty".into()));
        }
        if self.collection.trim().is_empty() {
            return Err(SettingsError::Invalid("collection must not be empty".into()));
        }
        if self.embedding.base_url.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "embedding.base_url must not be empty".into(),
            ));
        }
        if self.embedding.backend == EmbeddingBackend::Cloud
            && self.embedding.api_key.as_deref().unwrap_or("").is_empty()
        {
            return Err(SettingsError::Invalid(
                "embedding.api_key is required for the cloud backend".into(),
            ));
        }
        if self.store.url.trim().is_empty() {
            return Err(SettingsError::Invalid("store.url must not be empty".into()));
        }
        if self.search.limit == 0 {
            return Err(SettingsError::Invalid("search.limit must be at least 1".into()));
        }
        if !(-1.0..=1.0).contains(&self.search.score_threshold) {
            return Err(SettingsError::Invalid(
                "search.score_threshold must be within [-1, 1]".into(),
            ));
        }
        if self.discovery.max_files == 0 {
            return Err(SettingsError::Invalid(
                "discovery.max_files must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
