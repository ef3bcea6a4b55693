//! Durable index metadata.
//!
//! Tracks, per repository root, the last successful run and the content hash
//! of every indexed file. The per-file hashes drive change detection; the
//! repo-level record exists for staleness display. Metadata lives in
//! host-scoped storage (not inside the repository being indexed) so it
//! survives restarts, and every write replaces the file atomically via a
//! temp-file rename: a crash leaves either the previous or the new state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Directory under the platform data dir holding loupe state.
pub const DEFAULT_META_DIR: &str = "loupe";

/// Metadata file name.
pub const META_FILE: &str = "index-meta.json";

/// Per-repository record of the last successful indexing pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoIndexState {
    /// Repository identifier.
    pub repo_id: String,
    /// Digest summarizing the last completed run.
    pub last_hash: String,
    /// When the run completed, epoch milliseconds.
    pub last_indexed: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RepoRecord {
    /// Set once a full run completes; absent while only per-file state exists.
    last_hash: Option<String>,
    last_indexed: Option<i64>,
    /// Relative file path -> content hash of the last indexed version.
    files: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MetaState {
    version: u32,
    repos: HashMap<String, RepoRecord>,
}

/// Errors that can occur persisting metadata.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize metadata: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Durable store of per-repository indexing state.
pub struct MetaStore {
    path: PathBuf,
    state: Mutex<MetaState>,
}

impl MetaStore {
    /// Open (or create) the store at an explicit path.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MetaError> {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<MetaState>(&content) {
                Ok(state) => state,
                Err(e) => {
                    // Corrupt metadata only costs a re-index; start fresh.
                    warn!("metadata at {:?} is unreadable ({e}), starting empty", path);
                    MetaState::default()
                }
            },
            Err(_) => MetaState {
                version: 1,
                ..Default::default()
            },
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Open the store at the default host-scoped location.
    pub fn open_default() -> Result<Self, MetaError> {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::open(base.join(DEFAULT_META_DIR).join(META_FILE))
    }

    /// Repo-level state, `None` if the repository was never fully indexed.
    pub fn get(&self, repo_id: &str) -> Option<RepoIndexState> {
        let state = self.state.lock().expect("meta lock poisoned");
        let record = state.repos.get(repo_id)?;
        Some(RepoIndexState {
            repo_id: repo_id.to_string(),
            last_hash: record.last_hash.clone()?,
            last_indexed: record.last_indexed?,
        })
    }

    /// All repositories with a completed run on record.
    pub fn get_all(&self) -> Vec<RepoIndexState> {
        let state = self.state.lock().expect("meta lock poisoned");
        state
            .repos
            .iter()
            .filter_map(|(repo_id, record)| {
                Some(RepoIndexState {
                    repo_id: repo_id.clone(),
                    last_hash: record.last_hash.clone()?,
                    last_indexed: record.last_indexed?,
                })
            })
            .collect()
    }

    /// Record a completed run for the repository.
    pub fn update(&self, repo_id: &str, hash: &str) -> Result<(), MetaError> {
        let mut state = self.state.lock().expect("meta lock poisoned");
        let record = state.repos.entry(repo_id.to_string()).or_default();
        record.last_hash = Some(hash.to_string());
        record.last_indexed = Some(now_millis());
        self.persist(&state)
    }

    /// Drop the repository and all of its per-file state.
    pub fn remove(&self, repo_id: &str) -> Result<(), MetaError> {
        let mut state = self.state.lock().expect("meta lock poisoned");
        state.repos.remove(repo_id);
        self.persist(&state)
    }

    /// Content hash of a file as of its last indexing, if any.
    pub fn file_hash(&self, repo_id: &str, file_path: &str) -> Option<String> {
        let state = self.state.lock().expect("meta lock poisoned");
        state.repos.get(repo_id)?.files.get(file_path).cloned()
    }

    /// Record a file as indexed at the given content hash.
    pub fn record_file(&self, repo_id: &str, file_path: &str, hash: &str) -> Result<(), MetaError> {
        let mut state = self.state.lock().expect("meta lock poisoned");
        state
            .repos
            .entry(repo_id.to_string())
            .or_default()
            .files
            .insert(file_path.to_string(), hash.to_string());
        self.persist(&state)
    }

    /// Forget a file (deleted or newly excluded).
    pub fn remove_file(&self, repo_id: &str, file_path: &str) -> Result<(), MetaError> {
        let mut state = self.state.lock().expect("meta lock poisoned");
        if let Some(record) = state.repos.get_mut(repo_id) {
            record.files.remove(file_path);
        }
        self.persist(&state)
    }

    /// Paths of all files currently on record for the repository.
    pub fn files_for_repo(&self, repo_id: &str) -> Vec<String> {
        let state = self.state.lock().expect("meta lock poisoned");
        state
            .repos
            .get(repo_id)
            .map(|r| r.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Write the full state to disk, atomically.
    fn persist(&self, state: &MetaState) -> Result<(), MetaError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(state).map_err(MetaError::Serialize)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("metadata persisted to {:?}", self.path);
        Ok(())
    }
}

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> MetaStore {
        MetaStore::open(dir.join(META_FILE)).unwrap()
    }

    #[test]
    fn missing_repo_reads_as_none() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.get("nope").is_none());
        assert!(store.file_hash("nope", "a.rs").is_none());
        assert!(store.files_for_repo("nope").is_empty());
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn update_sets_hash_and_timestamp() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        store.update("repo", "abc123").unwrap();
        let state = store.get("repo").unwrap();
        assert_eq!(state.repo_id, "repo");
        assert_eq!(state.last_hash, "abc123");
        assert!(state.last_indexed > 0);
    }

    #[test]
    fn file_hashes_round_trip() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        store.record_file("repo", "src/a.rs", "h1").unwrap();
        store.record_file("repo", "src/b.rs", "h2").unwrap();

        assert_eq!(store.file_hash("repo", "src/a.rs"), Some("h1".into()));
        assert_eq!(store.file_hash("repo", "src/b.rs"), Some("h2".into()));

        let mut files = store.files_for_repo("repo");
        files.sort();
        assert_eq!(files, vec!["src/a.rs", "src/b.rs"]);

        store.remove_file("repo", "src/a.rs").unwrap();
        assert!(store.file_hash("repo", "src/a.rs").is_none());
    }

    #[test]
    fn per_file_state_without_completed_run_is_not_a_repo_state() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        store.record_file("repo", "src/a.rs", "h1").unwrap();
        assert!(store.get("repo").is_none());

        store.update("repo", "run-digest").unwrap();
        assert!(store.get("repo").is_some());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = store_in(dir.path());
            store.record_file("repo", "src/a.rs", "h1").unwrap();
            store.update("repo", "digest").unwrap();
        }

        let reopened = store_in(dir.path());
        assert_eq!(reopened.get("repo").unwrap().last_hash, "digest");
        assert_eq!(reopened.file_hash("repo", "src/a.rs"), Some("h1".into()));
    }

    #[test]
    fn remove_drops_repo_and_files() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        store.record_file("repo", "src/a.rs", "h1").unwrap();
        store.update("repo", "digest").unwrap();
        store.remove("repo").unwrap();

        assert!(store.get("repo").is_none());
        assert!(store.file_hash("repo", "src/a.rs").is_none());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(META_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        let store = MetaStore::open(&path).unwrap();
        assert!(store.get_all().is_empty());

        // And the store is usable afterwards.
        store.update("repo", "h").unwrap();
        assert!(store.get("repo").is_some());
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.update("repo", "h").unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }
}
