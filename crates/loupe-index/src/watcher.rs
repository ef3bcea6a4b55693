//! Incremental sync watcher.
//!
//! Subscribes to filesystem notifications for the indexed root, coalesces
//! bursts of events per path behind a debounce window, and feeds single-file
//! updates and deletes back through the pipeline without a full re-scan.
//! Changes to ignore-pattern files trigger a full re-index followed by a
//! purge of newly ignored paths.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pipeline::{IndexPipeline, PipelineError};

/// Ignore-pattern files whose changes invalidate the candidate set.
pub const IGNORE_FILES: &[&str] = &[".gitignore", ".ignore"];

/// How often the debouncer flushes expired entries.
const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Errors that can occur in the file watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("failed to create watcher: {0}")]
    Create(String),

    #[error("failed to watch path: {0}")]
    Watch(String),
}

/// Debounced filesystem events emitted by the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    /// An ignore-pattern file changed; the whole candidate set is suspect.
    IgnoreRulesChanged(PathBuf),
}

impl FileEvent {
    fn path(&self) -> &Path {
        match self {
            Self::Created(p) | Self::Modified(p) | Self::Deleted(p) | Self::IgnoreRulesChanged(p) => p,
        }
    }
}

/// Whether a path names an ignore-pattern file.
pub fn is_ignore_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| IGNORE_FILES.contains(&n))
        .unwrap_or(false)
}

/// Configuration for the file watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Quiet period after the last event for a path before it is emitted.
    pub debounce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
        }
    }
}

/// Watches a directory tree and emits debounced [`FileEvent`]s.
pub struct FileWatcher {
    config: WatcherConfig,
    root_path: PathBuf,
    // The notify watcher stops when dropped; keep it alive while watching.
    _watcher: Option<RecommendedWatcher>,
}

impl FileWatcher {
    pub fn new(root_path: PathBuf, config: WatcherConfig) -> Self {
        Self {
            config,
            root_path,
            _watcher: None,
        }
    }

    /// Start watching and return the channel of debounced events.
    pub fn start(&mut self) -> Result<mpsc::Receiver<FileEvent>, WatcherError> {
        let (raw_tx, raw_rx) = mpsc::channel::<FileEvent>(100);
        let (debounced_tx, debounced_rx) = mpsc::channel(100);
        let debounce = self.config.debounce;

        let watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                for file_event in convert_event(event) {
                    // Best effort; a full channel only delays the event.
                    let _ = raw_tx.blocking_send(file_event);
                }
            }
        })
        .map_err(|e| WatcherError::Create(e.to_string()))?;

        self._watcher = Some(watcher);
        if let Some(watcher) = self._watcher.as_mut() {
            watcher
                .watch(&self.root_path, RecursiveMode::Recursive)
                .map_err(|e| WatcherError::Watch(e.to_string()))?;
        }

        tokio::spawn(debounce_loop(raw_rx, debounced_tx, debounce));

        info!("watching {:?} with {debounce:?} debounce", self.root_path);
        Ok(debounced_rx)
    }

    /// Stop watching.
    pub fn stop(&mut self) {
        self._watcher = None;
        info!("stopped watching {:?}", self.root_path);
    }

    pub fn is_watching(&self) -> bool {
        self._watcher.is_some()
    }
}

/// Map a raw notify event to pipeline-level events.
fn convert_event(event: Event) -> Vec<FileEvent> {
    let mut out = Vec::new();
    for path in event.paths {
        if is_ignore_file(&path) {
            out.push(FileEvent::IgnoreRulesChanged(path));
            continue;
        }
        let file_event = match event.kind {
            notify::EventKind::Create(_) => Some(FileEvent::Created(path)),
            notify::EventKind::Modify(_) => Some(FileEvent::Modified(path)),
            notify::EventKind::Remove(_) => Some(FileEvent::Deleted(path)),
            _ => None,
        };
        if let Some(fe) = file_event {
            out.push(fe);
        }
    }
    out
}

/// Collapse per-path event bursts, emitting each path once the debounce
/// window elapses with no further activity.
async fn debounce_loop(
    mut raw_rx: mpsc::Receiver<FileEvent>,
    tx: mpsc::Sender<FileEvent>,
    window: Duration,
) {
    let mut pending: HashMap<PathBuf, (FileEvent, Instant)> = HashMap::new();

    loop {
        match tokio::time::timeout(TICK_INTERVAL, raw_rx.recv()).await {
            Ok(Some(event)) => {
                let path = event.path().to_path_buf();
                let now = Instant::now();
                pending
                    .entry(path)
                    .and_modify(|(existing, seen)| {
                        *existing = merge_events(existing, &event);
                        *seen = now;
                    })
                    .or_insert((event, now));
            }
            Ok(None) => {
                // Source closed; flush what is left and stop.
                for (_, (event, _)) in pending.drain() {
                    let _ = tx.send(event).await;
                }
                break;
            }
            Err(_) => {}
        }

        let now = Instant::now();
        let mut due = Vec::new();
        pending.retain(|_, (event, seen)| {
            if now.duration_since(*seen) >= window {
                due.push(event.clone());
                false
            } else {
                true
            }
        });

        for event in due {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
}

/// Collapse two events for the same path into the one that matters.
///
/// Delete is the final state regardless of what preceded it; a created file
/// that is then modified is still just created.
fn merge_events(existing: &FileEvent, incoming: &FileEvent) -> FileEvent {
    match (existing, incoming) {
        (FileEvent::Deleted(p), _) | (_, FileEvent::Deleted(p)) => FileEvent::Deleted(p.clone()),
        (FileEvent::Created(p), FileEvent::Modified(_)) => FileEvent::Created(p.clone()),
        _ => incoming.clone(),
    }
}

/// Drains watcher events into the pipeline.
pub struct SyncService {
    watcher: FileWatcher,
    pipeline: Arc<IndexPipeline>,
    shutdown: CancellationToken,
}

impl SyncService {
    pub fn new(watcher: FileWatcher, pipeline: Arc<IndexPipeline>) -> Self {
        Self {
            watcher,
            pipeline,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the service (and any in-flight single-file work)
    /// when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Process events until the channel closes or shutdown is requested.
    pub async fn run(mut self) -> Result<(), WatcherError> {
        let mut rx = self.watcher.start()?;

        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle(event).await;
        }

        info!("incremental sync stopped");
        Ok(())
    }

    async fn handle(&self, event: FileEvent) {
        let token = self.shutdown.clone();
        match event {
            FileEvent::Created(path) | FileEvent::Modified(path) => {
                debug!("file changed: {path:?}");
                if let Err(e) = self.pipeline.update_file(&path, &token).await {
                    error!("failed to update {path:?}: {e}");
                }
            }
            FileEvent::Deleted(path) => {
                debug!("file deleted: {path:?}");
                if let Err(e) = self.pipeline.remove_file(&path, &token).await {
                    error!("failed to remove {path:?} from index: {e}");
                }
            }
            FileEvent::IgnoreRulesChanged(path) => {
                info!("ignore rules changed ({path:?}), re-indexing repository");
                match self.pipeline.start().await {
                    Ok(_) => match self.pipeline.purge_excluded(&token).await {
                        Ok(0) => {}
                        Ok(n) => info!("purged {n} newly ignored files"),
                        Err(e) => error!("purge after ignore change failed: {e}"),
                    },
                    Err(PipelineError::Busy) => {
                        warn!("re-index deferred: a run is already in progress");
                    }
                    Err(e) => error!("re-index after ignore change failed: {e}"),
                }
            }
        }
    }
}
