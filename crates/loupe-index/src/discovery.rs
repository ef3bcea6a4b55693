//! Candidate-file discovery.
//!
//! Enumerating a source tree (and resolving ignore semantics) is delegated
//! to the `ignore` crate's walker; the pipeline consumes it through the
//! [`FileDiscovery`] trait so tests can substitute a fixed file list. The
//! same filters answer single-path questions for the incremental watcher.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::config::DiscoverySettings;

/// Produces the bounded candidate list for an indexing run.
pub trait FileDiscovery: Send + Sync {
    /// Absolute paths of all candidate files, capped at the configured
    /// maximum.
    fn discover(&self) -> Result<Vec<PathBuf>>;

    /// Whether a single path would be a candidate. Used by the watcher to
    /// apply the same include/exclude and extension filters as a full run.
    fn matches(&self, path: &Path) -> bool;
}

/// Include/exclude globs plus extension filter, evaluated against paths
/// relative to the indexed root.
pub struct PathFilters {
    root: PathBuf,
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
    extensions: Vec<String>,
}

impl PathFilters {
    pub fn new(root: PathBuf, settings: &DiscoverySettings) -> Result<Self> {
        Ok(Self {
            root,
            include: build_globset(&settings.include).context("invalid include pattern")?,
            exclude: build_globset(&settings.exclude).context("invalid exclude pattern")?,
            extensions: settings.extensions.clone(),
        })
    }

    pub fn matches(&self, path: &Path) -> bool {
        if !self.extensions.is_empty() {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !self.extensions.iter().any(|e| e == ext) {
                return false;
            }
        }

        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        if let Some(include) = &self.include {
            if !include.is_match(rel) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(rel) {
                return false;
            }
        }
        true
    }
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("bad glob {pattern:?}"))?);
    }
    Ok(Some(builder.build()?))
}

/// Walks the root directory honoring ignore files.
pub struct WalkDiscovery {
    root: PathBuf,
    filters: PathFilters,
    max_files: usize,
    respect_gitignore: bool,
}

impl WalkDiscovery {
    pub fn new(root: PathBuf, settings: &DiscoverySettings) -> Result<Self> {
        let filters = PathFilters::new(root.clone(), settings)?;
        Ok(Self {
            root,
            filters,
            max_files: settings.max_files,
            respect_gitignore: settings.respect_gitignore,
        })
    }
}

impl FileDiscovery for WalkDiscovery {
    fn discover(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(self.respect_gitignore)
            .git_global(self.respect_gitignore)
            .build();

        for entry in walker.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() || !self.filters.matches(path) {
                continue;
            }

            if files.len() >= self.max_files {
                warn!(
                    "candidate list capped at {} files, remainder not indexed",
                    self.max_files
                );
                break;
            }
            files.push(path.to_path_buf());
        }

        debug!("discovered {} candidate files under {:?}", files.len(), self.root);
        Ok(files)
    }

    fn matches(&self, path: &Path) -> bool {
        self.filters.matches(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn settings() -> DiscoverySettings {
        DiscoverySettings {
            extensions: vec!["rs".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn walks_only_matching_extensions() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();
        fs::write(dir.path().join("b.txt"), "not code").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/c.rs"), "fn c() {}").unwrap();

        let discovery = WalkDiscovery::new(dir.path().to_path_buf(), &settings()).unwrap();
        let mut files = discovery.discover().unwrap();
        files.sort();

        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["a.rs", "sub/c.rs"]);
    }

    #[test]
    fn include_and_exclude_globs_apply() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("gen")).unwrap();
        fs::write(dir.path().join("src/a.rs"), "fn a() {}").unwrap();
        fs::write(dir.path().join("gen/b.rs"), "fn b() {}").unwrap();

        let mut cfg = settings();
        cfg.exclude = vec!["gen/**".to_string()];
        let discovery = WalkDiscovery::new(dir.path().to_path_buf(), &cfg).unwrap();
        let files = discovery.discover().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("src/a.rs"));

        let mut cfg = settings();
        cfg.include = vec!["src/**".to_string()];
        let discovery = WalkDiscovery::new(dir.path().to_path_buf(), &cfg).unwrap();
        let files = discovery.discover().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("src/a.rs"));
    }

    #[test]
    fn max_files_caps_the_list() {
        let dir = tempdir().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("f{i}.rs")), "fn f() {}").unwrap();
        }

        let mut cfg = settings();
        cfg.max_files = 3;
        let discovery = WalkDiscovery::new(dir.path().to_path_buf(), &cfg).unwrap();
        assert_eq!(discovery.discover().unwrap().len(), 3);
    }

    #[test]
    fn matches_mirrors_full_run_filters() {
        let dir = tempdir().unwrap();
        let mut cfg = settings();
        cfg.exclude = vec!["vendor/**".to_string()];
        let discovery = WalkDiscovery::new(dir.path().to_path_buf(), &cfg).unwrap();

        assert!(discovery.matches(&dir.path().join("src/main.rs")));
        assert!(!discovery.matches(&dir.path().join("src/main.txt")));
        assert!(!discovery.matches(&dir.path().join("vendor/lib.rs")));
    }

    #[test]
    fn bad_glob_is_reported() {
        let mut cfg = settings();
        cfg.include = vec!["[".to_string()];
        let dir = tempdir().unwrap();
        assert!(WalkDiscovery::new(dir.path().to_path_buf(), &cfg).is_err());
    }
}
