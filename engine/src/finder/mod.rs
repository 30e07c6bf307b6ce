//! Plugin discovery
//!
//! The finder walks each configured root and collects every `plugin.json` it
//! can reach. It knows nothing about manifests beyond their file name: parsing
//! and validation belong to the loader.
//!
//! Each root is walked on its own blocking worker and all roots are walked
//! concurrently. A root that is missing or unreadable contributes no results
//! and never affects the other roots. The combined result is deduplicated and
//! sorted so that it does not depend on directory enumeration order.

use futures::future::join_all;
use sdk::descriptor::PLUGIN_MANIFEST_FILENAME;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directory names that are never descended into
pub const DEFAULT_SKIP_DIRS: [&str; 2] = ["node_modules", ".git"];

/// Recursive manifest finder
#[derive(Debug, Clone)]
pub struct Finder {
    skip_dirs: Vec<String>,
}

impl Default for Finder {
    fn default() -> Self {
        Self {
            skip_dirs: DEFAULT_SKIP_DIRS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Finder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prune an additional directory name during traversal
    pub fn with_skip_dir(mut self, name: impl Into<String>) -> Self {
        self.skip_dirs.push(name.into());
        self
    }

    /// Find every manifest under `roots`
    ///
    /// Never fails: problems with individual roots or entries are logged.
    pub async fn find(&self, roots: &[PathBuf]) -> Vec<PathBuf> {
        let scans = roots.iter().cloned().map(|root| {
            let finder = self.clone();
            tokio::task::spawn_blocking(move || finder.scan_root(&root))
        });

        let mut found: Vec<PathBuf> = join_all(scans)
            .await
            .into_iter()
            .filter_map(|result| match result {
                Ok(paths) => Some(paths),
                Err(e) => {
                    tracing::error!("Plugin root scan task failed: {}", e);
                    None
                }
            })
            .flatten()
            .collect();

        found.sort();
        found.dedup();

        tracing::debug!("Found {} plugin manifest(s) in {} root(s)", found.len(), roots.len());
        found
    }

    /// Walk a single root synchronously
    pub fn scan_root(&self, root: &Path) -> Vec<PathBuf> {
        if !root.exists() {
            tracing::warn!(path = %root.display(), "Plugin root does not exist, skipping");
            return Vec::new();
        }
        if !root.is_dir() {
            tracing::warn!(path = %root.display(), "Plugin root is not a directory, skipping");
            return Vec::new();
        }

        let mut found = Vec::new();

        // follow_links reports symlink loops as errors instead of recursing forever
        let walker = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.is_pruned(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(root = %root.display(), "Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if entry.file_type().is_file() && entry.file_name() == PLUGIN_MANIFEST_FILENAME {
                tracing::debug!(path = %entry.path().display(), "Found plugin manifest");
                found.push(entry.into_path());
            }
        }

        found
    }

    fn is_pruned(&self, entry: &walkdir::DirEntry) -> bool {
        entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .map(|name| self.skip_dirs.iter().any(|skip| skip == name))
                .unwrap_or(false)
    }
}
