//! Content hashing and snapshot scoping

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::{DirEntry, WalkDir};

use crate::error::SafetyResult;

/// Directory names never captured in a snapshot
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    ".tox",
    ".nox",
    "build",
    "dist",
    ".venv",
    "venv",
    "node_modules",
];

/// Decides which parts of a project tree belong to a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotScope {
    excluded_dirs: BTreeSet<String>,
    state_dir: String,
}

impl SnapshotScope {
    /// Create a scope excluding the default directories and `state_dir`
    pub fn new(state_dir: impl Into<String>) -> Self {
        Self {
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|d| d.to_string()).collect(),
            state_dir: state_dir.into(),
        }
    }

    /// Replace the excluded directory names
    pub fn with_excluded_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    pub fn state_dir(&self) -> &str {
        &self.state_dir
    }

    /// Whether a directory with this name is left out of snapshots
    pub fn is_excluded_dir(&self, name: &str) -> bool {
        name == self.state_dir || self.excluded_dirs.contains(name) || name.ends_with(".egg-info")
    }

    fn keep(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        entry
            .file_name()
            .to_str()
            .map(|name| !self.is_excluded_dir(name))
            .unwrap_or(true)
    }

    /// Relative paths of every snapshot-eligible regular file, sorted
    pub fn collect_files(&self, root: &Path) -> SafetyResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).into_iter().filter_entry(|e| self.keep(e)) {
            let entry = entry?;
            if entry.file_type().is_file() {
                if let Ok(relative) = entry.path().strip_prefix(root) {
                    files.push(relative.to_path_buf());
                }
            }
        }
        files.sort_by_key(|path| relative_key(path));
        Ok(files)
    }

    /// Relative paths of every snapshot-eligible directory below `root`
    pub fn collect_dirs(&self, root: &Path) -> SafetyResult<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| self.keep(e))
        {
            let entry = entry?;
            if entry.file_type().is_dir() {
                if let Ok(relative) = entry.path().strip_prefix(root) {
                    dirs.push(relative.to_path_buf());
                }
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

impl Default for SnapshotScope {
    fn default() -> Self {
        Self::new(".reshaper")
    }
}

/// Hash and size totals of a directory tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeDigest {
    pub hash: String,
    pub file_count: usize,
    pub total_bytes: u64,
}

/// Verifies file integrity through content hashing
#[derive(Debug, Clone, Default)]
pub struct ContentVerifier;

impl ContentVerifier {
    /// Creates a new ContentVerifier instance
    pub fn new() -> Self {
        ContentVerifier
    }

    /// Computes SHA-256 hash of content
    ///
    /// # Arguments
    ///
    /// * `content` - The content to hash
    ///
    /// # Returns
    ///
    /// Hexadecimal string representation of the SHA-256 hash
    pub fn compute_hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        format!("{:x}", hasher.finalize())
    }

    /// Computes the SHA-256 digest of a set of files below `root`
    ///
    /// Files are hashed in sorted `/`-separated relative path order. Each file
    /// contributes its path, a zero byte, its length (little-endian u64) and
    /// its bytes, so moving content between files changes the digest.
    ///
    /// # Arguments
    ///
    /// * `root` - Directory the relative paths are resolved against
    /// * `files` - Relative file paths
    pub fn digest_files(root: &Path, files: &[PathBuf]) -> SafetyResult<TreeDigest> {
        let mut ordered: Vec<(String, &PathBuf)> =
            files.iter().map(|path| (relative_key(path), path)).collect();
        ordered.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = Sha256::new();
        let mut total_bytes = 0u64;
        for (key, path) in &ordered {
            let content = fs::read(root.join(path))?;
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update((content.len() as u64).to_le_bytes());
            hasher.update(&content);
            total_bytes += content.len() as u64;
        }

        Ok(TreeDigest {
            hash: format!("{:x}", hasher.finalize()),
            file_count: ordered.len(),
            total_bytes,
        })
    }

    /// Computes the digest of every regular file below `root`
    pub fn digest_tree(root: &Path) -> SafetyResult<TreeDigest> {
        let (_, files) = tree_entries(root)?;
        Self::digest_files(root, &files)
    }
}

/// Relative directories and regular files below `root`, unfiltered and sorted
pub fn tree_entries(root: &Path) -> SafetyResult<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry?;
        let relative = match entry.path().strip_prefix(root) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => continue,
        };
        if entry.file_type().is_dir() {
            dirs.push(relative);
        } else if entry.file_type().is_file() {
            files.push(relative);
        }
    }
    dirs.sort();
    files.sort_by_key(|path| relative_key(path));
    Ok((dirs, files))
}

/// `/`-separated form of a relative path, independent of the platform
pub fn relative_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
