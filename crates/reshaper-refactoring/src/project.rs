//! Project tree layout: source discovery and module path resolution

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use reshaper_safety::SnapshotScope;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::EngineConfig;
use crate::error::{RefactoringError, Result};

pub const SOURCE_EXTENSION: &str = "py";
pub const AGGREGATOR_FILE: &str = "__init__.py";

/// A Python project rooted at a directory
#[derive(Debug, Clone)]
pub struct ProjectTree {
    root: PathBuf,
    scope: SnapshotScope,
}

impl ProjectTree {
    /// Creates a new ProjectTree instance
    ///
    /// # Arguments
    ///
    /// * `root` - Project root directory
    /// * `config` - Supplies the state directory and excluded directory names
    pub fn new(root: impl Into<PathBuf>, config: &EngineConfig) -> Self {
        Self {
            root: root.into(),
            scope: SnapshotScope::new(config.state_dir.clone())
                .with_excluded_dirs(config.excluded_dirs.iter().cloned()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scope(&self) -> &SnapshotScope {
        &self.scope
    }

    /// Absolute path of a path given relative to the root
    pub fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Path relative to the root; paths outside the root are returned as is
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Every source file under the target directories, sorted
    ///
    /// An empty `target_dirs` means the whole project.
    pub fn python_files(&self, target_dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let roots: Vec<PathBuf> = if target_dirs.is_empty() {
            vec![self.root.clone()]
        } else {
            target_dirs.iter().map(|dir| self.absolute(dir)).collect()
        };

        let mut files = BTreeSet::new();
        for dir in roots {
            if !dir.is_dir() {
                return Err(RefactoringError::Validation(format!(
                    "Target directory does not exist: {}",
                    dir.display()
                )));
            }
            let walker = WalkDir::new(&dir).into_iter().filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                entry
                    .file_name()
                    .to_str()
                    .map(|name| !self.scope.is_excluded_dir(name))
                    .unwrap_or(true)
            });
            for entry in walker {
                let entry = entry.map_err(|e| RefactoringError::IoError(e.into()))?;
                let path = entry.path();
                if entry.file_type().is_file()
                    && path.extension().and_then(|e| e.to_str()) == Some(SOURCE_EXTENSION)
                {
                    files.insert(path.to_path_buf());
                }
            }
        }

        debug!(count = files.len(), "Discovered source files");
        Ok(files.into_iter().collect())
    }

    /// Dotted module segments of a file; `pkg/__init__.py` is `pkg`
    pub fn module_segments(&self, path: &Path) -> Vec<String> {
        let relative = self.relative(path);
        let mut segments: Vec<String> = relative
            .parent()
            .map(|parent| {
                parent
                    .components()
                    .filter_map(|c| c.as_os_str().to_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let is_aggregator = relative.file_name().and_then(|n| n.to_str()) == Some(AGGREGATOR_FILE);
        if !is_aggregator {
            if let Some(stem) = relative.file_stem().and_then(|s| s.to_str()) {
                segments.push(stem.to_string());
            }
        }
        segments
    }

    pub fn module_path(&self, path: &Path) -> String {
        self.module_segments(path).join(".")
    }

    /// Top-level packages and modules of the project
    pub fn local_roots(&self) -> Result<BTreeSet<String>> {
        let mut roots = BTreeSet::new();
        for file in self.python_files(&[])? {
            let relative = self.relative(&file);
            let mut components = relative.components();
            let first = components
                .next()
                .and_then(|c| c.as_os_str().to_str().map(str::to_string));
            match (first, components.next()) {
                (Some(dir), Some(_)) => {
                    roots.insert(dir);
                }
                (Some(_), None) => {
                    if let Some(stem) = relative.file_stem().and_then(|s| s.to_str()) {
                        roots.insert(stem.to_string());
                    }
                }
                _ => {}
            }
        }
        Ok(roots)
    }

    /// File implementing a dotted module, if it exists in the project
    pub fn resolve_module(&self, dotted: &str) -> Option<PathBuf> {
        if dotted.is_empty() {
            return None;
        }
        let mut base = self.root.clone();
        for segment in dotted.split('.') {
            base.push(segment);
        }
        let module_file = base.with_extension(SOURCE_EXTENSION);
        if module_file.is_file() {
            return Some(module_file);
        }
        let package_file = base.join(AGGREGATOR_FILE);
        if package_file.is_file() {
            return Some(package_file);
        }
        None
    }

    /// Absolute dotted name of a relative import written in `file`
    pub fn resolve_relative(&self, file: &Path, level: usize, module: &str) -> Option<String> {
        let mut package = self.module_segments(file);
        let is_aggregator = file.file_name().and_then(|n| n.to_str()) == Some(AGGREGATOR_FILE);
        if !is_aggregator {
            package.pop();
        }
        for _ in 1..level {
            package.pop()?;
        }
        package.extend(
            module
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
        if package.is_empty() {
            None
        } else {
            Some(package.join("."))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project() -> (TempDir, ProjectTree) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("app/services")).unwrap();
        fs::create_dir_all(root.join("app/__pycache__")).unwrap();
        fs::create_dir_all(root.join(".reshaper/backups")).unwrap();
        fs::write(root.join("app/__init__.py"), "").unwrap();
        fs::write(root.join("app/services/orders.py"), "x = 1\n").unwrap();
        fs::write(root.join("app/__pycache__/orders.py"), "").unwrap();
        fs::write(root.join(".reshaper/backups/old.py"), "").unwrap();
        fs::write(root.join("manage.py"), "").unwrap();
        let tree = ProjectTree::new(root, &EngineConfig::default());
        (temp_dir, tree)
    }

    #[test]
    fn test_python_files_skip_excluded_dirs() {
        let (_dir, tree) = project();
        let files: Vec<PathBuf> = tree
            .python_files(&[])
            .unwrap()
            .iter()
            .map(|f| tree.relative(f))
            .collect();
        assert_eq!(
            files,
            vec![
                PathBuf::from("app/__init__.py"),
                PathBuf::from("app/services/orders.py"),
                PathBuf::from("manage.py"),
            ]
        );
    }

    #[test]
    fn test_missing_target_dir() {
        let (_dir, tree) = project();
        let err = tree.python_files(&[PathBuf::from("missing")]).unwrap_err();
        assert!(matches!(err, RefactoringError::Validation(_)));
    }

    #[test]
    fn test_module_paths_and_roots() {
        let (dir, tree) = project();
        let orders = dir.path().join("app/services/orders.py");
        assert_eq!(tree.module_path(&orders), "app.services.orders");
        assert_eq!(tree.module_path(&dir.path().join("app/__init__.py")), "app");

        let roots = tree.local_roots().unwrap();
        assert!(roots.contains("app"));
        assert!(roots.contains("manage"));
        assert!(!roots.contains(".reshaper"));
    }

    #[test]
    fn test_resolve_modules() {
        let (dir, tree) = project();
        assert_eq!(
            tree.resolve_module("app.services.orders"),
            Some(dir.path().join("app/services/orders.py"))
        );
        assert_eq!(tree.resolve_module("app"), Some(dir.path().join("app/__init__.py")));
        assert_eq!(tree.resolve_module("app.missing"), None);

        let orders = dir.path().join("app/services/orders.py");
        assert_eq!(
            tree.resolve_relative(&orders, 1, "billing").as_deref(),
            Some("app.services.billing")
        );
        assert_eq!(tree.resolve_relative(&orders, 2, "").as_deref(), Some("app"));
        assert_eq!(tree.resolve_relative(&orders, 4, "x"), None);
    }
}
