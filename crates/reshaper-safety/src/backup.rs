//! Project snapshots with integrity-checked restoration

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SafetyError, SafetyResult};
use crate::models::BackupRecord;
use crate::verifier::{tree_entries, ContentVerifier, SnapshotScope};

const TREE_DIR: &str = "tree";
const RECORD_FILE: &str = "backup.json";

/// Outcome of restoring a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub backup_id: String,
    pub files_removed: usize,
    pub files_restored: usize,
}

/// Manages snapshot creation, lookup and restoration
///
/// Each backup lives in `{backup_root}/{id}/` with the copied project under
/// `tree/` and its [`BackupRecord`] in `backup.json`.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_root: PathBuf,
    scope: SnapshotScope,
}

impl BackupManager {
    /// Creates a new BackupManager instance
    ///
    /// # Arguments
    ///
    /// * `backup_root` - Directory where backups will be stored
    /// * `scope` - Which parts of a project are captured
    pub fn new(backup_root: PathBuf, scope: SnapshotScope) -> Self {
        BackupManager { backup_root, scope }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    pub fn scope(&self) -> &SnapshotScope {
        &self.scope
    }

    /// Copies every snapshot-eligible file of `project` into a new backup
    ///
    /// # Arguments
    ///
    /// * `project` - Root of the project tree
    /// * `description` - Free-form label stored with the record
    ///
    /// # Returns
    ///
    /// The persisted [`BackupRecord`], whose hash covers the copied bytes
    pub fn create_backup(&self, project: &Path, description: &str) -> SafetyResult<BackupRecord> {
        if !project.is_dir() {
            return Err(SafetyError::BackupFailed(format!(
                "Project directory does not exist: {}",
                project.display()
            )));
        }

        let created_at = Utc::now();
        let uuid = Uuid::new_v4().simple().to_string();
        let id = format!("{}-{}", created_at.format("%Y%m%dT%H%M%S"), &uuid[..8]);
        let backup_dir = self.backup_root.join(&id);
        let tree = backup_dir.join(TREE_DIR);

        fs::create_dir_all(&tree).map_err(|e| {
            SafetyError::BackupFailed(format!(
                "Failed to create backup directory {}: {}",
                tree.display(),
                e
            ))
        })?;

        for dir in self.scope.collect_dirs(project)? {
            fs::create_dir_all(tree.join(&dir))?;
        }
        let files = self.scope.collect_files(project)?;
        for file in &files {
            let destination = tree.join(file);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(project.join(file), &destination).map_err(|e| {
                SafetyError::BackupFailed(format!("Failed to copy {}: {}", file.display(), e))
            })?;
        }

        let digest = ContentVerifier::digest_files(&tree, &files)?;
        let record = BackupRecord {
            id,
            created_at,
            project_path: project.to_path_buf(),
            backup_path: tree,
            file_count: digest.file_count,
            total_bytes: digest.total_bytes,
            content_hash: digest.hash,
            description: description.to_string(),
        };
        fs::write(
            backup_dir.join(RECORD_FILE),
            serde_json::to_string_pretty(&record)?,
        )?;

        info!(
            backup_id = %record.id,
            files = record.file_count,
            bytes = record.total_bytes,
            "Created project backup"
        );
        Ok(record)
    }

    /// Recomputes the hash of a backup tree and compares it to the record
    pub fn verify_backup(&self, record: &BackupRecord) -> SafetyResult<()> {
        if !record.backup_path.is_dir() {
            return Err(SafetyError::BackupNotFound(record.id.clone()));
        }
        let digest = ContentVerifier::digest_tree(&record.backup_path)?;
        if digest.hash != record.content_hash {
            warn!(backup_id = %record.id, "Backup integrity check failed");
            return Err(SafetyError::IntegrityMismatch {
                backup_id: record.id.clone(),
                expected: record.content_hash.clone(),
                actual: digest.hash,
            });
        }
        debug!(backup_id = %record.id, "Backup integrity verified");
        Ok(())
    }

    /// Restores `project` to the exact content of a backup
    ///
    /// The backup is verified first; on mismatch nothing in the project is
    /// touched. Otherwise every snapshot-eligible file is removed, directories
    /// absent from the backup are pruned when empty, and the tree is copied
    /// back.
    pub fn restore_backup(&self, record: &BackupRecord, project: &Path) -> SafetyResult<RestoreSummary> {
        self.verify_backup(record)?;

        let live_files = self.scope.collect_files(project)?;
        for file in &live_files {
            fs::remove_file(project.join(file)).map_err(|e| {
                SafetyError::RestoreFailed(format!("Failed to remove {}: {}", file.display(), e))
            })?;
        }

        let mut live_dirs = self.scope.collect_dirs(project)?;
        live_dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
        for dir in live_dirs {
            if record.backup_path.join(&dir).is_dir() {
                continue;
            }
            let path = project.join(&dir);
            let is_empty = fs::read_dir(&path)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if is_empty {
                fs::remove_dir(&path)?;
            }
        }

        let tree = &record.backup_path;
        let (backup_dirs, backup_files) = tree_entries(tree)?;
        for dir in backup_dirs {
            fs::create_dir_all(project.join(dir))?;
        }
        for file in &backup_files {
            let destination = project.join(file);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(tree.join(file), &destination).map_err(|e| {
                SafetyError::RestoreFailed(format!("Failed to restore {}: {}", file.display(), e))
            })?;
        }

        info!(
            backup_id = %record.id,
            removed = live_files.len(),
            restored = backup_files.len(),
            "Restored project from backup"
        );
        Ok(RestoreSummary {
            backup_id: record.id.clone(),
            files_removed: live_files.len(),
            files_restored: backup_files.len(),
        })
    }

    /// Loads a backup record by id
    pub fn get_backup(&self, id: &str) -> SafetyResult<BackupRecord> {
        let path = self.backup_root.join(id).join(RECORD_FILE);
        if !path.is_file() {
            return Err(SafetyError::BackupNotFound(id.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Lists every readable backup, oldest first
    pub fn list_backups(&self) -> SafetyResult<Vec<BackupRecord>> {
        if !self.backup_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&self.backup_root)? {
            let entry = entry?;
            let record_path = entry.path().join(RECORD_FILE);
            if !record_path.is_file() {
                continue;
            }
            let parsed = fs::read_to_string(&record_path)
                .map_err(SafetyError::from)
                .and_then(|content| serde_json::from_str::<BackupRecord>(&content).map_err(SafetyError::from));
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %record_path.display(), error = %e, "Skipping unreadable backup record"),
            }
        }

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project_with_files(root: &Path) {
        fs::create_dir_all(root.join("app/services")).unwrap();
        fs::write(root.join("app/__init__.py"), "").unwrap();
        fs::write(root.join("app/services/orders.py"), "def run():\n    return 1\n").unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref: main").unwrap();
    }

    fn manager(root: &Path) -> BackupManager {
        BackupManager::new(root.join(".reshaper/backups"), SnapshotScope::default())
    }

    #[test]
    fn test_create_backup() {
        let temp_dir = TempDir::new().unwrap();
        project_with_files(temp_dir.path());

        let record = manager(temp_dir.path())
            .create_backup(temp_dir.path(), "before run")
            .unwrap();

        assert_eq!(record.file_count, 2);
        assert!(record.backup_path.join("app/services/orders.py").exists());
        assert!(!record.backup_path.join(".git").exists());
        assert!(record.backup_path.parent().unwrap().join("backup.json").exists());
    }

    #[test]
    fn test_restore_is_byte_identical() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        project_with_files(root);
        let manager = manager(root);
        let record = manager.create_backup(root, "before run").unwrap();

        fs::write(root.join("app/services/orders.py"), "broken(").unwrap();
        fs::create_dir_all(root.join("app/extra")).unwrap();
        fs::write(root.join("app/extra/new.py"), "x = 1\n").unwrap();
        fs::remove_file(root.join("app/__init__.py")).unwrap();

        let summary = manager.restore_backup(&record, root).unwrap();
        assert_eq!(summary.files_restored, 2);
        assert_eq!(
            fs::read_to_string(root.join("app/services/orders.py")).unwrap(),
            "def run():\n    return 1\n"
        );
        assert!(root.join("app/__init__.py").exists());
        assert!(!root.join("app/extra").exists());
        assert!(root.join(".git/HEAD").exists());
    }

    #[test]
    fn test_restore_refuses_corrupted_backup() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        project_with_files(root);
        let manager = manager(root);
        let record = manager.create_backup(root, "before run").unwrap();

        fs::write(record.backup_path.join("app/services/orders.py"), "tampered").unwrap();
        fs::write(root.join("app/services/orders.py"), "changed = True\n").unwrap();

        let result = manager.restore_backup(&record, root);
        match result {
            Err(SafetyError::IntegrityMismatch { backup_id, .. }) => assert_eq!(backup_id, record.id),
            other => panic!("expected integrity error, got {:?}", other),
        }
        assert_eq!(
            fs::read_to_string(root.join("app/services/orders.py")).unwrap(),
            "changed = True\n"
        );
    }

    #[test]
    fn test_catalog_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        project_with_files(root);
        let manager = manager(root);
        let first = manager.create_backup(root, "first").unwrap();
        let second = manager.create_backup(root, "second").unwrap();

        let listed = manager.list_backups().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(manager.get_backup(&second.id).unwrap(), second);
        assert_eq!(manager.get_backup(&first.id).unwrap().description, "first");
        assert!(matches!(
            manager.get_backup("missing"),
            Err(SafetyError::BackupNotFound(_))
        ));
    }
}
