//! Per-run request and shared handles

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reshaper_parsers::SourceParser;
use reshaper_safety::{AuditStore, BackupManager};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{RefactoringError, Result};
use crate::project::ProjectTree;

const BACKUPS_DIR: &str = "backups";
const AUDIT_DIR: &str = "audit";

/// What the caller asks the engine to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub project_path: PathBuf,
    /// Directories to analyze, relative to the project; empty means all
    #[serde(default)]
    pub target_dirs: Vec<PathBuf>,
    /// Skip plan confirmation
    #[serde(default)]
    pub unattended: bool,
}

impl RunRequest {
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self {
            project_path: project_path.into(),
            target_dirs: Vec::new(),
            unattended: false,
        }
    }

    pub fn with_target_dirs(mut self, dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.target_dirs.extend(dirs);
        self
    }

    pub fn unattended(mut self, unattended: bool) -> Self {
        self.unattended = unattended;
        self
    }
}

/// Everything a run needs, built once and threaded through every phase
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: EngineConfig,
    pub project: ProjectTree,
    pub audit: Arc<AuditStore>,
    pub backups: BackupManager,
    pub parser: SourceParser,
    pub actor: String,
}

impl RunContext {
    /// Creates a new RunContext instance
    ///
    /// Backups and the audit store live under `{project}/{state_dir}`.
    ///
    /// # Arguments
    ///
    /// * `project_path` - Root of the project to refactor
    /// * `config` - Validated before use
    pub fn new(project_path: &Path, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        if !project_path.is_dir() {
            return Err(RefactoringError::Validation(format!(
                "project path is not a directory: {}",
                project_path.display()
            )));
        }

        let project = ProjectTree::new(project_path, &config);
        let state_dir = project_path.join(&config.state_dir);
        Ok(Self {
            audit: Arc::new(AuditStore::new(state_dir.join(AUDIT_DIR))),
            backups: BackupManager::new(state_dir.join(BACKUPS_DIR), project.scope().clone()),
            parser: SourceParser::new(),
            actor: config.actor.clone(),
            project,
            config,
        })
    }

    /// Share an audit store with other runs
    pub fn with_audit(mut self, audit: Arc<AuditStore>) -> Self {
        self.audit = audit;
        self
    }

    pub fn state_dir(&self) -> PathBuf {
        self.project.root().join(&self.config.state_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_context_layout() {
        let temp_dir = TempDir::new().unwrap();
        let context = RunContext::new(temp_dir.path(), EngineConfig::default()).unwrap();
        assert_eq!(context.state_dir(), temp_dir.path().join(".reshaper"));
        assert_eq!(context.backups.backup_root(), temp_dir.path().join(".reshaper/backups"));
        assert_eq!(context.audit.audit_dir(), temp_dir.path().join(".reshaper/audit"));
        assert_eq!(context.actor, "reshaper");
    }

    #[test]
    fn test_context_rejects_bad_input() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        assert!(RunContext::new(&missing, EngineConfig::default()).is_err());

        let config = EngineConfig {
            unit_limit: 1,
            ..EngineConfig::default()
        };
        assert!(matches!(
            RunContext::new(temp_dir.path(), config),
            Err(RefactoringError::Validation(_))
        ));
    }

    #[test]
    fn test_request_builder() {
        let request = RunRequest::new("/p")
            .with_target_dirs(vec![PathBuf::from("src")])
            .unattended(true);
        assert!(request.unattended);
        assert_eq!(request.target_dirs, vec![PathBuf::from("src")]);
    }
}
