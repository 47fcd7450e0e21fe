//! Error types for snapshot and audit operations

/// Errors that can occur while protecting or restoring a project
#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    /// Backup contents no longer match the hash recorded at snapshot time
    #[error("Backup {backup_id} failed integrity check: expected {expected}, found {actual}")]
    IntegrityMismatch {
        backup_id: String,
        expected: String,
        actual: String,
    },

    /// No backup with the given id exists
    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    /// Snapshot operation failed
    #[error("Backup failed: {0}")]
    BackupFailed(String),

    /// Restore operation failed
    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    /// Audit store could not be read or written
    #[error("Audit error: {0}")]
    Audit(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl SafetyError {
    /// Whether this error means stored backup data is corrupt
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, SafetyError::IntegrityMismatch { .. })
    }
}

impl From<walkdir::Error> for SafetyError {
    fn from(err: walkdir::Error) -> Self {
        SafetyError::IoError(err.into())
    }
}

/// Result type for safety operations
pub type SafetyResult<T> = std::result::Result<T, SafetyError>;
